//! Block streams
//!
//! [`BlockReader`] decompresses an owned snapshot of one block.
//! [`BlockWriter`] compresses into memory and hands the finished payload to
//! its store in one commit.

use std::io::{self, Read, Write};

use bytes::Bytes;

use crate::error::Result;
use crate::region::CompressionScheme;
use crate::region::compression::{BlockDecoder, BlockEncoder};

use super::BlockCommit;

/// A compressed block ready to be committed
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    pub scheme: CompressionScheme,
    pub data: Vec<u8>,
}

/// Decompressing reader over a snapshot of one block
///
/// The snapshot is owned, so later writes to the same block never change
/// what this reader returns.
pub struct BlockReader {
    decoder: BlockDecoder,
    scheme: CompressionScheme,
}

impl BlockReader {
    pub fn new(scheme: CompressionScheme, compressed: Bytes) -> Self {
        Self {
            decoder: scheme.decoder(compressed),
            scheme,
        }
    }

    pub fn scheme(&self) -> CompressionScheme {
        self.scheme
    }

    /// Decompress the whole block
    pub fn read_to_vec(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Read for BlockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

/// Buffering, compressing sink for one block
///
/// Nothing reaches the disk until [`BlockWriter::finish`]. While the writer
/// is alive it holds the block's single-writer slot and keeps the store from
/// closing. Dropping it without `finish` discards the buffered bytes.
pub struct BlockWriter<'a> {
    target: &'a dyn BlockCommit,
    index: usize,
    encoder: Option<BlockEncoder>,
}

impl<'a> BlockWriter<'a> {
    /// Wrap an already-acquired writer slot for `index`
    pub(crate) fn new(target: &'a dyn BlockCommit, index: usize, encoder: BlockEncoder) -> Self {
        Self {
            target,
            index,
            encoder: Some(encoder),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Compress the buffered bytes and commit them to the block
    pub fn finish(mut self) -> Result<()> {
        let encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => return Ok(()),
        };
        let scheme = encoder.scheme();
        let data = encoder.finish()?;
        self.target.commit(self.index, EncodedBlock { scheme, data })
    }
}

impl Write for BlockWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "block writer finished")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        // Data is only committed by finish()
        Ok(())
    }
}

impl Drop for BlockWriter<'_> {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            tracing::warn!(index = self.index, "block writer dropped without finish, discarding");
        }
        self.target.release_writer(self.index);
    }
}
