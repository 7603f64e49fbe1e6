//! Block compression
//!
//! The version byte in front of every block selects the framing:
//! - 1 = gzip
//! - 2 = zlib (deflate)

use std::io::{self, Read, Write};

use bytes::buf::Reader;
use bytes::{Buf, Bytes};
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use crate::error::{RegionError, Result};

/// Compression framing of a stored block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    Gzip,
    Zlib,
}

impl CompressionScheme {
    /// Version byte written in front of the payload
    pub fn version(&self) -> u8 {
        match self {
            CompressionScheme::Gzip => 1,
            CompressionScheme::Zlib => 2,
        }
    }

    pub fn from_version(version: u8) -> Result<Self> {
        match version {
            1 => Ok(CompressionScheme::Gzip),
            2 => Ok(CompressionScheme::Zlib),
            other => Err(RegionError::Corrupt(format!(
                "unknown block version {}",
                other
            ))),
        }
    }

    /// Start an in-memory compressor
    pub fn encoder(&self, level: u32) -> BlockEncoder {
        let level = Compression::new(level.min(9));
        match self {
            CompressionScheme::Gzip => BlockEncoder::Gzip(GzEncoder::new(Vec::new(), level)),
            CompressionScheme::Zlib => BlockEncoder::Zlib(ZlibEncoder::new(Vec::new(), level)),
        }
    }

    /// Decompressing reader over a compressed snapshot
    pub fn decoder(&self, compressed: Bytes) -> BlockDecoder {
        match self {
            CompressionScheme::Gzip => BlockDecoder::Gzip(GzDecoder::new(compressed.reader())),
            CompressionScheme::Zlib => BlockDecoder::Zlib(ZlibDecoder::new(compressed.reader())),
        }
    }
}

/// Compressor buffering into a `Vec<u8>`
pub enum BlockEncoder {
    Gzip(GzEncoder<Vec<u8>>),
    Zlib(ZlibEncoder<Vec<u8>>),
}

impl BlockEncoder {
    pub fn scheme(&self) -> CompressionScheme {
        match self {
            BlockEncoder::Gzip(_) => CompressionScheme::Gzip,
            BlockEncoder::Zlib(_) => CompressionScheme::Zlib,
        }
    }

    /// Flush the compressor and return the compressed bytes
    pub fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            BlockEncoder::Gzip(enc) => enc.finish(),
            BlockEncoder::Zlib(enc) => enc.finish(),
        }
    }
}

impl Write for BlockEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BlockEncoder::Gzip(enc) => enc.write(buf),
            BlockEncoder::Zlib(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BlockEncoder::Gzip(enc) => enc.flush(),
            BlockEncoder::Zlib(enc) => enc.flush(),
        }
    }
}

/// Decompressor over an owned snapshot
pub enum BlockDecoder {
    Gzip(GzDecoder<Reader<Bytes>>),
    Zlib(ZlibDecoder<Reader<Bytes>>),
}

impl Read for BlockDecoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlockDecoder::Gzip(dec) => dec.read(buf),
            BlockDecoder::Zlib(dec) => dec.read(buf),
        }
    }
}
