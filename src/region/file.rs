//! Region File
//!
//! One container file: 1024 blocks placed in 4 KB sectors.
//!
//! ## Concurrency:
//! - `inner`: file handle, header tables and free-sector map behind one
//!   Mutex; every allocation and header update happens under it
//! - `write_slots`: one bit per block, at most one live writer per block
//! - `open_writers`: count of live writers, or `FILE_CLOSED` once closed.
//!   Closing is a CAS from 0, so it can never race a writer.
//! - Compression happens in the writer, outside every lock

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bitvec::prelude::*;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::config::StoreConfig;
use crate::error::{RegionError, Result};
use crate::store::{BlockCommit, BlockReader, BlockStore, BlockWriter, EncodedBlock};

use super::allocator::SectorAllocator;
use super::compression::CompressionScheme;
use super::header::{RegionHeader, SectorRun};
use super::{
    check_index, sectors_needed, BLOCK_COUNT, BLOCK_HEADER_SIZE, HEADER_SECTORS,
    MAX_BLOCK_SECTORS, SECTOR_SIZE,
};

/// Value of `open_writers` once the file is closed
const FILE_CLOSED: i32 = -1;

/// Sector numbers are stored in the top 24 bits of an offset entry
const MAX_SECTOR_NUMBER: usize = 0x00FF_FFFF;

/// Sector usage summary of a region file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionStats {
    /// Sectors the file spans, header included
    pub total_sectors: usize,
    pub used_sectors: usize,
    pub free_sectors: usize,
    /// Blocks with a non-zero offset entry
    pub blocks: usize,
    /// Sum of the sector counts of all present blocks
    pub block_sectors: usize,
}

/// Placement of one stored block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub index: usize,
    pub run: SectorRun,
    /// Unix seconds of the last write
    pub timestamp: u32,
}

struct Inner {
    /// `None` once closed
    file: Option<File>,
    header: RegionHeader,
    allocator: SectorAllocator,
    /// Bytes the file grew since last asked
    size_delta: u64,
}

/// A region file opened for concurrent block access
pub struct RegionFile {
    path: PathBuf,
    compression: CompressionScheme,
    compression_level: u32,
    sync_on_close: bool,
    idle_timeout: Duration,
    last_modified: Option<SystemTime>,

    inner: Mutex<Inner>,

    write_slots: Mutex<BitVec<usize, Lsb0>>,
    slot_released: Condvar,
    open_writers: AtomicI32,

    /// Reference point for `last_access`
    epoch: Instant,
    /// Milliseconds since `epoch` of the last access
    last_access: AtomicU64,
}

impl RegionFile {
    /// Open or create a region file
    ///
    /// On open:
    /// 1. Zero-fill the two header sectors if the file is shorter than a sector
    /// 2. Pad the file to a whole number of sectors
    /// 3. Load the offset and timestamp tables
    /// 4. Rebuild the free-sector map from the offset table
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let last_modified = fs::metadata(&path).and_then(|m| m.modified()).ok();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut size_delta = 0u64;
        let header_len = (SECTOR_SIZE * HEADER_SECTORS) as u64;
        let mut len = file.metadata()?.len();

        // Step 1: fresh (or truncated) file gets empty tables
        if len < SECTOR_SIZE as u64 {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&[0u8; SECTOR_SIZE * HEADER_SECTORS])?;
            size_delta += header_len - len;
            len = header_len;
        }

        // Step 2: grow to a multiple of the sector size, never below the header
        let padded = (len.div_ceil(SECTOR_SIZE as u64) * SECTOR_SIZE as u64).max(header_len);
        if padded != len {
            file.set_len(padded)?;
            size_delta += padded - len;
            len = padded;
        }

        // Step 3: load the tables
        let mut raw = [0u8; SECTOR_SIZE * HEADER_SECTORS];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut raw)?;
        let mut header = RegionHeader::parse(&raw);

        // Step 4: mark referenced sectors used, drop entries we cannot trust
        let mut allocator = SectorAllocator::new(len as usize / SECTOR_SIZE);
        for index in 0..BLOCK_COUNT {
            let Some(run) = header.run(index) else {
                continue;
            };
            if run.is_empty() || run.start() < HEADER_SECTORS || !allocator.claim(run) {
                tracing::warn!(
                    path = %path.display(),
                    index,
                    sector = run.start(),
                    count = run.count(),
                    "ignoring invalid offset entry"
                );
                header.set_entry(index, 0);
            }
        }

        tracing::debug!(
            path = %path.display(),
            sectors = allocator.total_sectors(),
            used = allocator.used_sectors(),
            "opened region file"
        );

        let epoch = Instant::now();
        Ok(Self {
            path,
            compression: config.compression,
            compression_level: config.compression_level,
            sync_on_close: config.sync_on_close,
            idle_timeout: config.idle_timeout,
            last_modified,
            inner: Mutex::new(Inner {
                file: Some(file),
                header,
                allocator,
                size_delta,
            }),
            write_slots: Mutex::new(bitvec![usize, Lsb0; 0; BLOCK_COUNT]),
            slot_released: Condvar::new(),
            open_writers: AtomicI32::new(0),
            epoch,
            last_access: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time of the file before this instance opened it
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// Bytes the file has grown since the last call
    pub fn take_size_delta(&self) -> u64 {
        std::mem::take(&mut self.inner.lock().size_delta)
    }

    /// Unix seconds of the last write to block `index` (0 if never written)
    pub fn timestamp(&self, index: usize) -> Result<u32> {
        check_index(index)?;
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.header.timestamp(index))
    }

    /// Placement of block `index`, `None` if absent
    pub fn block_info(&self, index: usize) -> Result<Option<BlockInfo>> {
        check_index(index)?;
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.header.run(index).map(|run| BlockInfo {
            index,
            run,
            timestamp: inner.header.timestamp(index),
        }))
    }

    /// Placement of every present block, in index order
    pub fn blocks(&self) -> Result<Vec<BlockInfo>> {
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner
            .header
            .runs()
            .map(|(index, run)| BlockInfo {
                index,
                run,
                timestamp: inner.header.timestamp(index),
            })
            .collect())
    }

    pub fn stats(&self) -> Result<RegionStats> {
        let inner = self.inner.lock();
        inner.check_open()?;
        let (blocks, block_sectors) = inner
            .header
            .runs()
            .fold((0, 0), |(n, sectors), (_, run)| (n + 1, sectors + run.count()));
        Ok(RegionStats {
            total_sectors: inner.allocator.total_sectors(),
            used_sectors: inner.allocator.used_sectors(),
            free_sectors: inner.allocator.free_sectors(),
            blocks,
            block_sectors,
        })
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_access.store(now, Ordering::Release);
    }

    /// Register a writer and take the slot for `index`, waiting for any
    /// writer already holding it
    fn acquire_writer(&self, index: usize) -> Result<()> {
        let mut current = self.open_writers.load(Ordering::Acquire);
        loop {
            if current == FILE_CLOSED {
                return Err(RegionError::Closed);
            }
            match self.open_writers.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let mut slots = self.write_slots.lock();
        while slots[index] {
            self.slot_released.wait(&mut slots);
        }
        slots.set(index, true);
        Ok(())
    }
}

impl Inner {
    fn check_open(&self) -> Result<()> {
        match self.file {
            Some(_) => Ok(()),
            None => Err(RegionError::Closed),
        }
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(RegionError::Closed)
    }

    /// Read the compressed payload of `run` into an owned buffer
    fn read_payload(&mut self, index: usize, run: SectorRun) -> Result<(CompressionScheme, Vec<u8>)> {
        if !self.allocator.contains(run) {
            return Err(RegionError::Corrupt(format!(
                "block {} points past the end of the file (sectors {:?})",
                index,
                run.range()
            )));
        }

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(run.byte_offset()))?;

        let mut prefix = [0u8; BLOCK_HEADER_SIZE];
        read_exact_or_corrupt(file, &mut prefix, index)?;
        let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;

        if length > run.byte_len() {
            return Err(RegionError::Corrupt(format!(
                "block {} length {} exceeds its {} allocated sectors",
                index,
                length,
                run.count()
            )));
        }
        if length == 0 {
            return Err(RegionError::Corrupt(format!("block {} has zero length", index)));
        }

        let scheme = CompressionScheme::from_version(prefix[4])?;
        let mut data = vec![0u8; length - 1];
        read_exact_or_corrupt(file, &mut data, index)?;
        Ok((scheme, data))
    }

    /// Place and write one compressed block, then update its header entries
    ///
    /// A block that changes sector count gets its new run while its old run
    /// is still marked used, and the old run is released only after the data
    /// and the offset entry are on disk. The new run therefore never overlaps
    /// the old one, and a failed write leaves the previous block readable.
    fn store_block(&mut self, index: usize, block: &EncodedBlock, needed: usize) -> Result<()> {
        self.check_open()?;
        let old = self.header.run(index);

        match old {
            Some(run) if run.count() == needed => {
                self.write_sectors(run, block)?;
                tracing::trace!(index, sector = run.start(), count = needed, "rewrote block in place");
            }
            _ => {
                let run = match self.allocator.find_run(needed) {
                    Some(run) => {
                        self.allocator.claim(run);
                        run
                    }
                    None => self.grow(needed)?,
                };

                if run.start() > MAX_SECTOR_NUMBER {
                    self.allocator.release(run);
                    return Err(RegionError::Corrupt(format!(
                        "sector {} does not fit an offset entry",
                        run.start()
                    )));
                }

                let written = self
                    .write_sectors(run, block)
                    .and_then(|_| self.write_entry(index, run.to_entry()));
                if let Err(e) = written {
                    self.allocator.release(run);
                    return Err(e);
                }

                if let Some(old) = old {
                    self.allocator.release(old);
                }
                tracing::trace!(index, sector = run.start(), count = needed, "moved block");
            }
        }

        self.write_timestamp(index, unix_now())
    }

    fn remove_block(&mut self, index: usize) -> Result<()> {
        self.check_open()?;
        if let Some(run) = self.header.run(index) {
            self.write_entry(index, 0)?;
            self.allocator.release(run);
        }
        Ok(())
    }

    /// Append `count` zeroed sectors to the file and claim them
    fn grow(&mut self, count: usize) -> Result<SectorRun> {
        let new_sectors = self.allocator.total_sectors() + count;
        let file = self.file_mut()?;
        file.set_len((new_sectors * SECTOR_SIZE) as u64)?;
        self.size_delta += (count * SECTOR_SIZE) as u64;
        Ok(self.allocator.append(count))
    }

    fn write_sectors(&mut self, run: SectorRun, block: &EncodedBlock) -> Result<()> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE + block.data.len());
        buf.extend_from_slice(&((block.data.len() + 1) as u32).to_be_bytes());
        buf.push(block.scheme.version());
        buf.extend_from_slice(&block.data);

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(run.byte_offset()))?;
        file.write_all(&buf)?;
        Ok(())
    }

    fn write_entry(&mut self, index: usize, entry: u32) -> Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(RegionHeader::offset_position(index)))?;
        file.write_all(&entry.to_be_bytes())?;
        self.header.set_entry(index, entry);
        Ok(())
    }

    fn write_timestamp(&mut self, index: usize, timestamp: u32) -> Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(RegionHeader::timestamp_position(index)))?;
        file.write_all(&timestamp.to_be_bytes())?;
        self.header.set_timestamp(index, timestamp);
        Ok(())
    }
}

impl BlockCommit for RegionFile {
    fn commit(&self, index: usize, block: EncodedBlock) -> Result<()> {
        let needed = sectors_needed(block.data.len());
        if needed > MAX_BLOCK_SECTORS {
            return Err(RegionError::TooLarge { sectors: needed });
        }

        self.touch();
        self.inner.lock().store_block(index, &block, needed)
    }

    fn release_writer(&self, index: usize) {
        {
            let mut slots = self.write_slots.lock();
            slots.set(index, false);
        }
        self.slot_released.notify_all();
        self.open_writers.fetch_sub(1, Ordering::AcqRel);
    }
}

impl BlockStore for RegionFile {
    fn read(&self, index: usize) -> Result<BlockReader> {
        check_index(index)?;
        self.touch();

        let (scheme, data) = {
            let mut inner = self.inner.lock();
            inner.check_open()?;
            let run = inner.header.run(index).ok_or(RegionError::NotFound { index })?;
            inner.read_payload(index, run)?
        };
        Ok(BlockReader::new(scheme, Bytes::from(data)))
    }

    fn write(&self, index: usize) -> Result<BlockWriter<'_>> {
        check_index(index)?;
        self.touch();
        self.acquire_writer(index)?;
        let encoder = self.compression.encoder(self.compression_level);
        Ok(BlockWriter::new(self, index, encoder))
    }

    fn exists(&self, index: usize) -> Result<bool> {
        check_index(index)?;
        self.touch();
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.header.run(index).is_some())
    }

    fn delete(&self, index: usize) -> Result<()> {
        check_index(index)?;
        self.touch();
        self.inner.lock().remove_block(index)
    }

    fn is_closed(&self) -> bool {
        self.open_writers.load(Ordering::Acquire) == FILE_CLOSED
    }

    fn is_timed_out(&self) -> bool {
        let now = self.epoch.elapsed().as_millis() as u64;
        let idle = now.saturating_sub(self.last_access.load(Ordering::Acquire));
        idle > self.idle_timeout.as_millis() as u64
    }

    fn attempt_close(&self) -> Result<bool> {
        // Held across the CAS: once the file reports closed, no header or
        // data update through this instance can still be in flight
        let file = {
            let mut inner = self.inner.lock();
            if self
                .open_writers
                .compare_exchange(0, FILE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // already closed, or a writer is still open
                return Ok(false);
            }
            inner.file.take()
        };

        if let Some(file) = file {
            if self.sync_on_close {
                file.sync_all()?;
            }
        }
        tracing::debug!(path = %self.path.display(), "closed region file");
        Ok(true)
    }
}

fn read_exact_or_corrupt(file: &mut File, buf: &mut [u8], index: usize) -> Result<()> {
    match file.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(RegionError::Corrupt(format!(
            "block {} runs past the end of the file",
            index
        ))),
        Err(e) => Err(e.into()),
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
