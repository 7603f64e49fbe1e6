//! Region header
//!
//! Offset table (sector 0) and timestamp table (sector 1), both 1024
//! big-endian u32 entries.

use std::ops::Range;

use super::{BLOCK_COUNT, MAX_BLOCK_SECTORS, SECTOR_SIZE};

/// Byte offset of the timestamp table
pub const TIMESTAMP_TABLE_OFFSET: u64 = SECTOR_SIZE as u64;

/// A contiguous range of sectors holding one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectorRun {
    start: usize,
    count: usize,
}

impl SectorRun {
    pub fn new(start: usize, count: usize) -> Self {
        Self { start, count }
    }

    /// Decode an offset-table entry: `(sector << 8) | count`
    pub fn from_entry(entry: u32) -> Self {
        Self {
            start: (entry >> 8) as usize,
            count: (entry & 0xFF) as usize,
        }
    }

    /// Encode as an offset-table entry
    ///
    /// Callers guarantee `count <= 255`; the sector number is limited to 24 bits.
    pub fn to_entry(&self) -> u32 {
        debug_assert!(self.count <= MAX_BLOCK_SECTORS);
        ((self.start as u32) << 8) | (self.count as u32 & 0xFF)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// One past the last sector
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }

    /// File offset of the first sector
    pub fn byte_offset(&self) -> u64 {
        (self.start * SECTOR_SIZE) as u64
    }

    /// Bytes available to the block
    pub fn byte_len(&self) -> usize {
        self.count * SECTOR_SIZE
    }
}

/// In-memory copy of the offset and timestamp tables
#[derive(Debug, Clone)]
pub struct RegionHeader {
    offsets: Box<[u32; BLOCK_COUNT]>,
    timestamps: Box<[u32; BLOCK_COUNT]>,
}

impl Default for RegionHeader {
    fn default() -> Self {
        Self {
            offsets: Box::new([0; BLOCK_COUNT]),
            timestamps: Box::new([0; BLOCK_COUNT]),
        }
    }
}

impl RegionHeader {
    /// Parse both tables from the first two sectors of a region file
    pub fn parse(bytes: &[u8; SECTOR_SIZE * 2]) -> Self {
        let mut header = Self::default();
        let (offsets, timestamps) = bytes.split_at(SECTOR_SIZE);
        for (i, chunk) in offsets.chunks_exact(4).enumerate() {
            header.offsets[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        for (i, chunk) in timestamps.chunks_exact(4).enumerate() {
            header.timestamps[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        header
    }

    /// Sector run of block `index`, `None` if the block is absent
    pub fn run(&self, index: usize) -> Option<SectorRun> {
        match self.offsets[index] {
            0 => None,
            entry => Some(SectorRun::from_entry(entry)),
        }
    }

    pub fn set_entry(&mut self, index: usize, entry: u32) {
        self.offsets[index] = entry;
    }

    pub fn timestamp(&self, index: usize) -> u32 {
        self.timestamps[index]
    }

    pub fn set_timestamp(&mut self, index: usize, timestamp: u32) {
        self.timestamps[index] = timestamp;
    }

    /// Iterate `(index, run)` over every present block
    pub fn runs(&self) -> impl Iterator<Item = (usize, SectorRun)> + '_ {
        self.offsets
            .iter()
            .enumerate()
            .filter(|&(_, &entry)| entry != 0)
            .map(|(i, &entry)| (i, SectorRun::from_entry(entry)))
    }

    /// File offset of block `index`'s offset-table entry
    pub fn offset_position(index: usize) -> u64 {
        (index * 4) as u64
    }

    /// File offset of block `index`'s timestamp-table entry
    pub fn timestamp_position(index: usize) -> u64 {
        TIMESTAMP_TABLE_OFFSET + (index * 4) as u64
    }
}
