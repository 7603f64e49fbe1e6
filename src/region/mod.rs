//! Region Module
//!
//! Container files holding up to 1024 compressed blocks in 4 KB sectors.
//!
//! ## Responsibilities
//! - Track free/used sectors and place blocks (first-fit, then append)
//! - Keep the offset and timestamp tables in memory and on disk
//! - Compress/decompress block payloads
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Sector 0: Offset Table                 │
//! │ 1024 × u32 BE = (sector << 8) | count  │
//! ├────────────────────────────────────────┤
//! │ Sector 1: Timestamp Table              │
//! │ 1024 × u32 BE unix seconds             │
//! ├────────────────────────────────────────┤
//! │ Sectors 2..N: Block Data               │
//! │ ┌──────────┬───────────┬─────────────┐ │
//! │ │Length (4)│Version (1)│ Compressed  │ │
//! │ └──────────┴───────────┴─────────────┘ │
//! │ (padded to a whole number of sectors)  │
//! └────────────────────────────────────────┘
//! ```

mod allocator;
pub(crate) mod compression;
mod file;
mod header;

use std::fmt;

use crate::error::{RegionError, Result};

pub use allocator::SectorAllocator;
pub use compression::CompressionScheme;
pub use file::{BlockInfo, RegionFile, RegionStats};
pub use header::{RegionHeader, SectorRun};

/// Size of one sector in bytes
pub const SECTOR_SIZE: usize = 4096;

/// Number of sectors taken by the offset and timestamp tables
pub const HEADER_SECTORS: usize = 2;

/// Blocks along one edge of a region
pub const REGION_WIDTH: usize = 32;

/// Blocks per region file
pub const BLOCK_COUNT: usize = REGION_WIDTH * REGION_WIDTH;

/// Length field + version byte in front of every block payload
pub const BLOCK_HEADER_SIZE: usize = 5;

/// Largest sector count an offset entry can describe (low byte)
pub const MAX_BLOCK_SECTORS: usize = 255;

/// Sectors needed to store `payload_len` compressed bytes plus the block header
pub const fn sectors_needed(payload_len: usize) -> usize {
    (payload_len + BLOCK_HEADER_SIZE).div_ceil(SECTOR_SIZE)
}

/// Local coordinate of a block inside its region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockCoord {
    x: u8,
    z: u8,
}

impl BlockCoord {
    /// Validate a local coordinate; both axes must be in [0, 32)
    pub fn new(x: i32, z: i32) -> Result<Self> {
        let width = REGION_WIDTH as i32;
        if !(0..width).contains(&x) || !(0..width).contains(&z) {
            return Err(RegionError::OutOfBounds(format!(
                "block coordinate ({}, {}) outside [0, {})",
                x, z, REGION_WIDTH
            )));
        }
        Ok(Self {
            x: x as u8,
            z: z as u8,
        })
    }

    /// Inverse of [`BlockCoord::index`]
    pub fn from_index(index: usize) -> Result<Self> {
        check_index(index)?;
        Ok(Self {
            x: (index % REGION_WIDTH) as u8,
            z: (index / REGION_WIDTH) as u8,
        })
    }

    /// Linear block index: `x + z * 32`
    pub fn index(&self) -> usize {
        self.x as usize + self.z as usize * REGION_WIDTH
    }

    pub fn x(&self) -> i32 {
        self.x as i32
    }

    pub fn z(&self) -> i32 {
        self.z as i32
    }
}

/// Linear index for `(x, z)`, rejecting coordinates outside the region
pub fn block_index(x: i32, z: i32) -> Result<usize> {
    BlockCoord::new(x, z).map(|c| c.index())
}

pub(crate) fn check_index(index: usize) -> Result<()> {
    if index >= BLOCK_COUNT {
        return Err(RegionError::OutOfBounds(format!(
            "block index {} outside [0, {})",
            index, BLOCK_COUNT
        )));
    }
    Ok(())
}

/// Position of a region in the world grid
///
/// Region files are named `r.<x>.<z>.<ext>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Split world chunk coordinates into the owning region and the local block
    pub fn from_chunk(chunk_x: i32, chunk_z: i32) -> (Self, BlockCoord) {
        let width = REGION_WIDTH as i32;
        let pos = Self {
            x: chunk_x.div_euclid(width),
            z: chunk_z.div_euclid(width),
        };
        let coord = BlockCoord {
            x: chunk_x.rem_euclid(width) as u8,
            z: chunk_z.rem_euclid(width) as u8,
        };
        (pos, coord)
    }

    /// File name for this region, e.g. `r.0.-1.mcr`
    pub fn file_name(&self, extension: &str) -> String {
        format!("r.{}.{}.{}", self.x, self.z, extension)
    }

    /// Parse a file name produced by [`RegionPos::file_name`]
    /// "r.3.-2.mcr" → Some(RegionPos { x: 3, z: -2 })
    pub fn parse_file_name(name: &str, extension: &str) -> Option<Self> {
        let rest = name.strip_prefix("r.")?;
        let rest = rest.strip_suffix(extension)?.strip_suffix('.')?;
        let (x, z) = rest.split_once('.')?;
        Some(Self {
            x: x.parse().ok()?,
            z: z.parse().ok()?,
        })
    }
}

impl fmt::Display for RegionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}
