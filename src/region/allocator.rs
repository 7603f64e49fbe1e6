//! Sector allocator
//!
//! Free-sector map for one region file. Each bit represents one 4 KB sector:
//! - 1 = free sector
//! - 0 = used sector

use bitvec::prelude::*;

use super::header::SectorRun;
use super::HEADER_SECTORS;

/// Tracks which sectors of a region file are free
#[derive(Debug, Clone)]
pub struct SectorAllocator {
    free: BitVec<usize, Lsb0>,
}

impl SectorAllocator {
    /// Create a map for a file of `total_sectors` sectors with only the
    /// header sectors marked used
    pub fn new(total_sectors: usize) -> Self {
        let mut free = bitvec![usize, Lsb0; 1; total_sectors.max(HEADER_SECTORS)];
        free[..HEADER_SECTORS].fill(false);
        Self { free }
    }

    /// Number of sectors the file currently spans
    pub fn total_sectors(&self) -> usize {
        self.free.len()
    }

    pub fn free_sectors(&self) -> usize {
        self.free.count_ones()
    }

    pub fn used_sectors(&self) -> usize {
        self.free.count_zeros()
    }

    /// True if every sector of `run` lies inside the file
    pub fn contains(&self, run: SectorRun) -> bool {
        run.end() <= self.free.len()
    }

    /// True if every sector of `run` is free
    pub fn is_free(&self, run: SectorRun) -> bool {
        self.contains(run) && self.free[run.range()].all()
    }

    /// Mark `run` used. Returns false (and changes nothing) if any sector of
    /// the run is outside the file or already used.
    pub fn claim(&mut self, run: SectorRun) -> bool {
        if !self.is_free(run) {
            return false;
        }
        self.free[run.range()].fill(false);
        true
    }

    /// Mark `run` free. Header sectors are never released.
    pub fn release(&mut self, run: SectorRun) {
        let start = run.start().max(HEADER_SECTORS);
        let end = run.end().min(self.free.len());
        if start < end {
            self.free[start..end].fill(true);
        }
    }

    /// First-fit scan for `count` contiguous free sectors
    pub fn find_run(&self, count: usize) -> Option<SectorRun> {
        if count == 0 {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for (sector, free) in self.free.iter().by_vals().enumerate() {
            if !free {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = sector;
            }
            run_len += 1;
            if run_len == count {
                return Some(SectorRun::new(run_start, count));
            }
        }
        None
    }

    /// Extend the file by `count` sectors and claim them
    pub fn append(&mut self, count: usize) -> SectorRun {
        let start = self.free.len();
        self.free.resize(start + count, false);
        SectorRun::new(start, count)
    }
}
