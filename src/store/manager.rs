//! Region Manager
//!
//! Maps region positions to store handles for one directory.
//!
//! ## Responsibilities
//! - Name region files (`r.<x>.<z>.<ext>`) and discover existing ones
//! - Hand out one shared [`StoreHandle`] per region, created on first use
//! - Route chunk coordinates to the owning region and block
//! - Run idle-timeout checks and graceful close across every handle

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::region::{BlockCoord, RegionPos};

use super::StoreHandle;

/// Owns the store handles of one region directory
///
/// ## Concurrency:
/// - `handles`: RwLock; lookups share the read lock, the write lock is only
///   taken to insert a handle the first time a region is touched
/// - Handles are never removed, so an `Arc<StoreHandle>` stays valid for
///   the manager's lifetime
pub struct RegionManager {
    config: StoreConfig,
    handles: RwLock<HashMap<RegionPos, Arc<StoreHandle>>>,
}

impl RegionManager {
    /// Create a manager, creating the region directory if needed
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.region_dir)?;
        tracing::info!(dir = %config.region_dir.display(), "region manager ready");
        Ok(Self {
            config,
            handles: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn region_dir(&self) -> &Path {
        &self.config.region_dir
    }

    /// Path of the region file for `pos`
    pub fn region_path(&self, pos: RegionPos) -> PathBuf {
        self.config
            .region_dir
            .join(pos.file_name(&self.config.file_extension))
    }

    /// The handle for `pos`, created on first use
    pub fn handle(&self, pos: RegionPos) -> Arc<StoreHandle> {
        if let Some(handle) = self.handles.read().get(&pos) {
            return Arc::clone(handle);
        }

        let mut handles = self.handles.write();
        let handle = handles.entry(pos).or_insert_with(|| {
            tracing::debug!(region = %pos, "creating region handle");
            Arc::new(StoreHandle::for_region(
                self.region_path(pos),
                self.config.clone(),
            ))
        });
        Arc::clone(handle)
    }

    /// Handle and local block for a world chunk coordinate
    pub fn chunk_handle(&self, chunk_x: i32, chunk_z: i32) -> (Arc<StoreHandle>, BlockCoord) {
        let (pos, coord) = RegionPos::from_chunk(chunk_x, chunk_z);
        (self.handle(pos), coord)
    }

    pub fn read_chunk(&self, chunk_x: i32, chunk_z: i32) -> Result<Vec<u8>> {
        let (handle, coord) = self.chunk_handle(chunk_x, chunk_z);
        handle.read_block(coord.index())
    }

    pub fn write_chunk(&self, chunk_x: i32, chunk_z: i32, data: &[u8]) -> Result<()> {
        let (handle, coord) = self.chunk_handle(chunk_x, chunk_z);
        handle.write_block(coord.index(), data)
    }

    pub fn chunk_exists(&self, chunk_x: i32, chunk_z: i32) -> Result<bool> {
        let (handle, coord) = self.chunk_handle(chunk_x, chunk_z);
        handle.exists(coord.index())
    }

    pub fn delete_chunk(&self, chunk_x: i32, chunk_z: i32) -> Result<()> {
        let (handle, coord) = self.chunk_handle(chunk_x, chunk_z);
        handle.delete(coord.index())
    }

    /// Region files present in the directory, sorted by position
    pub fn existing_regions(&self) -> Result<Vec<RegionPos>> {
        let mut regions = Vec::new();
        for entry in fs::read_dir(&self.config.region_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(pos) =
                RegionPos::parse_file_name(&name.to_string_lossy(), &self.config.file_extension)
            {
                regions.push(pos);
            }
        }
        regions.sort_by_key(|pos| (pos.x, pos.z));
        Ok(regions)
    }

    /// Close every idle region file
    pub fn timeout_check_all(&self) {
        for handle in self.snapshot() {
            handle.timeout_check();
        }
    }

    /// Try to close every region file. Returns true if all of them closed.
    pub fn close_all(&self) -> bool {
        let mut all_closed = true;
        for handle in self.snapshot() {
            if !handle.attempt_close() {
                tracing::debug!(store = %handle.name(), "region still has open writers");
                all_closed = false;
            }
        }
        all_closed
    }

    /// Number of handles holding an open region file
    pub fn open_count(&self) -> usize {
        self.snapshot().iter().filter(|h| h.is_open()).count()
    }

    /// Number of regions touched so far
    pub fn handle_count(&self) -> usize {
        self.handles.read().len()
    }

    /// Clone the handle list so no lock is held while handles do I/O
    fn snapshot(&self) -> Vec<Arc<StoreHandle>> {
        self.handles.read().values().cloned().collect()
    }
}
