//! Store Module
//!
//! The block-store capability and the lifecycle around it.
//!
//! ## Responsibilities
//! - [`BlockStore`]: read/write/exists/delete on indexed blocks plus
//!   close and idle-timeout queries
//! - [`StoreHandle`]: lazily opens one store, reopens it after it closes
//! - [`RegionManager`]: one handle per region file of a directory
//! - [`TimeoutChecker`]: background thread closing idle region files
//!
//! ## Handle States
//! ```text
//!            claimed (lock)             open finished
//!  Absent ─────────────────▶ Opening ─────────────────▶ Present
//!    ▲                                                     │
//!    └──────────────── instance reports closed ────────────┘
//! ```

mod checker;
mod handle;
mod manager;
mod stream;

use crate::error::Result;

pub use checker::TimeoutChecker;
pub use handle::StoreHandle;
pub use manager::RegionManager;
pub use stream::{BlockReader, BlockWriter, EncodedBlock};

/// Receiving end of a [`BlockWriter`]
///
/// Implemented by every [`BlockStore`]; writers call back into it when they
/// are finished or dropped.
pub trait BlockCommit {
    /// Persist a finished block. Called while the writer slot for `index`
    /// is still held.
    fn commit(&self, index: usize, block: EncodedBlock) -> Result<()>;

    /// Give up the writer slot for `index`
    fn release_writer(&self, index: usize);
}

/// A flat array of independently addressable, compressed byte blobs
pub trait BlockStore: BlockCommit + Send + Sync {
    /// Open a reader over a snapshot of block `index`
    fn read(&self, index: usize) -> Result<BlockReader>;

    /// Open a buffering writer for block `index`
    ///
    /// Blocks while another writer for the same index is alive.
    fn write(&self, index: usize) -> Result<BlockWriter<'_>>;

    fn exists(&self, index: usize) -> Result<bool>;

    /// Remove block `index` and free its sectors
    fn delete(&self, index: usize) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// True once the store has been idle for longer than its timeout
    fn is_timed_out(&self) -> bool;

    /// Close the store if it timed out and no writer is open.
    /// Returns true if this call closed it.
    fn close_if_timed_out(&self) -> Result<bool> {
        if self.is_timed_out() {
            self.attempt_close()
        } else {
            Ok(false)
        }
    }

    /// Close the store unless a writer is open; never blocks on writers
    fn attempt_close(&self) -> Result<bool>;
}
