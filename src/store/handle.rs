//! Store Handle
//!
//! Lazily opens one backing store and reopens it after it closes.
//!
//! ## Concurrency:
//! - `state`: tri-state cell (Absent / Opening / Present). The lock is only
//!   held to inspect or swap the state, never across an open.
//! - Whoever moves the cell from Absent to Opening is the only opener; every
//!   other caller backs off (spin, yield, sleep) until the cell leaves Opening.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::utils::Backoff;
use parking_lot::Mutex;

use crate::config::StoreConfig;
use crate::error::{RegionError, Result};
use crate::region::RegionFile;

use super::{BlockReader, BlockStore};

/// Sleep between polls once spinning and yielding are exhausted
const OPEN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Attempts before a store that keeps closing under us is reported as closed
const MAX_REOPEN_ATTEMPTS: usize = 3;

type Opener<S> = Box<dyn Fn() -> Result<S> + Send + Sync>;

enum Slot<S> {
    /// No instance
    Absent,
    /// Some caller is constructing the instance
    Opening,
    Present(Arc<S>),
    /// The last open attempt failed; cleared by `timeout_check`
    Failed(String),
}

/// What a caller decided after one look at the cell
enum Step<S> {
    Ready(Arc<S>),
    Open,
    Wait,
    Unavailable(String),
}

/// Lifecycle wrapper around one lazily-opened [`BlockStore`]
///
/// The handle is never torn down: after its store closes (idle timeout or
/// explicit close) the next access opens a fresh instance. At most one
/// instance exists at a time.
pub struct StoreHandle<S: BlockStore = RegionFile> {
    name: String,
    state: Mutex<Slot<S>>,
    opener: Opener<S>,
}

impl StoreHandle<RegionFile> {
    /// Handle over the region file at `path`
    pub fn for_region(path: impl Into<PathBuf>, config: StoreConfig) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self::with_opener(name, move || RegionFile::open(&path, &config))
    }
}

impl<S: BlockStore> StoreHandle<S> {
    /// Handle that builds its store with `opener`
    pub fn with_opener<F>(name: impl Into<String>, opener: F) -> Self
    where
        F: Fn() -> Result<S> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            state: Mutex::new(Slot::Absent),
            opener: Box::new(opener),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if an open instance is currently held
    pub fn is_open(&self) -> bool {
        matches!(&*self.state.lock(), Slot::Present(store) if !store.is_closed())
    }

    /// Get the open store, opening it if needed
    ///
    /// Returns `Unavailable` if the last open attempt failed.
    pub fn get(&self) -> Result<Arc<S>> {
        let backoff = Backoff::new();
        loop {
            match self.step() {
                Step::Ready(store) => return Ok(store),
                Step::Open => return self.open_exclusive(),
                Step::Unavailable(reason) => return Err(RegionError::Unavailable(reason)),
                Step::Wait => {
                    if backoff.is_completed() {
                        thread::sleep(OPEN_POLL_INTERVAL);
                    } else {
                        backoff.snooze();
                    }
                }
            }
        }
    }

    /// Close the store if it has been idle past its timeout
    ///
    /// Also clears a failed open so the next access retries.
    pub fn timeout_check(&self) {
        let store = {
            let mut state = self.state.lock();
            match &*state {
                Slot::Present(store) => store.clone(),
                Slot::Failed(_) => {
                    *state = Slot::Absent;
                    return;
                }
                Slot::Absent | Slot::Opening => return,
            }
        };

        match store.close_if_timed_out() {
            Ok(true) => tracing::debug!(store = %self.name, "closed idle store"),
            Ok(false) => {}
            Err(e) => tracing::warn!(store = %self.name, error = %e, "failed to close idle store"),
        }
        self.clear_if_closed(&store);
    }

    /// Close the store unless a writer is open
    ///
    /// Returns true if no open instance remains.
    pub fn attempt_close(&self) -> bool {
        let store = {
            let state = self.state.lock();
            match &*state {
                Slot::Present(store) => store.clone(),
                Slot::Absent | Slot::Failed(_) => return true,
                Slot::Opening => return false,
            }
        };

        if let Err(e) = store.attempt_close() {
            tracing::warn!(store = %self.name, error = %e, "error while closing store");
        }
        self.clear_if_closed(&store)
    }

    // =========================================================================
    // Block Operations
    // =========================================================================

    pub fn read(&self, index: usize) -> Result<BlockReader> {
        self.with_store(|store| store.read(index))
    }

    /// Read and decompress block `index`
    pub fn read_block(&self, index: usize) -> Result<Vec<u8>> {
        self.with_store(|store| store.read(index)?.read_to_vec())
    }

    /// Write `data` as the whole content of block `index`
    pub fn write_block(&self, index: usize, data: &[u8]) -> Result<()> {
        self.with_store(|store| {
            let mut writer = store.write(index)?;
            writer.write_all(data)?;
            writer.finish()
        })
    }

    pub fn exists(&self, index: usize) -> Result<bool> {
        self.with_store(|store| store.exists(index))
    }

    pub fn delete(&self, index: usize) -> Result<()> {
        self.with_store(|store| store.delete(index))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// One look at the cell, claiming the open if it is Absent
    fn step(&self) -> Step<S> {
        let mut state = self.state.lock();
        match &*state {
            Slot::Present(store) if !store.is_closed() => Step::Ready(store.clone()),
            Slot::Present(_) => {
                *state = Slot::Absent;
                drop(state);
                self.step()
            }
            Slot::Absent => {
                *state = Slot::Opening;
                Step::Open
            }
            Slot::Opening => Step::Wait,
            Slot::Failed(reason) => Step::Unavailable(reason.clone()),
        }
    }

    /// Run the opener; only called by the caller that moved the cell to Opening
    fn open_exclusive(&self) -> Result<Arc<S>> {
        let mut guard = OpeningGuard {
            handle: self,
            armed: true,
        };
        let result = (self.opener)();
        guard.armed = false;

        let mut state = self.state.lock();
        if !matches!(&*state, Slot::Opening) {
            panic!(
                "store handle {} left the Opening state while being opened",
                self.name
            );
        }

        match result {
            Ok(store) => {
                let store = Arc::new(store);
                *state = Slot::Present(Arc::clone(&store));
                tracing::debug!(store = %self.name, "opened store");
                Ok(store)
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(store = %self.name, error = %reason, "failed to open store");
                *state = Slot::Failed(reason.clone());
                Err(RegionError::Unavailable(reason))
            }
        }
    }

    /// Drop our reference to `store` if it is closed. Returns true if the
    /// handle no longer holds an open instance.
    fn clear_if_closed(&self, store: &Arc<S>) -> bool {
        if !store.is_closed() {
            return false;
        }
        let mut state = self.state.lock();
        if let Slot::Present(current) = &*state {
            if Arc::ptr_eq(current, store) {
                *state = Slot::Absent;
            }
        }
        true
    }

    /// Run `op` against the open store, reopening if the store closed
    /// between lookup and use
    fn with_store<T>(&self, op: impl Fn(&S) -> Result<T>) -> Result<T> {
        let mut attempts = 0;
        loop {
            let store = self.get()?;
            match op(&store) {
                Err(RegionError::Closed) if attempts + 1 < MAX_REOPEN_ATTEMPTS => {
                    attempts += 1;
                    self.clear_if_closed(&store);
                }
                other => return other,
            }
        }
    }
}

/// Marks the open as failed if the opener unwinds, so waiters do not spin
/// forever on Opening
struct OpeningGuard<'a, S: BlockStore> {
    handle: &'a StoreHandle<S>,
    armed: bool,
}

impl<S: BlockStore> Drop for OpeningGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            *self.handle.state.lock() = Slot::Failed("opener panicked".to_string());
        }
    }
}
