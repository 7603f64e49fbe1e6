//! Timeout Checker
//!
//! Background thread that periodically closes idle region files.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, select, tick, Sender};

use crate::error::Result;

use super::RegionManager;

/// Runs [`RegionManager::timeout_check_all`] every `check_interval`
///
/// Stops when [`TimeoutChecker::stop`] is called or the checker is dropped.
pub struct TimeoutChecker {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TimeoutChecker {
    pub fn spawn(manager: Arc<RegionManager>) -> Result<Self> {
        let interval = manager.config().check_interval;
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);

        let thread = thread::Builder::new()
            .name("region-timeout".to_string())
            .spawn(move || {
                tracing::debug!(?interval, "timeout checker started");
                loop {
                    select! {
                        recv(ticker) -> _ => manager.timeout_check_all(),
                        recv(stop_rx) -> _ => break,
                    }
                }
                tracing::debug!("timeout checker stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the thread with a disconnect
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("timeout checker thread panicked");
            }
        }
    }
}

impl Drop for TimeoutChecker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
