//! Error types for regionstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using RegionError
pub type Result<T> = std::result::Result<T, RegionError>;

/// Unified error type for regionstore operations
#[derive(Debug, Error)]
pub enum RegionError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Block Errors
    // -------------------------------------------------------------------------
    #[error("Block {index} not found")]
    NotFound { index: usize },

    #[error("Region file corruption detected: {0}")]
    Corrupt(String),

    #[error("Block needs {sectors} sectors, the limit is 255")]
    TooLarge { sectors: usize },

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Region file is closed")]
    Closed,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RegionError {
    /// True for errors that only mean "this block has no usable data"
    pub fn is_block_local(&self) -> bool {
        matches!(
            self,
            RegionError::NotFound { .. } | RegionError::Corrupt(_)
        )
    }
}
