//! # regionstore
//!
//! A concurrent region-file blob store with:
//! - 1024 independently addressable blocks per container file
//! - 4 KB sectors with first-fit reuse and append-on-demand growth
//! - Per-block gzip / zlib compression
//! - Lazily opened, idle-timeout-closed, transparently reopened files
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RegionManager                            │
//! │            (one handle per region file)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │                 ▲
//!                       │                 │ timeout_check_all
//! ┌─────────────────────▼──────────┐  ┌───┴─────────────┐
//! │          StoreHandle           │  │ TimeoutChecker  │
//! │  (Absent / Opening / Present)  │  │ (ticker thread) │
//! └─────────────────────┬──────────┘  └─────────────────┘
//!                       │ BlockStore
//!                       ▼
//!                ┌─────────────┐
//!                │ RegionFile  │──────┐
//!                └──────┬──────┘      │
//!                       │             ▼
//!                       ▼      ┌──────────────────┐
//!              ┌────────────┐  │ SectorAllocator  │
//!              │RegionHeader│  │  (free bitmap)   │
//!              └────────────┘  └──────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod region;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::StoreConfig;
pub use error::{RegionError, Result};
pub use region::{block_index, BlockCoord, CompressionScheme, RegionFile, RegionPos};
pub use store::{BlockReader, BlockStore, BlockWriter, RegionManager, StoreHandle, TimeoutChecker};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of regionstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
