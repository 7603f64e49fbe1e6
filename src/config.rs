//! Configuration for regionstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RegionError, Result};
use crate::region::CompressionScheme;

/// Main configuration for a region store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the region files
    /// Internal structure:
    ///   {region_dir}/
    ///     ├── r.0.0.mcr
    ///     ├── r.0.-1.mcr
    ///     └── ...
    pub region_dir: PathBuf,

    /// Extension used when naming region files
    pub file_extension: String,

    /// fsync the region file before it is closed
    pub sync_on_close: bool,

    // -------------------------------------------------------------------------
    // Compression Configuration
    // -------------------------------------------------------------------------
    /// Scheme used for new writes (reads accept every scheme)
    pub compression: CompressionScheme,

    /// flate2 compression level (0-9)
    pub compression_level: u32,

    // -------------------------------------------------------------------------
    // Lifecycle Configuration
    // -------------------------------------------------------------------------
    /// Idle time after which an open region file may be closed
    pub idle_timeout: Duration,

    /// How often the background checker looks for idle region files
    pub check_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region_dir: PathBuf::from("./regions"),
            file_extension: "mcr".to_string(),
            sync_on_close: true,
            compression: CompressionScheme::Zlib,
            compression_level: 6,
            idle_timeout: Duration::from_secs(120),
            check_interval: Duration::from_secs(1),
        }
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Reject settings a region directory cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.file_extension.is_empty() || self.file_extension.contains(['.', '/', '\\']) {
            return Err(RegionError::Config(format!(
                "invalid region file extension {:?}",
                self.file_extension
            )));
        }
        if self.check_interval.is_zero() {
            return Err(RegionError::Config(
                "check_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for StoreConfig
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the region directory
    pub fn region_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.region_dir = path.into();
        self
    }

    /// Set the region file extension (without the dot)
    pub fn file_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.file_extension = ext.into();
        self
    }

    pub fn sync_on_close(mut self, sync: bool) -> Self {
        self.config.sync_on_close = sync;
        self
    }

    /// Set the compression scheme used for writes
    pub fn compression(mut self, scheme: CompressionScheme) -> Self {
        self.config.compression = scheme;
        self
    }

    /// Set the compression level, clamped to 0-9
    pub fn compression_level(mut self, level: u32) -> Self {
        self.config.compression_level = level.min(9);
        self
    }

    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the idle timeout (in milliseconds)
    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.idle_timeout = Duration::from_millis(ms);
        self
    }

    /// Set the background check interval
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}
