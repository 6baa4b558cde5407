//! Configuration for tsarchive
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::encoding::EncodingKind;
use crate::error::{ArchiveError, Result};

/// Smallest page size an archive may use
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest page size an archive may use
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Main configuration for a tsarchive instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the archive file
    pub path: PathBuf,

    /// Fixed page size of the archive file (only used when creating)
    pub page_size: usize,

    /// Open without the ability to edit
    pub read_only: bool,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Key encoding for streams created implicitly by `add`
    pub default_key_encoding: EncodingKind,

    /// Value encoding for streams created implicitly by `add`
    pub default_value_encoding: EncodingKind,

    // -------------------------------------------------------------------------
    // Transaction Configuration
    // -------------------------------------------------------------------------
    /// How long convenience helpers wait for the edit slot (None = forever)
    pub edit_timeout: Option<Duration>,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Socket read/write timeout (milliseconds, 0 = none)
    pub io_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./archive.tsa"),
            page_size: 4096,
            read_only: false,
            default_key_encoding: EncodingKind::TimeSeries,
            default_value_encoding: EncodingKind::TimeSeries,
            edit_timeout: Some(Duration::from_secs(30)),
            listen_addr: "127.0.0.1:38402".to_string(),
            max_connections: 256,
            io_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the settings describe a usable archive
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(ArchiveError::Config(format!(
                "page size {} must be a power of two in [{}, {}]",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.max_connections == 0 {
            return Err(ArchiveError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the archive file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the page size used when creating an archive
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Open the archive read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Set the key encoding for implicitly created streams
    pub fn default_key_encoding(mut self, kind: EncodingKind) -> Self {
        self.config.default_key_encoding = kind;
        self
    }

    /// Set the value encoding for implicitly created streams
    pub fn default_value_encoding(mut self, kind: EncodingKind) -> Self {
        self.config.default_value_encoding = kind;
        self
    }

    /// Set the edit slot timeout (None waits forever)
    pub fn edit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.edit_timeout = timeout;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the socket timeout (in milliseconds)
    pub fn io_timeout_ms(mut self, ms: u64) -> Self {
        self.config.io_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
