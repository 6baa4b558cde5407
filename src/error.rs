//! Error types for tsarchive
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using ArchiveError
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Unified error type for tsarchive operations
#[derive(Debug, Error)]
pub enum ArchiveError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// A page store read, write or flush failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    /// The edit slot could not be acquired before the timeout elapsed.
    #[error("Timed out waiting for the edit slot")]
    Timeout,

    #[error("Archive was opened read-only")]
    ReadOnlyViolation,

    /// An edit handle tried to terminate after the coordinator stopped
    /// recognizing it as the current edit.
    #[error("Commit conflict: {0}")]
    CommitConflict(String),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Duplicate key: timestamp={timestamp}, point_id={point_id}")]
    DuplicateKey { timestamp: u64, point_id: u64 },

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    /// Malformed variable-length integer or unexpected end of data.
    #[error("Corrupt stream: {0}")]
    CorruptStream(String),

    #[error("Incompatible archive format: {0}")]
    IncompatibleFormat(String),

    #[error("Archive corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for ArchiveError {
    fn from(err: bincode::Error) -> Self {
        ArchiveError::Serialization(err.to_string())
    }
}

impl ArchiveError {
    /// True for conditions a caller is expected to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArchiveError::Timeout)
    }
}
