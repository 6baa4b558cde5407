//! # tsarchive
//!
//! An embedded, copy-on-write time-series archive with:
//! - One writer and any number of snapshot-isolated readers
//! - Versioned allocation tables published atomically on commit
//! - Sorted trees with pluggable key/value encodings
//! - Page reuse once no reader can observe a superseded version
//! - TCP-based remote scans against published versions
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Archive (Transaction Coordinator)            │
//! │          published table · edit slot · reader pins           │
//! └──────────────┬─────────────────────────────┬────────────────┘
//!                │                             │
//!                ▼                             ▼
//!        ┌───────────────┐             ┌───────────────┐
//!        │EditTransaction│             │ReadTransaction│  (many)
//!        │ shadow pages  │             │ pinned version│
//!        └───────┬───────┘             └───────┬───────┘
//!                │                             │
//!                ▼                             ▼
//!        ┌─────────────────────────────────────────────┐
//!        │        Sorted Trees (one per stream)        │
//!        │     leaf pages written by Raw/Delta/TS      │
//!        └──────────────────────┬──────────────────────┘
//!                               ▼
//!                       ┌───────────────┐
//!                       │   PageStore   │
//!                       │ (file/memory) │
//!                       └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod types;

pub mod encoding;
pub mod page;
pub mod tree;
pub mod archive;
pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use archive::{Archive, ArchiveStats, EditTransaction, ReadTransaction};
pub use config::Config;
pub use encoding::EncodingKind;
pub use error::{ArchiveError, Result};
pub use tree::{PointFilter, PointIdFilter, RangeScan, TreeScanner};
pub use types::{Key, PageId, StreamId, Value, DEFAULT_STREAM};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of tsarchive
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
