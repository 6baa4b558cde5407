//! Protocol Module
//!
//! Wire format for remote queries against a published version.
//!
//! ## Request Format
//! ```text
//! ┌────────┬─────────────┬───────────────────────────────────────────┐
//! │ Op (1) │ Stream (4)  │ Op-specific fields                        │
//! └────────┴─────────────┴───────────────────────────────────────────┘
//! ```
//!
//! ### Operations
//! - 0x01: SCAN - start key, end key, point count (varint), point ids (varint)
//! - 0x02: PING - no stream, no fields
//! - 0x03: GET  - key
//!
//! Keys are two varints (timestamp, point id); values are two varints
//! (value, flags).
//!
//! ## Response Format
//! A sequence of records closed by a terminator, or a single error:
//! ```text
//! [0x01][key][value]  [0x01][key][value]  ...  [0x00]
//! [0xFF][len varint][utf-8 message]
//! ```
//! PING is answered with a bare terminator.

mod codec;
mod request;

pub use codec::{read_request, read_response, write_request, write_response};
pub use request::{Request, RequestType, Response};

/// Marks a `(key, value)` record in a response
pub const RECORD: u8 = 0x01;

/// Ends a response
pub const END: u8 = 0x00;

/// Starts an error response
pub const ERROR: u8 = 0xFF;

/// Largest point allow-list a scan request may carry
pub const MAX_FILTER_POINTS: u64 = 1 << 20;

/// Largest error message accepted from a peer
pub const MAX_MESSAGE_LEN: u64 = 64 * 1024;
