//! Encoding Module
//!
//! Pluggable serialization of keys and values inside tree pages.
//!
//! ## Responsibilities
//! - Encode/decode one key or value at a time, optionally relative to the
//!   previous item on the same page
//! - Report the encoded length so the tree can step past an item
//! - Stay deterministic: `decode(encode(x)) == x` for every representable item
//!
//! ## Strategies
//! ```text
//! ┌────────────┬───────────────────────────────────────────────┐
//! │ Raw        │ fixed 16 bytes, little-endian                 │
//! │ Delta      │ varint of the difference from the previous    │
//! │ TimeSeries │ control byte + varints, exploits repeats and  │
//! │            │ sequential point ids within a timestamp       │
//! └────────────┴───────────────────────────────────────────────┘
//! ```

mod delta;
mod raw;
mod timeseries;
mod varint;

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};
use crate::types::{Key, Value};

pub use delta::DeltaCodec;
pub use raw::RawCodec;
pub use timeseries::TimeSeriesCodec;
pub use varint::{decode_varint, encode_varint, varint_len, MAX_VARINT_LEN};

/// Identifies the strategy a stream was written with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncodingKind {
    Raw = 0,
    Delta = 1,
    TimeSeries = 2,
}

impl EncodingKind {
    pub const ALL: [EncodingKind; 3] =
        [EncodingKind::Raw, EncodingKind::Delta, EncodingKind::TimeSeries];

    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(EncodingKind::Raw),
            1 => Ok(EncodingKind::Delta),
            2 => Ok(EncodingKind::TimeSeries),
            other => Err(ArchiveError::Corruption(format!(
                "unknown encoding tag 0x{:02x}",
                other
            ))),
        }
    }

    /// Codec used for keys under this strategy
    pub fn key_codec(self) -> &'static dyn Codec<Key> {
        match self {
            EncodingKind::Raw => &RawCodec,
            EncodingKind::Delta => &DeltaCodec,
            EncodingKind::TimeSeries => &TimeSeriesCodec,
        }
    }

    /// Codec used for values under this strategy
    pub fn value_codec(self) -> &'static dyn Codec<Value> {
        match self {
            EncodingKind::Raw => &RawCodec,
            EncodingKind::Delta => &DeltaCodec,
            EncodingKind::TimeSeries => &TimeSeriesCodec,
        }
    }
}

impl std::str::FromStr for EncodingKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(EncodingKind::Raw),
            "delta" => Ok(EncodingKind::Delta),
            "timeseries" | "ts" => Ok(EncodingKind::TimeSeries),
            other => Err(ArchiveError::Config(format!("unknown encoding '{}'", other))),
        }
    }
}

/// A serialization strategy for one item type.
///
/// `prev` is the item encoded immediately before on the same page, or `None`
/// for the first item of a page. Decoders must be given the same `prev` the
/// encoder saw.
pub trait Codec<T>: Send + Sync {
    fn kind(&self) -> EncodingKind;

    /// Upper bound on the bytes one item can occupy
    fn max_encoded_len(&self) -> usize;

    fn encode(&self, prev: Option<&T>, item: &T, out: &mut Vec<u8>);

    /// Decode one item from the front of `input`; returns it and the bytes consumed
    fn decode(&self, prev: Option<&T>, input: &[u8]) -> Result<(T, usize)>;
}

// =============================================================================
// Little-endian helpers shared by the codecs and page formats
// =============================================================================

pub(crate) fn read_u64_le(input: &[u8], at: usize) -> Result<u64> {
    let bytes = input
        .get(at..at + 8)
        .ok_or_else(|| ArchiveError::CorruptStream(format!("expected 8 bytes at offset {}", at)))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_u32_le(input: &[u8], at: usize) -> Result<u32> {
    let bytes = input
        .get(at..at + 4)
        .ok_or_else(|| ArchiveError::CorruptStream(format!("expected 4 bytes at offset {}", at)))?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u8(input: &[u8], at: usize) -> Result<u8> {
    input
        .get(at)
        .copied()
        .ok_or_else(|| ArchiveError::CorruptStream(format!("expected a byte at offset {}", at)))
}

/// Read a varint starting at `*pos` and advance past it
pub(crate) fn take_varint(input: &[u8], pos: &mut usize) -> Result<u64> {
    let rest = input.get(*pos..).unwrap_or(&[]);
    let (value, used) = decode_varint(rest)?;
    *pos += used;
    Ok(value)
}
