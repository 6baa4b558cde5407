//! Core data types
//!
//! Fixed-width keys and values stored in every sorted tree.

use serde::{Deserialize, Serialize};

/// Composite key ordered by `(timestamp, point_id)` ascending.
///
/// Field order matters: the derived `Ord` compares `timestamp` first and
/// breaks ties on `point_id`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Key {
    pub timestamp: u64,
    pub point_id: u64,
}

impl Key {
    /// Smallest possible key
    pub const MIN: Key = Key { timestamp: 0, point_id: 0 };

    /// Largest possible key
    pub const MAX: Key = Key { timestamp: u64::MAX, point_id: u64::MAX };

    pub const fn new(timestamp: u64, point_id: u64) -> Self {
        Self { timestamp, point_id }
    }

    /// Exclusive scan bound ending before `timestamp`; `u64::MAX` means
    /// "no end" and maps to `Key::MAX`
    pub const fn end_before(timestamp: u64) -> Self {
        if timestamp == u64::MAX {
            Self::MAX
        } else {
            Self::new(timestamp, 0)
        }
    }
}

/// Payload attached to a key: a 64-bit measurement plus a quality word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value {
    /// Raw 64 bits; see `as_f64` / `from_f64` for the floating-point view
    pub value: u64,
    pub flags: u64,
}

impl Value {
    pub const fn new(value: u64, flags: u64) -> Self {
        Self { value, flags }
    }

    /// Build a value from a floating-point measurement
    pub fn from_f64(value: f64, flags: u64) -> Self {
        Self { value: value.to_bits(), flags }
    }

    /// Reinterpret the payload as a float
    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.value)
    }
}

/// Logical stream identifier within one archive
pub type StreamId = u32;

/// Stream used by callers that only need one sorted tree
pub const DEFAULT_STREAM: StreamId = 0;

/// Position of a page within the backing file
pub type PageId = u64;
