//! Time-series strategy.
//!
//! Historian data arrives as frames: many point ids sharing one timestamp,
//! usually in sequential id order, with quality flags that rarely change.
//! A leading control byte records which fields follow the cheap patterns so
//! only the surprising fields are written.
//!
//! ```text
//! key:   [ctrl][ts delta varint]?[point varint]?
//! value: [ctrl][shift u8]?[value xor varint]?[flags varint]?
//! ```

use super::{read_u8, take_varint, encode_varint, Codec, EncodingKind, MAX_VARINT_LEN};
use crate::error::{ArchiveError, Result};
use crate::types::{Key, Value};

// Key control bits
const TS_SAME: u8 = 0x01;
const POINT_NEXT: u8 = 0x02;
const POINT_SAME: u8 = 0x04;
const POINT_DELTA: u8 = 0x08;
const KEY_MASK: u8 = TS_SAME | POINT_NEXT | POINT_SAME | POINT_DELTA;

// Value control bits
const VALUE_SAME: u8 = 0x01;
const VALUE_SHIFTED: u8 = 0x02;
const FLAGS_SAME: u8 = 0x04;
const FLAGS_ZERO: u8 = 0x08;
const VALUE_MASK: u8 = VALUE_SAME | VALUE_SHIFTED | FLAGS_SAME | FLAGS_ZERO;

/// XORs with at least this many trailing zeros are stored shifted
const MIN_SHIFT: u32 = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSeriesCodec;

impl Codec<Key> for TimeSeriesCodec {
    fn kind(&self) -> EncodingKind {
        EncodingKind::TimeSeries
    }

    fn max_encoded_len(&self) -> usize {
        1 + 2 * MAX_VARINT_LEN
    }

    fn encode(&self, prev: Option<&Key>, item: &Key, out: &mut Vec<u8>) {
        let prev = prev.copied().unwrap_or_default();
        let ctrl_at = out.len();
        out.push(0);
        let mut ctrl = 0u8;

        if item.timestamp == prev.timestamp {
            ctrl |= TS_SAME;
        } else {
            encode_varint(item.timestamp.wrapping_sub(prev.timestamp), out);
        }

        if item.point_id == prev.point_id.wrapping_add(1) {
            ctrl |= POINT_NEXT;
        } else if item.point_id == prev.point_id {
            ctrl |= POINT_SAME;
        } else if ctrl & TS_SAME != 0 {
            ctrl |= POINT_DELTA;
            encode_varint(item.point_id.wrapping_sub(prev.point_id), out);
        } else {
            encode_varint(item.point_id, out);
        }

        out[ctrl_at] = ctrl;
    }

    fn decode(&self, prev: Option<&Key>, input: &[u8]) -> Result<(Key, usize)> {
        let prev = prev.copied().unwrap_or_default();
        let ctrl = read_u8(input, 0)?;
        if ctrl & !KEY_MASK != 0 {
            return Err(ArchiveError::CorruptStream(format!(
                "invalid key control byte 0x{:02x}",
                ctrl
            )));
        }
        let mut pos = 1;

        let timestamp = if ctrl & TS_SAME != 0 {
            prev.timestamp
        } else {
            prev.timestamp.wrapping_add(take_varint(input, &mut pos)?)
        };

        let point_id = if ctrl & POINT_NEXT != 0 {
            prev.point_id.wrapping_add(1)
        } else if ctrl & POINT_SAME != 0 {
            prev.point_id
        } else if ctrl & POINT_DELTA != 0 {
            prev.point_id.wrapping_add(take_varint(input, &mut pos)?)
        } else {
            take_varint(input, &mut pos)?
        };

        Ok((Key::new(timestamp, point_id), pos))
    }
}

impl Codec<Value> for TimeSeriesCodec {
    fn kind(&self) -> EncodingKind {
        EncodingKind::TimeSeries
    }

    fn max_encoded_len(&self) -> usize {
        2 + 2 * MAX_VARINT_LEN
    }

    fn encode(&self, prev: Option<&Value>, item: &Value, out: &mut Vec<u8>) {
        let prev = prev.copied().unwrap_or_default();
        let ctrl_at = out.len();
        out.push(0);
        let mut ctrl = 0u8;

        let xor = item.value ^ prev.value;
        if xor == 0 {
            ctrl |= VALUE_SAME;
        } else if xor.trailing_zeros() >= MIN_SHIFT {
            // Exponent-only changes (e.g. whole numbers stored as floats)
            // leave the low mantissa bits untouched.
            let shift = xor.trailing_zeros();
            ctrl |= VALUE_SHIFTED;
            out.push(shift as u8);
            encode_varint(xor >> shift, out);
        } else {
            encode_varint(xor, out);
        }

        if item.flags == prev.flags {
            ctrl |= FLAGS_SAME;
        } else if item.flags == 0 {
            ctrl |= FLAGS_ZERO;
        } else {
            encode_varint(item.flags, out);
        }

        out[ctrl_at] = ctrl;
    }

    fn decode(&self, prev: Option<&Value>, input: &[u8]) -> Result<(Value, usize)> {
        let prev = prev.copied().unwrap_or_default();
        let ctrl = read_u8(input, 0)?;
        if ctrl & !VALUE_MASK != 0 {
            return Err(ArchiveError::CorruptStream(format!(
                "invalid value control byte 0x{:02x}",
                ctrl
            )));
        }
        let mut pos = 1;

        let value = if ctrl & VALUE_SAME != 0 {
            prev.value
        } else if ctrl & VALUE_SHIFTED != 0 {
            let shift = u32::from(read_u8(input, pos)?);
            pos += 1;
            if shift >= 64 {
                return Err(ArchiveError::CorruptStream(format!("invalid shift {}", shift)));
            }
            prev.value ^ (take_varint(input, &mut pos)? << shift)
        } else {
            prev.value ^ take_varint(input, &mut pos)?
        };

        let flags = if ctrl & FLAGS_SAME != 0 {
            prev.flags
        } else if ctrl & FLAGS_ZERO != 0 {
            0
        } else {
            take_varint(input, &mut pos)?
        };

        Ok((Value::new(value, flags), pos))
    }
}
