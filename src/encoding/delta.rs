//! Delta strategy: each field stored as a varint difference from the
//! previous item on the page.
//!
//! Keys use wrapping subtraction, so ascending keys give small deltas while
//! any input still round-trips. The point id is delta-coded only when the
//! timestamp repeats; otherwise it is stored whole. Values have no ordering,
//! so their "difference" is the XOR of the bit patterns.

use super::{take_varint, encode_varint, Codec, EncodingKind, MAX_VARINT_LEN};
use crate::error::Result;
use crate::types::{Key, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaCodec;

impl Codec<Key> for DeltaCodec {
    fn kind(&self) -> EncodingKind {
        EncodingKind::Delta
    }

    fn max_encoded_len(&self) -> usize {
        2 * MAX_VARINT_LEN
    }

    fn encode(&self, prev: Option<&Key>, item: &Key, out: &mut Vec<u8>) {
        let prev = prev.copied().unwrap_or_default();
        let ts_delta = item.timestamp.wrapping_sub(prev.timestamp);
        encode_varint(ts_delta, out);
        if ts_delta == 0 {
            encode_varint(item.point_id.wrapping_sub(prev.point_id), out);
        } else {
            encode_varint(item.point_id, out);
        }
    }

    fn decode(&self, prev: Option<&Key>, input: &[u8]) -> Result<(Key, usize)> {
        let prev = prev.copied().unwrap_or_default();
        let mut pos = 0;
        let ts_delta = take_varint(input, &mut pos)?;
        let point = take_varint(input, &mut pos)?;
        let key = if ts_delta == 0 {
            Key::new(prev.timestamp, prev.point_id.wrapping_add(point))
        } else {
            Key::new(prev.timestamp.wrapping_add(ts_delta), point)
        };
        Ok((key, pos))
    }
}

impl Codec<Value> for DeltaCodec {
    fn kind(&self) -> EncodingKind {
        EncodingKind::Delta
    }

    fn max_encoded_len(&self) -> usize {
        2 * MAX_VARINT_LEN
    }

    fn encode(&self, prev: Option<&Value>, item: &Value, out: &mut Vec<u8>) {
        let prev = prev.copied().unwrap_or_default();
        encode_varint(item.value ^ prev.value, out);
        encode_varint(item.flags ^ prev.flags, out);
    }

    fn decode(&self, prev: Option<&Value>, input: &[u8]) -> Result<(Value, usize)> {
        let prev = prev.copied().unwrap_or_default();
        let mut pos = 0;
        let value = take_varint(input, &mut pos)? ^ prev.value;
        let flags = take_varint(input, &mut pos)? ^ prev.flags;
        Ok((Value::new(value, flags), pos))
    }
}
