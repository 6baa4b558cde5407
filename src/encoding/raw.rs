//! Raw strategy: every field copied as 8 little-endian bytes.

use super::{read_u64_le, Codec, EncodingKind};
use crate::error::Result;
use crate::types::{Key, Value};

const ITEM_LEN: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec<Key> for RawCodec {
    fn kind(&self) -> EncodingKind {
        EncodingKind::Raw
    }

    fn max_encoded_len(&self) -> usize {
        ITEM_LEN
    }

    fn encode(&self, _prev: Option<&Key>, item: &Key, out: &mut Vec<u8>) {
        out.extend_from_slice(&item.timestamp.to_le_bytes());
        out.extend_from_slice(&item.point_id.to_le_bytes());
    }

    fn decode(&self, _prev: Option<&Key>, input: &[u8]) -> Result<(Key, usize)> {
        let key = Key {
            timestamp: read_u64_le(input, 0)?,
            point_id: read_u64_le(input, 8)?,
        };
        Ok((key, ITEM_LEN))
    }
}

impl Codec<Value> for RawCodec {
    fn kind(&self) -> EncodingKind {
        EncodingKind::Raw
    }

    fn max_encoded_len(&self) -> usize {
        ITEM_LEN
    }

    fn encode(&self, _prev: Option<&Value>, item: &Value, out: &mut Vec<u8>) {
        out.extend_from_slice(&item.value.to_le_bytes());
        out.extend_from_slice(&item.flags.to_le_bytes());
    }

    fn decode(&self, _prev: Option<&Value>, input: &[u8]) -> Result<(Value, usize)> {
        let value = Value {
            value: read_u64_le(input, 0)?,
            flags: read_u64_le(input, 8)?,
        };
        Ok((value, ITEM_LEN))
    }
}
