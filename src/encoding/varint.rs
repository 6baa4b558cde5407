//! Base-128 variable-length integers
//!
//! The low 7 bits of each byte carry value bits, least significant group
//! first, and the high bit marks that another byte follows. The ninth byte,
//! when reached, carries the remaining 8 bits whole, so a `u64` never needs
//! more than [`MAX_VARINT_LEN`] bytes and no tenth byte is ever read.

use crate::error::{ArchiveError, Result};

/// Longest encoding of a `u64`
pub const MAX_VARINT_LEN: usize = 9;

const CONTINUATION: u8 = 0x80;

/// Number of bytes `encode_varint` emits for `value`
pub fn varint_len(value: u64) -> usize {
    for groups in 1..MAX_VARINT_LEN {
        if value < 1u64 << (7 * groups) {
            return groups;
        }
    }
    MAX_VARINT_LEN
}

/// Append the minimal encoding of `value` to `out`
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    for _ in 0..MAX_VARINT_LEN - 1 {
        if value < u64::from(CONTINUATION) {
            out.push(value as u8);
            return;
        }
        out.push((value as u8) | CONTINUATION);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Decode one value from the front of `input`, returning it with the number
/// of bytes consumed.
pub fn decode_varint(input: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for index in 0..MAX_VARINT_LEN - 1 {
        let byte = byte_at(input, index)?;
        value |= u64::from(byte & !CONTINUATION) << (7 * index);
        if byte & CONTINUATION == 0 {
            return Ok((value, index + 1));
        }
    }
    let last = byte_at(input, MAX_VARINT_LEN - 1)?;
    value |= u64::from(last) << 56;
    Ok((value, MAX_VARINT_LEN))
}

fn byte_at(input: &[u8], index: usize) -> Result<u8> {
    input.get(index).copied().ok_or_else(|| {
        ArchiveError::CorruptStream(format!(
            "varint truncated after {} of at most {} bytes",
            index, MAX_VARINT_LEN
        ))
    })
}
