//! Unsigned LEB128 varints used for every length prefix in a record.

use crate::error::{CodecError, CodecResult};
use bytes::BufMut;

/// Maximum encoded size of a `u64` varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends `value` as an unsigned LEB128 varint.
pub fn write_varint<B: BufMut>(buf: &mut B, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Returns the number of bytes [`write_varint`] emits for `value`.
#[must_use]
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Reads a varint from the start of `data`.
///
/// Returns the value and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if `data` ends mid-varint and
/// [`CodecError::VarintOverflow`] if the varint does not fit a `u64`.
pub fn read_varint(data: &[u8]) -> CodecResult<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        let low = u64::from(byte & 0x7F);
        if i == MAX_VARINT_LEN - 1 && low > 1 {
            return Err(CodecError::VarintOverflow);
        }
        value |= low << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    if data.len() >= MAX_VARINT_LEN {
        Err(CodecError::VarintOverflow)
    } else {
        Err(CodecError::Truncated {
            needed: data.len() + 1,
            available: data.len(),
        })
    }
}
