//! Base-128 varints
//!
//! Little-endian groups of 7 data bits, most significant bit set on every
//! byte except the last. Values are limited to 32 bits, so a valid varint is
//! at most five bytes long and the fifth byte may only carry the top 4 bits.

use bytes::BufMut;
use thiserror::Error;

/// Longest encoding of a 32-bit value
pub const MAX_VARINT_LEN: usize = 5;

/// Varint decoding failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarintError {
    /// The buffer ended before the terminating byte; wait for more input
    #[error("incomplete varint")]
    Incomplete,

    /// The encoding does not fit in 32 bits; the stream is corrupt
    #[error("varint exceeds 32 bits")]
    Overflow,
}

/// Append the minimal encoding of `value` to `buf`
pub fn encode_varint(mut value: u32, buf: &mut impl BufMut) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Number of bytes [`encode_varint`] writes for `value`
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Decode a varint from the front of `buf`
///
/// Returns the value and the number of bytes consumed. Never reads past the
/// end of `buf`.
pub fn decode_varint(buf: &[u8]) -> Result<(u32, usize), VarintError> {
    let mut value: u32 = 0;

    for (index, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        if index == MAX_VARINT_LEN - 1 && byte > 0x0F {
            // Continuation bit or data bits above bit 31
            return Err(VarintError::Overflow);
        }

        value |= u32::from(byte & 0x7F) << (7 * index);

        if byte & 0x80 == 0 {
            return Ok((value, index + 1));
        }
    }

    Err(VarintError::Incomplete)
}
