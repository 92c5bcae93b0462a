//! HPACK prefix integer codec (RFC 7541 Section 5.1).
//!
//! An integer occupies the low `prefix_bits` of a first byte whose high bits
//! carry a representation pattern. Values that do not fit in the prefix spill
//! into base-128 continuation bytes, least significant group first.

use crate::error::HpackError;

/// Continuation bytes allowed after the prefix byte. Four groups of seven bits
/// plus an 8-bit prefix keeps every decoded value inside a `u32`.
pub const MAX_CONTINUATION_BYTES: usize = 4;

/// Append `value` encoded with an N-bit prefix. `pattern` supplies the bits
/// above the prefix and must have its low `prefix_bits` clear.
pub fn encode(buf: &mut Vec<u8>, value: u32, prefix_bits: u8, pattern: u8) {
    debug_assert!((1..=8).contains(&prefix_bits));
    let max = (1u32 << prefix_bits) - 1;
    if value < max {
        buf.push(pattern | value as u8);
        return;
    }
    buf.push(pattern | max as u8);
    let mut remaining = value - max;
    while remaining >= 0x80 {
        buf.push(0x80 | (remaining & 0x7f) as u8);
        remaining >>= 7;
    }
    buf.push(remaining as u8);
}

/// Decode an N-bit prefix integer from the start of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode(buf: &[u8], prefix_bits: u8) -> Result<(u32, usize), HpackError> {
    debug_assert!((1..=8).contains(&prefix_bits));
    let first = *buf.first().ok_or(HpackError::TruncatedInteger)?;
    let max = (1u32 << prefix_bits) - 1;
    let prefix = u32::from(first) & max;
    if prefix < max {
        return Ok((prefix, 1));
    }

    let mut value = max;
    for i in 0..MAX_CONTINUATION_BYTES {
        let b = *buf.get(i + 1).ok_or(HpackError::TruncatedInteger)?;
        value += u32::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((value, i + 2));
        }
    }
    Err(HpackError::IntegerOverflow)
}
