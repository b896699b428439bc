//! Variable-length signed integer encoding.
//!
//! A signed 64-bit value is zigzag-mapped to an unsigned value, then emitted
//! in little-endian base-128 groups with a continuation bit in the most
//! significant bit of each byte. Small magnitudes of either sign use few
//! bytes.

/// Maximum encoded size of any 64-bit varint.
pub const MAX_VARINT_SIZE: usize = 10;

#[inline]
fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Returns the exact number of bytes `encode` will emit for `v`.
///
/// Write buffers can be sized up front from this.
pub fn varint_size(v: i64) -> usize {
    let mut u = zigzag(v);
    let mut size = 1;
    while u >= 0x80 {
        u >>= 7;
        size += 1;
    }
    size
}

/// Encodes `v` into `dst`, returning the number of bytes written.
///
/// `dst` must hold at least [`varint_size`]`(v)` bytes; [`MAX_VARINT_SIZE`]
/// always suffices.
pub fn encode(v: i64, dst: &mut [u8]) -> usize {
    let mut u = zigzag(v);
    let mut of = 0;
    while u >= 0x80 {
        dst[of] = (u as u8 & 0x7f) | 0x80;
        u >>= 7;
        of += 1;
    }
    dst[of] = u as u8;
    of + 1
}

/// Decodes a varint from the start of `src`.
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// terminating byte (continuation bit clear) was not found within `src`.
pub fn decode(src: &[u8]) -> Option<(i64, usize)> {
    let mut u: u64 = 0;
    for (i, &b) in src.iter().take(MAX_VARINT_SIZE).enumerate() {
        u |= ((b & 0x7f) as u64) << (i * 7);
        if b & 0x80 == 0 {
            return Some((unzigzag(u), i + 1));
        }
    }
    None
}
