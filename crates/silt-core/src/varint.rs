//! Order-preserving varint encoding.
//!
//! Chunk-pointer keys embed a file offset and are enumerated with an
//! ordered cursor, so the encoded form must sort byte-lexicographically in
//! the same order as the numeric values. Plain LEB128 varints do not have
//! that property; this encoding does: a single length byte `n` (0..=8)
//! followed by the `n` minimal big-endian bytes of the value. Larger values
//! need more bytes and therefore sort after shorter encodings, and equal
//! lengths compare big-endian, which equals numeric order.
//!
//! Zero encodes as the single byte `0x00`.

use thiserror::Error;

/// Largest encoded size in bytes (length byte + 8 payload bytes).
pub const MAX_VARINT_LEN: usize = 9;

/// Errors from decoding an order-preserving varint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VarintError {
    /// The input slice was empty or shorter than the announced length.
    #[error("truncated varint: need {expected} bytes, have {available}")]
    Truncated {
        /// Bytes required by the length byte.
        expected: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The length byte announced more than 8 payload bytes.
    #[error("invalid varint length byte: {0}")]
    InvalidLength(u8),

    /// The payload carried a leading zero byte, so the encoding is not minimal.
    #[error("non-minimal varint encoding")]
    NonMinimal,
}

/// Appends the order-preserving encoding of `v` to `buf`.
pub fn write_uvarint(buf: &mut Vec<u8>, v: u64) {
    if v == 0 {
        buf.push(0);
        return;
    }
    let be = v.to_be_bytes();
    let skip = (v.leading_zeros() / 8) as usize;
    let len = 8 - skip;
    buf.push(len as u8);
    buf.extend_from_slice(&be[skip..]);
}

/// Decodes an order-preserving varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn read_uvarint(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let len = *buf.first().ok_or(VarintError::Truncated {
        expected: 1,
        available: 0,
    })? as usize;
    if len > 8 {
        return Err(VarintError::InvalidLength(len as u8));
    }
    if buf.len() < 1 + len {
        return Err(VarintError::Truncated {
            expected: 1 + len,
            available: buf.len(),
        });
    }
    if len == 0 {
        return Ok((0, 1));
    }
    let payload = &buf[1..1 + len];
    if payload[0] == 0 {
        return Err(VarintError::NonMinimal);
    }
    let mut v = 0u64;
    for b in payload {
        v = (v << 8) | u64::from(*b);
    }
    Ok((v, 1 + len))
}

/// Returns the encoding of `v` as an owned buffer.
pub fn uvarint_vec(v: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    write_uvarint(&mut buf, v);
    buf
}
