//! # Fixed-Width Binary Codec
//!
//! Helpers shared by every record that goes on the wire. The rules are
//! simple and unforgiving:
//!
//! - Integers are little-endian. `u32` takes 4 bytes, `u64` takes 8.
//! - Byte fields live in fixed slots. Shorter values are left-padded with
//!   zeros ([`fit_bytes_into_width`]); decoders strip the padding back off
//!   ([`strip_leading`]) for fields whose natural length may vary.
//! - A decoder that is handed too few or too many bytes fails with
//!   [`CodecError::InvalidLength`]. Nothing is ever silently truncated on
//!   the way in.
//!
//! Reading goes through [`bytes::Buf`] and writing through
//! [`bytes::BufMut`], so records can be encoded straight into a frame
//! buffer without intermediate copies.

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::config::{U32_LENGTH, U64_LENGTH};

/// Everything that can go wrong turning bytes back into records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("empty message envelope")]
    EmptyEnvelope,

    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("message type 0x{0:02x} is reserved")]
    ReservedMessageType(u8),

    #[error("malformed json payload: {0}")]
    Json(String),

    #[error("invalid base58 string: {0}")]
    Base58(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Width Fitting
// ---------------------------------------------------------------------------

/// Fits `data` into exactly `width` bytes.
///
/// Shorter input is left-padded with zeros. Longer input keeps its first
/// `width` bytes.
pub fn fit_bytes_into_width(data: &[u8], width: usize) -> Vec<u8> {
    if data.len() >= width {
        return data[..width].to_vec();
    }
    let mut out = vec![0u8; width - data.len()];
    out.extend_from_slice(data);
    out
}

/// Drops every leading occurrence of `byte`. All-`byte` input yields an
/// empty slice.
pub fn strip_leading(data: &[u8], byte: u8) -> &[u8] {
    let start = data.iter().position(|b| *b != byte).unwrap_or(data.len());
    &data[start..]
}

/// Concatenates byte slices into one buffer.
pub fn join_bytes(parts: &[&[u8]]) -> Vec<u8> {
    let total = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Writes `data` into a `width`-byte slot.
pub fn put_fixed<B: BufMut>(buf: &mut B, data: &[u8], width: usize) {
    if data.len() >= width {
        buf.put_slice(&data[..width]);
    } else {
        buf.put_bytes(0, width - data.len());
        buf.put_slice(data);
    }
}

/// Writes a length as a little-endian `u64`.
pub fn put_len<B: BufMut>(buf: &mut B, len: usize) {
    buf.put_u64_le(len as u64);
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Fails with [`CodecError::InvalidLength`] unless at least `n` bytes remain.
pub fn ensure_remaining<B: Buf>(buf: &B, n: usize) -> Result<(), CodecError> {
    if buf.remaining() < n {
        return Err(CodecError::InvalidLength {
            expected: n,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

/// Fails with [`CodecError::InvalidLength`] when bytes are left over after
/// a record has been fully read. `consumed` is what the record used.
pub fn ensure_exhausted<B: Buf>(buf: &B, consumed: usize) -> Result<(), CodecError> {
    if buf.has_remaining() {
        return Err(CodecError::InvalidLength {
            expected: consumed,
            actual: consumed + buf.remaining(),
        });
    }
    Ok(())
}

/// Reads a fixed-size array.
pub fn take_array<const N: usize, B: Buf>(buf: &mut B) -> Result<[u8; N], CodecError> {
    ensure_remaining(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Reads a `width`-byte slot and strips its leading zero padding.
pub fn take_stripped<B: Buf>(buf: &mut B, width: usize) -> Result<Vec<u8>, CodecError> {
    ensure_remaining(buf, width)?;
    let mut slot = vec![0u8; width];
    buf.copy_to_slice(&mut slot);
    Ok(strip_leading(&slot, 0).to_vec())
}

/// Reads exactly `n` bytes.
pub fn take_bytes<B: Buf>(buf: &mut B, n: usize) -> Result<Vec<u8>, CodecError> {
    ensure_remaining(buf, n)?;
    let mut out = vec![0u8; n];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn take_u32_le<B: Buf>(buf: &mut B) -> Result<u32, CodecError> {
    ensure_remaining(buf, U32_LENGTH)?;
    Ok(buf.get_u32_le())
}

pub fn take_u64_le<B: Buf>(buf: &mut B) -> Result<u64, CodecError> {
    ensure_remaining(buf, U64_LENGTH)?;
    Ok(buf.get_u64_le())
}

/// Reads a `u64` length field and converts it to `usize`, refusing values
/// larger than what is actually left in the buffer.
pub fn take_len<B: Buf>(buf: &mut B) -> Result<usize, CodecError> {
    let raw = take_u64_le(buf)?;
    let len = usize::try_from(raw).map_err(|_| CodecError::InvalidLength {
        expected: usize::MAX,
        actual: buf.remaining(),
    })?;
    ensure_remaining(buf, len)?;
    Ok(len)
}

/// `a * b + c` for lengths read off the wire. Overflow is reported as an
/// impossible expected length.
pub fn checked_span(count: u64, width: usize, extra: usize) -> Result<usize, CodecError> {
    usize::try_from(count)
        .ok()
        .and_then(|c| c.checked_mul(width))
        .and_then(|n| n.checked_add(extra))
        .ok_or(CodecError::InvalidLength {
            expected: usize::MAX,
            actual: 0,
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_pads_short_input_on_the_left() {
        assert_eq!(fit_bytes_into_width(&[1, 2], 4), vec![0, 0, 1, 2]);
        assert_eq!(fit_bytes_into_width(&[], 3), vec![0, 0, 0]);
    }

    #[test]
    fn fit_truncates_long_input() {
        assert_eq!(fit_bytes_into_width(&[1, 2, 3, 4, 5], 3), vec![1, 2, 3]);
        assert_eq!(fit_bytes_into_width(&[9, 9], 2), vec![9, 9]);
    }

    #[test]
    fn strip_leading_only_touches_the_prefix() {
        assert_eq!(strip_leading(&[0, 0, 1, 0, 2], 0), &[1, 0, 2]);
        assert_eq!(strip_leading(&[0, 0, 0], 0), &[] as &[u8]);
        assert_eq!(strip_leading(&[7, 7, 8], 7), &[8]);
        assert_eq!(strip_leading(&[], 0), &[] as &[u8]);
    }

    #[test]
    fn fit_then_strip_recovers_value_without_leading_zeros() {
        let value = [0xAB, 0x00, 0xCD];
        let slot = fit_bytes_into_width(&value, 64);
        assert_eq!(slot.len(), 64);
        assert_eq!(strip_leading(&slot, 0), &value);
    }

    #[test]
    fn put_fixed_matches_fit_bytes() {
        let mut buf = Vec::new();
        put_fixed(&mut buf, &[5, 6], 5);
        assert_eq!(buf, fit_bytes_into_width(&[5, 6], 5));
    }

    #[test]
    fn integers_are_little_endian() {
        let mut buf = Vec::new();
        buf.put_u32_le(0x0102_0304);
        buf.put_u64_le(1);
        assert_eq!(&buf[..4], &[4, 3, 2, 1]);
        assert_eq!(&buf[4..], &[1, 0, 0, 0, 0, 0, 0, 0]);

        let mut rd = &buf[..];
        assert_eq!(take_u32_le(&mut rd).unwrap(), 0x0102_0304);
        assert_eq!(take_u64_le(&mut rd).unwrap(), 1);
    }

    #[test]
    fn short_buffer_reports_invalid_length() {
        let mut rd: &[u8] = &[1, 2, 3];
        let err = take_u64_le(&mut rd).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidLength {
                expected: 8,
                actual: 3
            }
        );
    }

    #[test]
    fn leftover_bytes_report_invalid_length() {
        let rd: &[u8] = &[0, 0];
        assert_eq!(
            ensure_exhausted(&rd, 10).unwrap_err(),
            CodecError::InvalidLength {
                expected: 10,
                actual: 12
            }
        );
        let empty: &[u8] = &[];
        assert!(ensure_exhausted(&empty, 10).is_ok());
    }

    #[test]
    fn take_len_refuses_lengths_past_the_buffer() {
        let mut buf = Vec::new();
        put_len(&mut buf, 100);
        buf.extend_from_slice(&[0u8; 10]);
        let mut rd = &buf[..];
        assert!(matches!(
            take_len(&mut rd),
            Err(CodecError::InvalidLength { expected: 100, actual: 10 })
        ));
    }

    #[test]
    fn checked_span_catches_overflow() {
        assert_eq!(checked_span(2, 48, 340).unwrap(), 436);
        assert!(checked_span(u64::MAX, 48, 0).is_err());
    }

    #[test]
    fn join_bytes_concatenates_in_order() {
        assert_eq!(join_bytes(&[&[1], &[], &[2, 3]]), vec![1, 2, 3]);
    }
}
