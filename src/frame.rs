//! Wire format for message units.
//!
//! One unit on the wire is a decimal length line followed by exactly
//! that many payload bytes:
//!
//! ```text
//! <length>\r\n<payload>
//!
//! Example:
//! 5\r\nhello
//! ```
//!
//! The empty unit is `0\r\n`. The length line is unsigned ASCII decimal
//! with no sign and at most 20 digits (a 64-bit value); anything else
//! is rejected. The format is symmetric: both sides encode and decode
//! the same way.
//!
//! The decoder is incremental. Any prefix of a valid stream decodes to
//! "not yet complete" rather than an error, so units are reassembled
//! correctly no matter how the transport fragments the bytes.

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;

/// Longest valid length line: 20 decimal digits plus CRLF.
const MAX_HEADER_LEN: usize = 22;

/// Frame decoding errors. Connection-fatal; never used for a peer that
/// simply went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Length line is not unsigned ASCII decimal.
    InvalidLength,
    /// Declared payload length exceeds the configured limit.
    TooLarge { length: usize, limit: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::InvalidLength => write!(f, "invalid length line"),
            FrameError::TooLarge { length, limit } => {
                write!(f, "payload of {} bytes exceeds limit of {}", length, limit)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Append the framing header for a payload of `len` bytes.
pub fn encode_header(len: usize, buf: &mut BytesMut) {
    buf.extend_from_slice(len.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Try to decode one complete unit from the front of `buffer`.
///
/// Returns `Ok(None)` when more bytes are needed. On success both the
/// header and the payload have been consumed from the buffer.
pub fn decode(buffer: &mut BytesMut, limit: usize) -> Result<Option<Bytes>, FrameError> {
    let line_end = match find_crlf(buffer) {
        Some(pos) => pos,
        None => {
            // A length line longer than any 64-bit decimal cannot
            // become valid with more input.
            if buffer.len() > MAX_HEADER_LEN {
                return Err(FrameError::InvalidLength);
            }
            return Ok(None);
        }
    };

    let length = parse_length(&buffer[..line_end])?;
    if length > limit {
        return Err(FrameError::TooLarge { length, limit });
    }

    let header_len = line_end + 2;
    let total = header_len + length;
    if buffer.len() < total {
        buffer.reserve(total - buffer.len());
        return Ok(None);
    }

    buffer.advance(header_len);
    Ok(Some(buffer.split_to(length).freeze()))
}

fn parse_length(line: &[u8]) -> Result<usize, FrameError> {
    let s = std::str::from_utf8(line).map_err(|_| FrameError::InvalidLength)?;
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::InvalidLength);
    }
    // parse() also rejects values that overflow usize
    s.parse().map_err(|_| FrameError::InvalidLength)
}

/// Find \r\n in the header region, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    let window = buffer.len().min(MAX_HEADER_LEN + 1);
    (0..window.saturating_sub(1)).find(|&i| buffer[i] == b'\r' && buffer[i + 1] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(bytes: &[u8]) -> BytesMut {
        BytesMut::from(bytes)
    }

    #[test]
    fn test_decode_complete_unit() {
        let mut buffer = buf(b"5\r\nhello");
        let unit = decode(&mut buffer, 1024).unwrap().unwrap();
        assert_eq!(unit.as_ref(), b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_empty_unit() {
        let mut buffer = buf(b"0\r\n");
        let unit = decode(&mut buffer, 1024).unwrap().unwrap();
        assert!(unit.is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_incomplete_header() {
        let mut buffer = buf(b"12");
        assert!(decode(&mut buffer, 1024).unwrap().is_none());
        assert_eq!(buffer.as_ref(), b"12");
    }

    #[test]
    fn test_incomplete_payload() {
        let mut buffer = buf(b"5\r\nhel");
        assert!(decode(&mut buffer, 1024).unwrap().is_none());
        // Nothing consumed until the whole unit is available.
        assert_eq!(buffer.as_ref(), b"5\r\nhel");
    }

    #[test]
    fn test_invalid_length_lines() {
        for bad in [
            &b"abc\r\n"[..],
            &b"\r\n"[..],
            &b"-5\r\n"[..],
            &b"+5\r\n"[..],
            &b"5 \r\n"[..],
        ] {
            let mut buffer = buf(bad);
            assert_eq!(
                decode(&mut buffer, 1024).unwrap_err(),
                FrameError::InvalidLength,
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn test_header_overflow_without_crlf() {
        let mut buffer = buf(b"99999999999999999999999999");
        assert_eq!(
            decode(&mut buffer, usize::MAX).unwrap_err(),
            FrameError::InvalidLength
        );
    }

    #[test]
    fn test_too_large() {
        let mut buffer = buf(b"2048\r\n");
        assert_eq!(
            decode(&mut buffer, 1024).unwrap_err(),
            FrameError::TooLarge {
                length: 2048,
                limit: 1024
            }
        );
    }

    #[test]
    fn test_back_to_back_units() {
        let mut buffer = buf(b"2\r\nab3\r\ncde");
        assert_eq!(decode(&mut buffer, 1024).unwrap().unwrap().as_ref(), b"ab");
        assert_eq!(decode(&mut buffer, 1024).unwrap().unwrap().as_ref(), b"cde");
        assert!(decode(&mut buffer, 1024).unwrap().is_none());
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let stream = b"5\r\nhello0\r\n3\r\nabc";
        let mut buffer = BytesMut::new();
        let mut units = Vec::new();

        for &byte in stream.iter() {
            buffer.extend_from_slice(&[byte]);
            while let Some(unit) = decode(&mut buffer, 1024).unwrap() {
                units.push(unit);
            }
        }

        let expected: Vec<&[u8]> = vec![b"hello", b"", b"abc"];
        assert_eq!(units, expected);
    }

    #[test]
    fn test_encode_header() {
        let mut buffer = BytesMut::new();
        encode_header(12345, &mut buffer);
        assert_eq!(buffer.as_ref(), b"12345\r\n");

        let mut buffer = BytesMut::new();
        encode_header(0, &mut buffer);
        assert_eq!(buffer.as_ref(), b"0\r\n");
    }

    #[test]
    fn test_encode_decode_symmetry() {
        let mut buffer = BytesMut::new();
        encode_header(5, &mut buffer);
        buffer.extend_from_slice(b"hello");
        assert_eq!(decode(&mut buffer, 1024).unwrap().unwrap().as_ref(), b"hello");
    }
}
