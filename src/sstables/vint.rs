//! STRATA - Variable-Length Integer Codec
//! Prefix-length varints: the number of leading set bits in the first
//! byte is the number of extra bytes that follow.
//!
//! ## Binary Format
//! ```text
//! 0xxxxxxx                          -> 7 bits,  1 byte
//! 10xxxxxx xxxxxxxx                 -> 14 bits, 2 bytes
//! 110xxxxx xxxxxxxx xxxxxxxx        -> 21 bits, 3 bytes
//! ...
//! 11111111 [8 bytes big-endian]     -> 64 bits, 9 bytes
//! ```
//! Signed values are zig-zag encoded before being written.

use bytes::{Buf, BufMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, StrataError};

/// Largest encoded size of a varint.
pub const MAX_VINT_SIZE: usize = 9;

/// Number of bytes `value` occupies once encoded.
pub fn unsigned_vint_size(value: u64) -> usize {
    let magnitude = (value | 1).leading_zeros() as usize;
    (639 - magnitude * 9) >> 6
}

/// Number of bytes the signed `value` occupies once encoded.
pub fn signed_vint_size(value: i64) -> usize {
    unsigned_vint_size(zigzag_encode(value))
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Leading-ones prefix announcing `extra` following bytes.
fn extra_bytes_prefix(extra: usize) -> u8 {
    (0xff00u16 >> extra) as u8
}

/// Mask selecting the value bits left in the first byte.
fn first_byte_value_mask(extra: usize) -> u8 {
    (0x00ffu16 >> extra) as u8
}

/// Encode `value` into `buf`, returning the number of bytes written.
pub fn encode_unsigned<B: BufMut>(value: u64, buf: &mut B) -> usize {
    let size = unsigned_vint_size(value);
    if size == 1 {
        buf.put_u8(value as u8);
        return 1;
    }

    let mut scratch = [0u8; MAX_VINT_SIZE];
    scratch[1..].copy_from_slice(&value.to_be_bytes());
    let encoded = &mut scratch[MAX_VINT_SIZE - size..];
    encoded[0] |= extra_bytes_prefix(size - 1);
    buf.put_slice(encoded);
    size
}

/// Encode a signed `value` (zig-zag) into `buf`.
pub fn encode_signed<B: BufMut>(value: i64, buf: &mut B) -> usize {
    encode_unsigned(zigzag_encode(value), buf)
}

/// Decode an unsigned varint from an in-memory buffer.
pub fn decode_unsigned<B: Buf>(buf: &mut B) -> Result<u64> {
    if !buf.has_remaining() {
        return Err(StrataError::MalformedStream(
            "unexpected end of stream reading varint".to_string(),
        ));
    }
    let first = buf.get_u8();
    let extra = first.leading_ones() as usize;
    if extra == 0 {
        return Ok(first as u64);
    }
    if buf.remaining() < extra {
        return Err(StrataError::MalformedStream(format!(
            "varint declares {} extra bytes, only {} available",
            extra,
            buf.remaining()
        )));
    }

    let mut value = (first & first_byte_value_mask(extra)) as u64;
    for _ in 0..extra {
        value = (value << 8) | buf.get_u8() as u64;
    }
    Ok(value)
}

/// Decode a signed (zig-zag) varint from an in-memory buffer.
pub fn decode_signed<B: Buf>(buf: &mut B) -> Result<i64> {
    decode_unsigned(buf).map(zigzag_decode)
}

fn truncated(err: std::io::Error, what: &str) -> StrataError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        StrataError::MalformedStream(format!("unexpected end of stream reading {}", what))
    } else {
        StrataError::Io(err)
    }
}

/// Read an unsigned varint from an asynchronous stream.
///
/// The underlying reads may suspend; nothing here blocks the runtime.
pub async fn read_unsigned_vint<R>(reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let first = reader
        .read_u8()
        .await
        .map_err(|e| truncated(e, "varint"))?;
    let extra = first.leading_ones() as usize;
    if extra == 0 {
        return Ok(first as u64);
    }

    let mut rest = [0u8; MAX_VINT_SIZE - 1];
    reader
        .read_exact(&mut rest[..extra])
        .await
        .map_err(|e| truncated(e, "varint body"))?;

    let mut value = (first & first_byte_value_mask(extra)) as u64;
    for b in &rest[..extra] {
        value = (value << 8) | *b as u64;
    }
    Ok(value)
}

/// Read a signed (zig-zag) varint from an asynchronous stream.
pub async fn read_signed_vint<R>(reader: &mut R) -> Result<i64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_unsigned_vint(reader).await.map(zigzag_decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn boundary_values() -> Vec<u64> {
        let mut values = vec![0, 1, u64::MAX, u64::MAX - 1];
        for bits in [7u32, 14, 21, 28, 35, 42, 49, 56, 63] {
            let edge = 1u64 << bits;
            values.extend([edge - 1, edge, edge + 1]);
        }
        values
    }

    #[test]
    fn test_unsigned_round_trip_boundaries() {
        for value in boundary_values() {
            let mut buf = BytesMut::new();
            let written = encode_unsigned(value, &mut buf);
            assert_eq!(written, buf.len());
            assert_eq!(written, unsigned_vint_size(value));

            let mut slice = &buf[..];
            assert_eq!(decode_unsigned(&mut slice).unwrap(), value);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn test_encoded_sizes() {
        assert_eq!(unsigned_vint_size(0), 1);
        assert_eq!(unsigned_vint_size(127), 1);
        assert_eq!(unsigned_vint_size(128), 2);
        assert_eq!(unsigned_vint_size(16383), 2);
        assert_eq!(unsigned_vint_size(16384), 3);
        assert_eq!(unsigned_vint_size((1 << 56) - 1), 8);
        assert_eq!(unsigned_vint_size(1 << 56), 9);
        assert_eq!(unsigned_vint_size(u64::MAX), 9);
    }

    #[test]
    fn test_known_encodings() {
        let mut buf = BytesMut::new();
        encode_unsigned(300, &mut buf);
        // 300 = 0b1_0010_1100 -> 10000001 00101100
        assert_eq!(&buf[..], &[0x81, 0x2c]);

        let mut buf = BytesMut::new();
        encode_unsigned(u64::MAX, &mut buf);
        assert_eq!(&buf[..], &[0xff; 9]);
    }

    #[test]
    fn test_signed_round_trip() {
        for value in [0i64, 1, -1, 63, -64, 64, i32::MIN as i64, i64::MIN, i64::MAX] {
            let mut buf = BytesMut::new();
            encode_signed(value, &mut buf);
            assert_eq!(buf.len(), signed_vint_size(value));
            let mut slice = &buf[..];
            assert_eq!(decode_signed(&mut slice).unwrap(), value);
        }
    }

    #[test]
    fn test_truncated_input_is_malformed() {
        let mut empty: &[u8] = &[];
        assert!(matches!(
            decode_unsigned(&mut empty),
            Err(StrataError::MalformedStream(_))
        ));

        // Declares two extra bytes, provides one.
        let mut short: &[u8] = &[0xc0, 0x01];
        assert!(matches!(
            decode_unsigned(&mut short),
            Err(StrataError::MalformedStream(_))
        ));
    }

    #[tokio::test]
    async fn test_async_reader_sequence() {
        let mut buf = BytesMut::new();
        let values = boundary_values();
        for v in &values {
            encode_unsigned(*v, &mut buf);
        }
        encode_signed(-12345, &mut buf);

        let mut reader = &buf[..];
        for v in &values {
            assert_eq!(read_unsigned_vint(&mut reader).await.unwrap(), *v);
        }
        assert_eq!(read_signed_vint(&mut reader).await.unwrap(), -12345);
        assert!(matches!(
            read_unsigned_vint(&mut reader).await,
            Err(StrataError::MalformedStream(_))
        ));
    }

    #[tokio::test]
    async fn test_async_truncated_body() {
        let mut reader: &[u8] = &[0xff, 0x00, 0x01];
        let err = read_unsigned_vint(&mut reader).await.unwrap_err();
        assert!(err.is_corruption());
    }
}
