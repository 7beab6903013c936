//! STRATA - Delta-Encoded Cell Metadata
//! Cells store timestamps, TTLs and local deletion times as unsigned deltas
//! against the instance's serialization header. This module converts in
//! both directions and owns the per-cell metadata wire layout.
//!
//! ## Binary Format (per cell)
//! ```text
//! [flags: u8][ts_delta: vint]
//!     expiring: [ldt_delta: vint][ttl_delta: vint]
//!     deleted:  [ldt_delta: vint]
//! ```

use std::fmt;

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::header::SerializationHeader;
use super::vint::{encode_unsigned, read_unsigned_vint};
use crate::error::{Result, StrataError};
use crate::types::{is_expired_liveness_ttl, CellLiveness, GcDuration, GcTimePoint, Timestamp, MAX_TTL};

/// Cell flag: the cell carries a TTL and an expiry time.
pub const CELL_IS_EXPIRING: u8 = 0x01;
/// Cell flag: the cell is a tombstone.
pub const CELL_IS_DELETED: u8 = 0x02;

/// Which header minimum a delta is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Timestamp,
    Ttl,
    LocalDeletionTime,
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaKind::Timestamp => write!(f, "timestamp"),
            DeltaKind::Ttl => write!(f, "ttl"),
            DeltaKind::LocalDeletionTime => write!(f, "local_deletion_time"),
        }
    }
}

/// Absolute timestamp for `delta`. The sum covers the whole i64 domain.
pub fn parse_timestamp(header: &SerializationHeader, delta: u64) -> Timestamp {
    header.min_timestamp().wrapping_add(delta as i64)
}

/// Shared narrow/wide reconstruction for TTL and local deletion time.
fn parse_bounded(kind: DeltaKind, min: i64, delta: u64, wide: bool) -> Result<i64> {
    if !wide {
        if delta > u32::MAX as u64 {
            return Err(StrataError::MalformedSstable(format!(
                "Too big delta {}: {}",
                kind, delta
            )));
        }
        return Ok((min as i32).wrapping_add(delta as u32 as i32) as i64);
    }

    // Deltas are non-negative by construction; anything above i64::MAX
    // would be a negative offset once widened.
    let signed = i64::try_from(delta).map_err(|_| {
        StrataError::MalformedSstable(format!("Negative delta {}: {}", kind, delta))
    })?;
    min.checked_add(signed).ok_or_else(|| {
        StrataError::MalformedSstable(format!(
            "Too big delta {}: {}. min_{}={}",
            kind, delta, kind, min
        ))
    })
}

/// Absolute TTL for `delta`.
pub fn parse_ttl(header: &SerializationHeader, delta: u64, wide: bool) -> Result<GcDuration> {
    let ttl = parse_bounded(DeltaKind::Ttl, header.min_ttl(wide), delta, wide)?;
    if ttl > MAX_TTL.seconds() && !is_expired_liveness_ttl(ttl) {
        return Err(StrataError::MalformedSstable(format!("Too big ttl: {}", ttl)));
    }
    Ok(GcDuration(ttl))
}

/// Absolute expiry (local deletion time) for `delta`.
pub fn parse_expiry(header: &SerializationHeader, delta: u64, wide: bool) -> Result<GcTimePoint> {
    let expiry = parse_bounded(
        DeltaKind::LocalDeletionTime,
        header.min_local_deletion_time(wide),
        delta,
        wide,
    )?;
    Ok(GcTimePoint(expiry))
}

/// Delta of `timestamp` against the header minimum.
pub fn encode_timestamp_delta(header: &SerializationHeader, timestamp: Timestamp) -> Result<u64> {
    let min = header.min_timestamp();
    if timestamp < min {
        return Err(StrataError::Serialization(format!(
            "timestamp {} below header minimum {}",
            timestamp, min
        )));
    }
    Ok(timestamp.wrapping_sub(min) as u64)
}

fn encode_bounded(kind: DeltaKind, value: i64, min: i64, wide: bool) -> Result<u64> {
    if !wide && i32::try_from(value).is_err() {
        return Err(StrataError::Serialization(format!(
            "{} {} does not fit the narrow encoding",
            kind, value
        )));
    }
    let delta = value
        .checked_sub(min)
        .filter(|d| *d >= 0)
        .ok_or_else(|| {
            StrataError::Serialization(format!(
                "{} {} cannot be encoded against minimum {}",
                kind, value, min
            ))
        })?;
    if !wide && delta > u32::MAX as i64 {
        return Err(StrataError::Serialization(format!(
            "{} delta {} exceeds the narrow range",
            kind, delta
        )));
    }
    Ok(delta as u64)
}

/// Delta of `ttl` against the header minimum.
pub fn encode_ttl_delta(header: &SerializationHeader, ttl: GcDuration, wide: bool) -> Result<u64> {
    encode_bounded(DeltaKind::Ttl, ttl.seconds(), header.min_ttl(wide), wide)
}

/// Delta of `expiry` against the header minimum.
pub fn encode_expiry_delta(
    header: &SerializationHeader,
    expiry: GcTimePoint,
    wide: bool,
) -> Result<u64> {
    encode_bounded(
        DeltaKind::LocalDeletionTime,
        expiry.seconds_since_epoch(),
        header.min_local_deletion_time(wide),
        wide,
    )
}

/// Write the flags byte and the deltas for one cell.
pub fn encode_cell_metadata<B: BufMut>(
    header: &SerializationHeader,
    wide: bool,
    timestamp: Timestamp,
    liveness: &CellLiveness,
    buf: &mut B,
) -> Result<()> {
    let ts_delta = encode_timestamp_delta(header, timestamp)?;
    match liveness {
        CellLiveness::Live => {
            buf.put_u8(0);
            encode_unsigned(ts_delta, buf);
        }
        CellLiveness::Expiring { ttl, expiry } => {
            let ldt_delta = encode_expiry_delta(header, *expiry, wide)?;
            let ttl_delta = encode_ttl_delta(header, *ttl, wide)?;
            buf.put_u8(CELL_IS_EXPIRING);
            encode_unsigned(ts_delta, buf);
            encode_unsigned(ldt_delta, buf);
            encode_unsigned(ttl_delta, buf);
        }
        CellLiveness::Deleted { deletion_time } => {
            let ldt_delta = encode_expiry_delta(header, *deletion_time, wide)?;
            buf.put_u8(CELL_IS_DELETED);
            encode_unsigned(ts_delta, buf);
            encode_unsigned(ldt_delta, buf);
        }
    }
    Ok(())
}

/// Read the flags byte and deltas of one cell, resolving absolute values.
pub async fn read_cell_metadata<R>(
    reader: &mut R,
    header: &SerializationHeader,
    wide: bool,
) -> Result<(Timestamp, CellLiveness)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let flags = reader.read_u8().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            StrataError::MalformedStream("unexpected end of stream reading cell flags".to_string())
        } else {
            StrataError::Io(e)
        }
    })?;
    let timestamp = parse_timestamp(header, read_unsigned_vint(reader).await?);

    let liveness = match flags {
        0 => CellLiveness::Live,
        CELL_IS_EXPIRING => {
            let expiry = parse_expiry(header, read_unsigned_vint(reader).await?, wide)?;
            let ttl = parse_ttl(header, read_unsigned_vint(reader).await?, wide)?;
            CellLiveness::Expiring { ttl, expiry }
        }
        CELL_IS_DELETED => {
            let deletion_time = parse_expiry(header, read_unsigned_vint(reader).await?, wide)?;
            CellLiveness::Deleted { deletion_time }
        }
        other => {
            return Err(StrataError::MalformedSstable(format!(
                "unknown cell flags 0x{:02x}",
                other
            )))
        }
    };
    Ok((timestamp, liveness))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn header_with_ttl(min_ttl: i64) -> SerializationHeader {
        SerializationHeader::new(0, 0, min_ttl)
    }

    fn header_with_expiry(min_ldt: i64) -> SerializationHeader {
        SerializationHeader::new(0, min_ldt, 0)
    }

    #[test]
    fn test_parse_timestamp_adds_minimum() {
        let header = SerializationHeader::new(1_000_000, 0, 0);
        assert_eq!(parse_timestamp(&header, 0), 1_000_000);
        assert_eq!(parse_timestamp(&header, 42), 1_000_042);

        let negative = SerializationHeader::new(i64::MIN, 0, 0);
        assert_eq!(parse_timestamp(&negative, u64::MAX), i64::MAX);
    }

    #[test]
    fn test_narrow_ttl_is_exact_sum() {
        for min in [0i64, 1, 3600, 86_400, -100] {
            for delta in [0u64, 1, 59, 3600, 1_000_000] {
                let ttl = parse_ttl(&header_with_ttl(min), delta, false).unwrap();
                assert_eq!(ttl.seconds(), min + delta as i64);
            }
        }
    }

    #[test]
    fn test_narrow_ttl_rejects_delta_above_u32() {
        let header = header_with_ttl(0);
        let err = parse_ttl(&header, u32::MAX as u64 + 1, false).unwrap_err();
        assert!(matches!(err, StrataError::MalformedSstable(_)));
        let err = parse_expiry(&header, u64::MAX, false).unwrap_err();
        assert!(matches!(err, StrataError::MalformedSstable(_)));
    }

    #[test]
    fn test_ttl_above_max_rejected_unless_sentinel() {
        let header = header_with_ttl(0);
        let max = MAX_TTL.seconds() as u64;
        assert!(parse_ttl(&header, max, true).is_ok());
        assert!(parse_ttl(&header, max + 1, true).is_err());
        assert!(parse_ttl(&header, max + 1, false).is_err());

        // Expired-liveness sentinels pass in both widths.
        assert_eq!(
            parse_ttl(&header, i32::MAX as u64, false).unwrap().seconds(),
            i32::MAX as i64
        );
        assert_eq!(
            parse_ttl(&header, i64::MAX as u64, true).unwrap().seconds(),
            i64::MAX
        );
    }

    #[test]
    fn test_wide_ttl_overflow_rejected() {
        let header = header_with_ttl(10);
        let err = parse_ttl(&header, i64::MAX as u64, true).unwrap_err();
        assert!(matches!(err, StrataError::MalformedSstable(_)));
    }

    #[test]
    fn test_wide_expiry_fails_iff_sum_wraps() {
        let mins = [i64::MIN, -1, 0, 1, 1_600_000_000, i64::MAX - 10, i64::MAX];
        let deltas = [
            0u64,
            1,
            10,
            11,
            1 << 40,
            (i64::MAX as u64) - 1,
            i64::MAX as u64,
            i64::MAX as u64 + 1,
            u64::MAX - 1,
            u64::MAX,
        ];
        for min in mins {
            for delta in deltas {
                let result = parse_expiry(&header_with_expiry(min), delta, true);
                if delta > i64::MAX as u64 {
                    // Rejected as a negative offset even where the sum fits,
                    // e.g. min=i64::MIN with delta=u64::MAX.
                    match result {
                        Err(StrataError::MalformedSstable(msg)) => {
                            assert!(msg.contains("Negative delta"), "min={} delta={}", min, delta)
                        }
                        other => panic!("min={} delta={}: {:?}", min, delta, other),
                    }
                    continue;
                }
                let wraps = min.wrapping_add(delta as i64) < min;
                assert_eq!(result.is_err(), wraps, "min={} delta={}", min, delta);
                if let Ok(expiry) = result {
                    assert_eq!(expiry.seconds_since_epoch(), min + delta as i64);
                }
            }
        }
    }

    #[test]
    fn test_wide_rejects_negative_delta() {
        let header = header_with_expiry(i64::MIN);
        // Would not wrap with a signed cast, but is a negative offset.
        let err = parse_expiry(&header, u64::MAX, true).unwrap_err();
        assert!(err.to_string().contains("Negative delta"));
    }

    #[test]
    fn test_encode_rejects_values_below_minimum() {
        let header = SerializationHeader::new(100, 1_000, 60);
        assert!(encode_timestamp_delta(&header, 99).is_err());
        assert!(encode_ttl_delta(&header, GcDuration(59), true).is_err());
        assert!(encode_expiry_delta(&header, GcTimePoint(999), false).is_err());
        assert_eq!(encode_ttl_delta(&header, GcDuration(61), false).unwrap(), 1);
    }

    #[test]
    fn test_encode_narrow_rejects_wide_values() {
        let header = SerializationHeader::new(0, 0, 0);
        let far_future = GcTimePoint(i32::MAX as i64 + 1);
        assert!(encode_expiry_delta(&header, far_future, false).is_err());
        assert_eq!(
            encode_expiry_delta(&header, far_future, true).unwrap(),
            i32::MAX as u64 + 1
        );
    }

    #[tokio::test]
    async fn test_cell_metadata_round_trip() {
        let header = SerializationHeader::new(1_000, 50_000, 30);
        let cases = [
            (1_000, CellLiveness::Live),
            (
                5_000,
                CellLiveness::Expiring {
                    ttl: GcDuration(3600),
                    expiry: GcTimePoint(60_000),
                },
            ),
            (
                2_000,
                CellLiveness::Deleted {
                    deletion_time: GcTimePoint(50_000),
                },
            ),
        ];
        for wide in [false, true] {
            let mut buf = BytesMut::new();
            for (ts, liveness) in &cases {
                encode_cell_metadata(&header, wide, *ts, liveness, &mut buf).unwrap();
            }
            let mut reader = &buf[..];
            for (ts, liveness) in &cases {
                let decoded = read_cell_metadata(&mut reader, &header, wide).await.unwrap();
                assert_eq!(decoded, (*ts, *liveness));
            }
            assert!(reader.is_empty());
        }
    }

    #[tokio::test]
    async fn test_unknown_cell_flags() {
        let header = SerializationHeader::default();
        let mut reader: &[u8] = &[0x04, 0x00];
        let err = read_cell_metadata(&mut reader, &header, false).await.unwrap_err();
        assert!(matches!(err, StrataError::MalformedSstable(_)));
    }
}
