//! STRATA - Core Type Definitions
//! Timestamps, gc-clock values, keys, schemas and the rows/cells
//! handed to the write path.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Write timestamp in microseconds since the Unix epoch.
pub type Timestamp = i64;

/// Duration on the gc clock, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GcDuration(pub i64);

/// Point in time on the gc clock, in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GcTimePoint(pub i64);

impl GcDuration {
    pub fn seconds(self) -> i64 {
        self.0
    }
}

impl GcTimePoint {
    /// Current time on the gc clock.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        GcTimePoint(secs as i64)
    }

    pub fn seconds_since_epoch(self) -> i64 {
        self.0
    }
}

impl fmt::Display for GcTimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// 20 years in seconds.
pub const MAX_TTL: GcDuration = GcDuration(20 * 365 * 24 * 60 * 60);

/// TTL stored on liveness info that was expired on purpose (narrow form).
pub const EXPIRED_LIVENESS_TTL: i64 = i32::MAX as i64;

/// TTL stored on liveness info that was expired on purpose (wide form).
pub const EXPIRED_LIVENESS_TTL_WIDE: i64 = i64::MAX;

/// Returns true if `ttl` is one of the reserved expired-liveness sentinels.
pub fn is_expired_liveness_ttl(ttl: i64) -> bool {
    ttl == EXPIRED_LIVENESS_TTL || ttl == EXPIRED_LIVENESS_TTL_WIDE
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Type of a key column, used to render keys in log lines and sink records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Utf8,
    Int32,
    Int64,
    Blob,
}

impl KeyType {
    fn render(self, raw: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Utf8 => write!(f, "{}", String::from_utf8_lossy(raw)),
            KeyType::Int32 if raw.len() == 4 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(raw);
                write!(f, "{}", i32::from_be_bytes(buf))
            }
            KeyType::Int64 if raw.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                write!(f, "{}", i64::from_be_bytes(buf))
            }
            // Blobs and integers of the wrong width print as hex.
            _ => {
                write!(f, "0x")?;
                for b in raw {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Minimal table schema: identity plus the types needed to render keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub keyspace: String,
    pub table: String,
    pub partition_key_type: KeyType,
    pub clustering_key_type: Option<KeyType>,
}

impl Schema {
    /// Schema with a UTF-8 partition key and no clustering key.
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            partition_key_type: KeyType::Utf8,
            clustering_key_type: None,
        }
    }

    pub fn with_partition_key(mut self, key_type: KeyType) -> Self {
        self.partition_key_type = key_type;
        self
    }

    pub fn with_clustering_key(mut self, key_type: KeyType) -> Self {
        self.clustering_key_type = Some(key_type);
        self
    }
}

/// Serialized partition key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey(pub Bytes);

/// Serialized clustering key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusteringKey(pub Bytes);

impl PartitionKey {
    pub fn from_slice(raw: &[u8]) -> Self {
        PartitionKey(Bytes::copy_from_slice(raw))
    }

    /// Display adapter rendering the key according to `schema`.
    pub fn with_schema<'a>(&'a self, schema: &'a Schema) -> KeyWithSchema<'a> {
        KeyWithSchema {
            raw: &self.0,
            key_type: schema.partition_key_type,
        }
    }
}

impl ClusteringKey {
    pub fn from_slice(raw: &[u8]) -> Self {
        ClusteringKey(Bytes::copy_from_slice(raw))
    }

    pub fn with_schema<'a>(&'a self, schema: &'a Schema) -> KeyWithSchema<'a> {
        KeyWithSchema {
            raw: &self.0,
            key_type: schema.clustering_key_type.unwrap_or(KeyType::Blob),
        }
    }
}

/// A key paired with the type used to print it.
pub struct KeyWithSchema<'a> {
    raw: &'a [u8],
    key_type: KeyType,
}

impl fmt::Display for KeyWithSchema<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key_type.render(self.raw, f)
    }
}

/// Liveness of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellLiveness {
    /// Live and never expires.
    Live,
    /// Live until `expiry`, written with `ttl`.
    Expiring { ttl: GcDuration, expiry: GcTimePoint },
    /// Tombstone written at `deletion_time`.
    Deleted { deletion_time: GcTimePoint },
}

/// A single column value with its liveness metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub column: u32,
    pub timestamp: Timestamp,
    pub liveness: CellLiveness,
    pub value: Bytes,
}

impl Cell {
    pub fn live(column: u32, timestamp: Timestamp, value: impl Into<Bytes>) -> Self {
        Self {
            column,
            timestamp,
            liveness: CellLiveness::Live,
            value: value.into(),
        }
    }

    pub fn expiring(
        column: u32,
        timestamp: Timestamp,
        ttl: GcDuration,
        expiry: GcTimePoint,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            column,
            timestamp,
            liveness: CellLiveness::Expiring { ttl, expiry },
            value: value.into(),
        }
    }

    pub fn deleted(column: u32, timestamp: Timestamp, deletion_time: GcTimePoint) -> Self {
        Self {
            column,
            timestamp,
            liveness: CellLiveness::Deleted { deletion_time },
            value: Bytes::new(),
        }
    }
}

/// A static row (no clustering key) or a clustered row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub clustering: Option<ClusteringKey>,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn static_row(cells: Vec<Cell>) -> Self {
        Self {
            clustering: None,
            cells,
        }
    }

    pub fn clustered(clustering: ClusteringKey, cells: Vec<Cell>) -> Self {
        Self {
            clustering: Some(clustering),
            cells,
        }
    }

    pub fn is_static(&self) -> bool {
        self.clustering.is_none()
    }
}

/// All rows of one partition, in clustering order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub key: PartitionKey,
    pub static_row: Option<Row>,
    pub rows: Vec<Row>,
}

impl Partition {
    pub fn new(key: PartitionKey) -> Self {
        Self {
            key,
            static_row: None,
            rows: Vec::new(),
        }
    }

    pub fn with_static_row(mut self, cells: Vec<Cell>) -> Self {
        self.static_row = Some(Row::static_row(cells));
        self
    }

    pub fn with_row(mut self, clustering: ClusteringKey, cells: Vec<Cell>) -> Self {
        self.rows.push(Row::clustered(clustering, cells));
        self
    }

    /// Iterate the static row (if any) followed by the clustered rows.
    pub fn all_rows(&self) -> impl Iterator<Item = &Row> {
        self.static_row.iter().chain(self.rows.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_liveness_sentinels() {
        assert!(is_expired_liveness_ttl(i32::MAX as i64));
        assert!(is_expired_liveness_ttl(i64::MAX));
        assert!(!is_expired_liveness_ttl(MAX_TTL.seconds() + 1));
    }

    #[test]
    fn test_key_rendering() {
        let schema = Schema::new("ks", "cf")
            .with_partition_key(KeyType::Int32)
            .with_clustering_key(KeyType::Utf8);

        let pk = PartitionKey::from_slice(&42i32.to_be_bytes());
        assert_eq!(pk.with_schema(&schema).to_string(), "42");

        let ck = ClusteringKey::from_slice(b"abc");
        assert_eq!(ck.with_schema(&schema).to_string(), "abc");

        let odd = PartitionKey::from_slice(&[0xde, 0xad]);
        assert_eq!(odd.with_schema(&schema).to_string(), "0xdead");
    }

    #[test]
    fn test_partition_row_order() {
        let p = Partition::new(PartitionKey::from_slice(b"a"))
            .with_row(ClusteringKey::from_slice(b"1"), vec![])
            .with_static_row(vec![]);
        let rows: Vec<_> = p.all_rows().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_static());
        assert!(!rows[1].is_static());
    }
}
