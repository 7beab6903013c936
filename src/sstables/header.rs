//! STRATA - Serialization Header & Statistics Metadata
//! The per-instance baseline that every timestamp, TTL and local deletion
//! time delta in the Data component is relative to.
//!
//! ## Binary Format (Statistics component)
//! ```text
//! [min_timestamp: i64][min_ldt: i32][min_ldt_wide: i64][min_ttl: i32][min_ttl_wide: i64]
//! [wide_local_deletion_time: u8][partitions: u64][rows: u64][cells: u64][max_partition_size: u64]
//! ```
//! All integers are little-endian (bincode fixed-width encoding).

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::types::{Cell, CellLiveness, Partition};

/// Minimum values observed across all rows of one table instance.
///
/// Immutable once the instance is sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializationHeader {
    min_timestamp: i64,
    min_local_deletion_time: i32,
    min_local_deletion_time_wide: i64,
    min_ttl: i32,
    min_ttl_wide: i64,
}

fn narrow(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl SerializationHeader {
    /// Size of the header on the wire.
    pub const WIRE_SIZE: usize = 8 + 4 + 8 + 4 + 8;

    /// Build a header; the narrow forms are the wide values saturated to 32 bits.
    pub fn new(min_timestamp: i64, min_local_deletion_time: i64, min_ttl: i64) -> Self {
        Self {
            min_timestamp,
            min_local_deletion_time: narrow(min_local_deletion_time),
            min_local_deletion_time_wide: min_local_deletion_time,
            min_ttl: narrow(min_ttl),
            min_ttl_wide: min_ttl,
        }
    }

    pub fn min_timestamp(&self) -> i64 {
        self.min_timestamp
    }

    pub fn min_ttl(&self, wide: bool) -> i64 {
        if wide {
            self.min_ttl_wide
        } else {
            self.min_ttl as i64
        }
    }

    pub fn min_local_deletion_time(&self, wide: bool) -> i64 {
        if wide {
            self.min_local_deletion_time_wide
        } else {
            self.min_local_deletion_time as i64
        }
    }
}

impl Default for SerializationHeader {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Collects header minimums over the data about to be written.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodingStats {
    min_timestamp: Option<i64>,
    min_local_deletion_time: Option<i64>,
    min_ttl: Option<i64>,
}

fn fold_min(current: Option<i64>, value: i64) -> Option<i64> {
    Some(current.map_or(value, |c| c.min(value)))
}

impl EncodingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect stats for a whole batch of partitions.
    pub fn from_partitions<'a>(partitions: impl IntoIterator<Item = &'a Partition>) -> Self {
        let mut stats = Self::new();
        for partition in partitions {
            stats.observe_partition(partition);
        }
        stats
    }

    pub fn observe_partition(&mut self, partition: &Partition) {
        for row in partition.all_rows() {
            for cell in &row.cells {
                self.observe_cell(cell);
            }
        }
    }

    pub fn observe_cell(&mut self, cell: &Cell) {
        self.min_timestamp = fold_min(self.min_timestamp, cell.timestamp);
        match cell.liveness {
            CellLiveness::Live => {}
            CellLiveness::Expiring { ttl, expiry } => {
                self.min_ttl = fold_min(self.min_ttl, ttl.seconds());
                self.min_local_deletion_time =
                    fold_min(self.min_local_deletion_time, expiry.seconds_since_epoch());
            }
            CellLiveness::Deleted { deletion_time } => {
                self.min_local_deletion_time =
                    fold_min(self.min_local_deletion_time, deletion_time.seconds_since_epoch());
            }
        }
    }

    /// Header for the observed data; absent minimums default to zero.
    pub fn header(&self) -> SerializationHeader {
        SerializationHeader::new(
            self.min_timestamp.unwrap_or(0),
            self.min_local_deletion_time.unwrap_or(0),
            self.min_ttl.unwrap_or(0),
        )
    }
}

/// Contents of the Statistics component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsMetadata {
    pub header: SerializationHeader,
    /// Whether TTLs and local deletion times use the 64-bit encoding.
    pub wide_local_deletion_time: bool,
    pub partitions: u64,
    pub rows: u64,
    pub cells: u64,
    pub max_partition_size: u64,
}

impl StatsMetadata {
    pub fn new(header: SerializationHeader, wide_local_deletion_time: bool) -> Self {
        Self {
            header,
            wide_local_deletion_time,
            partitions: 0,
            rows: 0,
            cells: 0,
            max_partition_size: 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        bincode::deserialize(raw)
            .map_err(|e| StrataError::MalformedSstable(format!("unreadable statistics: {}", e)))
    }
}
