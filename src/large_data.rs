//! STRATA - Large Data Reporting
//! Flags partitions and rows whose encoded size crosses a configured
//! threshold.
//!
//! Large partitions are recorded through an [`EventSink`] (a table of
//! large partitions keyed by instance name); large rows are only logged.
//! Sink failures are caught and logged here and never reach the write or
//! delete path that triggered the report.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::sstables::stats::SstableStats;
use crate::sstables::Sstable;
use crate::types::{now_millis, ClusteringKey, PartitionKey};

/// Name of the large-partitions event table, used in log lines.
pub const LARGE_PARTITIONS: &str = "large_partitions";

/// Log target for large-data events.
const LOG_TARGET: &str = "large_data";

/// One large-partition event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargePartitionRecord {
    pub keyspace: String,
    pub table: String,
    pub sstable_name: String,
    /// Partition key rendered with the instance's schema.
    pub partition_key: String,
    pub partition_size: u64,
    /// Milliseconds since the Unix epoch.
    pub compaction_time: i64,
}

/// Destination of large-partition events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn insert(&self, record: LargePartitionRecord) -> Result<()>;

    async fn delete(&self, keyspace: &str, table: &str, sstable_name: &str) -> Result<()>;
}

/// Observes partition and row sizes on the write and delete paths.
#[async_trait]
pub trait LargeDataHandler: Send + Sync {
    /// Report `key` if `partition_size` is above the partition threshold.
    async fn maybe_report_large_partition(
        &self,
        sst: &Sstable,
        key: &PartitionKey,
        partition_size: u64,
    );

    /// Drop the events recorded for `sst` if it could have produced any.
    async fn maybe_clear_large_partition_entry(&self, sst: &Sstable);

    /// Log a row the caller already found to be large.
    fn report_large_row(
        &self,
        sst: &Sstable,
        key: &PartitionKey,
        clustering: Option<&ClusteringKey>,
        row_size: u64,
    );

    /// Rows strictly larger than this are reported.
    fn row_threshold_bytes(&self) -> u64;

    /// Report the row if `row_size` is above the row threshold.
    fn maybe_report_large_row(
        &self,
        sst: &Sstable,
        key: &PartitionKey,
        clustering: Option<&ClusteringKey>,
        row_size: u64,
    ) {
        if row_size > self.row_threshold_bytes() {
            self.report_large_row(sst, key, clustering, row_size);
        }
    }
}

/// Handler that forwards large partitions to an [`EventSink`].
pub struct SinkLargeDataHandler {
    sink: Arc<dyn EventSink>,
    partition_threshold_bytes: u64,
    row_threshold_bytes: u64,
    stats: Arc<SstableStats>,
}

impl SinkLargeDataHandler {
    pub fn new(
        sink: Arc<dyn EventSink>,
        partition_threshold_bytes: u64,
        row_threshold_bytes: u64,
        stats: Arc<SstableStats>,
    ) -> Self {
        Self {
            sink,
            partition_threshold_bytes,
            row_threshold_bytes,
            stats,
        }
    }

    /// Handler using the thresholds from `config`.
    pub fn from_config(config: &Config, sink: Arc<dyn EventSink>, stats: Arc<SstableStats>) -> Self {
        Self::new(
            sink,
            config.large_partition_threshold_bytes,
            config.large_row_threshold_bytes,
            stats,
        )
    }
}

#[async_trait]
impl LargeDataHandler for SinkLargeDataHandler {
    async fn maybe_report_large_partition(
        &self,
        sst: &Sstable,
        key: &PartitionKey,
        partition_size: u64,
    ) {
        if partition_size <= self.partition_threshold_bytes {
            return;
        }
        self.stats.record_large_partition();

        let schema = sst.schema();
        let record = LargePartitionRecord {
            keyspace: schema.keyspace.clone(),
            table: schema.table.clone(),
            sstable_name: sst.get_filename(),
            partition_key: key.with_schema(schema).to_string(),
            partition_size,
            compaction_time: now_millis(),
        };
        let (keyspace, table, key_str) = (
            record.keyspace.clone(),
            record.table.clone(),
            record.partition_key.clone(),
        );

        match self.sink.insert(record).await {
            Ok(()) => log::warn!(
                target: LOG_TARGET,
                "Writing large partition {}/{}:{} ({} bytes)",
                keyspace,
                table,
                key_str,
                partition_size
            ),
            Err(e) => log::warn!(target: LOG_TARGET, "Failed to update {}: {}", LARGE_PARTITIONS, e),
        }
    }

    async fn maybe_clear_large_partition_entry(&self, sst: &Sstable) {
        let total_size = match sst.bytes_on_disk().await {
            Ok(size) => size,
            Err(e) => {
                log::debug!(target: LOG_TARGET, "No size for {}: {}", sst.get_filename(), e);
                return;
            }
        };
        if total_size <= self.partition_threshold_bytes {
            return;
        }

        let schema = sst.schema();
        if let Err(e) = self
            .sink
            .delete(&schema.keyspace, &schema.table, &sst.get_filename())
            .await
        {
            log::warn!(
                target: LOG_TARGET,
                "Failed to drop entries from {}: {}",
                LARGE_PARTITIONS,
                e
            );
        }
    }

    fn report_large_row(
        &self,
        sst: &Sstable,
        key: &PartitionKey,
        clustering: Option<&ClusteringKey>,
        row_size: u64,
    ) {
        let schema = sst.schema();
        match clustering {
            Some(ck) => log::warn!(
                target: LOG_TARGET,
                "Writing large row {}/{}: {} {} ({} bytes)",
                schema.keyspace,
                schema.table,
                key.with_schema(schema),
                ck.with_schema(schema),
                row_size
            ),
            None => log::warn!(
                target: LOG_TARGET,
                "Writing large static row {}/{}: {} ({} bytes)",
                schema.keyspace,
                schema.table,
                key.with_schema(schema),
                row_size
            ),
        }
    }

    fn row_threshold_bytes(&self) -> u64 {
        self.row_threshold_bytes
    }
}

/// Handler for deployments with large-data reporting disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLargeDataHandler;

#[async_trait]
impl LargeDataHandler for NopLargeDataHandler {
    async fn maybe_report_large_partition(&self, _: &Sstable, _: &PartitionKey, _: u64) {}

    async fn maybe_clear_large_partition_entry(&self, _: &Sstable) {}

    fn report_large_row(&self, _: &Sstable, _: &PartitionKey, _: Option<&ClusteringKey>, _: u64) {}

    fn row_threshold_bytes(&self) -> u64 {
        u64::MAX
    }
}

/// In-memory large-partitions table.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    records: Mutex<Vec<LargePartitionRecord>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the stored records.
    pub fn records(&self) -> Vec<LargePartitionRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<LargePartitionRecord>>> {
        self.records
            .lock()
            .map_err(|_| StrataError::Sink("large partitions table poisoned".to_string()))
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn insert(&self, record: LargePartitionRecord) -> Result<()> {
        self.lock()?.push(record);
        Ok(())
    }

    async fn delete(&self, keyspace: &str, table: &str, sstable_name: &str) -> Result<()> {
        self.lock()?.retain(|r| {
            !(r.keyspace == keyspace && r.table == table && r.sstable_name == sstable_name)
        });
        Ok(())
    }
}
