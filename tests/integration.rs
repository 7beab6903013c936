//! STRATA - Integration Tests
//! End-to-end tests of the instance lifecycle:
//! write → seal → scan → read → delete, crash recovery, and large-data reporting.

use std::path::Path;
use std::sync::Arc;

use strata::config::Config;
use strata::error::StrataError;
use strata::large_data::{LargeDataHandler, MemoryEventSink, NopLargeDataHandler, SinkLargeDataHandler};
use strata::sstables::loader::scan_table_dir;
use strata::sstables::writer::{write_sstable, SstableWriter};
use strata::sstables::{ComponentType, Generation, ShardContext, Sstable};
use strata::types::{Cell, ClusteringKey, GcDuration, GcTimePoint, Partition, PartitionKey, Schema};

mod common {
    use super::*;

    /// Create a Config pointing to a temporary directory.
    pub fn temp_config(dir: &Path) -> Config {
        Config::new(dir)
            .with_large_partition_threshold(1000)
            .with_large_row_threshold(1500)
    }

    pub fn schema() -> Arc<Schema> {
        Arc::new(Schema::new("ks", "cf"))
    }

    pub fn nop() -> Arc<dyn LargeDataHandler> {
        Arc::new(NopLargeDataHandler)
    }

    pub fn partition(key: &str, value: &str) -> Partition {
        Partition::new(PartitionKey::from_slice(key.as_bytes()))
            .with_static_row(vec![Cell::live(0, 1_000, "s")])
            .with_row(
                ClusteringKey::from_slice(b"c1"),
                vec![
                    Cell::live(1, 1_001, value.to_string()),
                    Cell::expiring(2, 1_002, GcDuration(3600), GcTimePoint(1_700_003_600), "t"),
                ],
            )
            .with_row(
                ClusteringKey::from_slice(b"c2"),
                vec![Cell::deleted(1, 1_003, GcTimePoint(1_700_000_000))],
            )
    }

    pub async fn write(
        ctx: &ShardContext,
        config: &Config,
        generation: u64,
        partitions: Vec<Partition>,
    ) -> Sstable {
        write_sstable(ctx, config, schema(), Generation(generation), partitions, nop())
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_write_load_read_delete() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::temp_config(dir.path());
    let ctx = ShardContext::new(0);
    let partitions = vec![common::partition("a", "one"), common::partition("b", "two")];

    let written = common::write(&ctx, &config, 1, partitions.clone()).await;
    let table_dir = config.table_dir("ks", "cf");

    let report = scan_table_dir(&ctx, &table_dir, common::schema()).await.unwrap();
    assert_eq!(report.loadable.len(), 1);
    assert!(report.purged.is_empty());
    assert!(report.rejected.is_empty());

    let loaded = &report.loadable[0];
    assert_eq!(loaded.generation(), Generation(1));
    assert_eq!(loaded.metadata(), written.metadata());
    assert_eq!(loaded.components(), written.components());
    assert_eq!(loaded.read_partitions(&ctx).await.unwrap(), partitions);
    loaded.verify_digest(&ctx).await.unwrap();

    let files = loaded.components().len() as u64;
    let before = ctx.snapshot().removed;
    loaded.delete(&ctx, &NopLargeDataHandler).await.unwrap();
    assert_eq!(ctx.snapshot().removed - before, files);
    assert_eq!(std::fs::read_dir(&table_dir).unwrap().count(), 0);

    let report = scan_table_dir(&ctx, &table_dir, common::schema()).await.unwrap();
    assert!(report.loadable.is_empty());
}

#[tokio::test]
async fn test_crash_recovery_purges_unsealed_generations() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::temp_config(dir.path());
    let ctx = ShardContext::new(0);
    let schema = common::schema();

    // Generation 1 is sealed.
    common::write(&ctx, &config, 1, vec![common::partition("a", "v")]).await;

    // Generation 2 crashed mid-write: marker and Data exist.
    let p = common::partition("a", "v");
    let header = strata::sstables::header::EncodingStats::from_partitions([&p]).header();
    let mut writer = SstableWriter::create(&ctx, &config, schema.clone(), Generation(2), header, common::nop())
        .await
        .unwrap();
    writer.write_partition(&p).await.unwrap();
    let gen2 = writer.descriptor().clone();
    drop(writer);

    // Generation 3 only has its marker.
    let gen3_marker = strata::sstables::descriptor::temp_sst_dir(&gen2.dir, Generation(3));
    std::fs::create_dir(&gen3_marker).unwrap();

    // Generation 4 crashed right before the TOC rename.
    let sealed = common::write(&ctx, &config, 4, vec![common::partition("z", "v")]).await;
    std::fs::rename(
        sealed.filename(ComponentType::Toc),
        sealed.filename(ComponentType::TemporaryToc),
    )
    .unwrap();
    std::fs::create_dir(sealed.descriptor().temp_dir()).unwrap();

    let report = scan_table_dir(&ctx, &gen2.dir, schema.clone()).await.unwrap();
    let loaded: Vec<_> = report.loadable.iter().map(|s| s.generation()).collect();
    assert_eq!(loaded, vec![Generation(1)]);
    assert_eq!(report.purged, vec![Generation(2), Generation(3), Generation(4)]);
    assert_eq!(report.generation_allocator().allocate(), Generation(5));

    assert!(!gen2.temp_dir().exists());
    assert!(!gen3_marker.exists());
    assert!(!sealed.descriptor().temp_dir().exists());
    for component in ComponentType::ALL {
        assert!(!gen2.filename(component).exists());
        assert!(!sealed.filename(component).exists());
    }

    // A second scan finds nothing left to purge.
    let again = scan_table_dir(&ctx, &gen2.dir, schema).await.unwrap();
    assert_eq!(again.loadable.len(), 1);
    assert!(again.purged.is_empty());
}

#[tokio::test]
async fn test_interrupted_delete_is_purged() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::temp_config(dir.path());
    let ctx = ShardContext::new(0);

    let sst = common::write(&ctx, &config, 1, vec![common::partition("a", "v")]).await;
    std::fs::rename(
        sst.filename(ComponentType::Toc),
        sst.filename(ComponentType::TemporaryToc),
    )
    .unwrap();
    std::fs::remove_file(sst.filename(ComponentType::Index)).unwrap();

    let report = scan_table_dir(&ctx, &sst.descriptor().dir, common::schema())
        .await
        .unwrap();
    assert!(report.loadable.is_empty());
    assert_eq!(report.purged, vec![Generation(1)]);
    assert!(!sst.filename(ComponentType::Data).exists());
}

#[tokio::test]
async fn test_loadable_only_with_exact_component_set() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::temp_config(dir.path());
    let ctx = ShardContext::new(0);
    let table_dir = config.table_dir("ks", "cf");

    let missing = common::write(&ctx, &config, 1, vec![common::partition("a", "v")]).await;
    std::fs::remove_file(missing.filename(ComponentType::Filter)).unwrap();

    let extra = common::write(&ctx, &config, 2, vec![common::partition("a", "v")]).await;
    std::fs::write(extra.filename(ComponentType::CompressionInfo), b"").unwrap();

    common::write(&ctx, &config, 3, vec![common::partition("a", "v")]).await;

    let report = scan_table_dir(&ctx, &table_dir, common::schema()).await.unwrap();
    let loaded: Vec<_> = report.loadable.iter().map(|s| s.generation()).collect();
    assert_eq!(loaded, vec![Generation(3)]);
    assert_eq!(report.rejected.len(), 2);
    for (_, err) in &report.rejected {
        assert!(matches!(err, StrataError::ComponentIntegrity { .. }));
        assert!(err.is_corruption());
    }
}

#[tokio::test]
async fn test_corrupt_data_fails_digest() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::temp_config(dir.path());
    let ctx = ShardContext::new(0);

    let sst = common::write(&ctx, &config, 1, vec![common::partition("a", "value")]).await;
    let path = sst.filename(ComponentType::Data);
    let mut raw = std::fs::read(&path).unwrap();
    let last = raw.len() - 2;
    raw[last] ^= 0xff;
    std::fs::write(&path, raw).unwrap();

    let err = sst.verify_digest(&ctx).await.unwrap_err();
    assert!(matches!(err, StrataError::MalformedSstable(_)));
}

#[tokio::test]
async fn test_large_partition_reported_and_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::temp_config(dir.path());
    let ctx = ShardContext::new(0);
    let sink = Arc::new(MemoryEventSink::new());
    let handler = Arc::new(SinkLargeDataHandler::from_config(
        &config,
        sink.clone(),
        ctx.stats().clone(),
    ));

    let big_value = "x".repeat(2000);
    let sst = write_sstable(
        &ctx,
        &config,
        common::schema(),
        Generation(1),
        vec![common::partition("big", &big_value), common::partition("small", "v")],
        handler.clone(),
    )
    .await
    .unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].partition_key, "big");
    assert_eq!(records[0].keyspace, "ks");
    assert_eq!(records[0].table, "cf");
    assert_eq!(records[0].partition_size, sst.metadata().max_partition_size);
    assert_eq!(records[0].sstable_name, sst.get_filename());
    assert_eq!(ctx.snapshot().partitions_bigger_than_threshold, 1);

    sst.delete(&ctx, handler.as_ref()).await.unwrap();
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_wide_deletion_times() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ShardContext::new(0);
    let far = Partition::new(PartitionKey::from_slice(b"far")).with_row(
        ClusteringKey::from_slice(b"c"),
        vec![Cell::deleted(1, 10, GcTimePoint(5_000_000_000))],
    );

    let narrow = common::temp_config(dir.path());
    let err = write_sstable(&ctx, &narrow, common::schema(), Generation(1), vec![far.clone()], common::nop())
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::Serialization(_)));

    let wide = common::temp_config(dir.path()).with_wide_local_deletion_time(true);
    let sst = write_sstable(&ctx, &wide, common::schema(), Generation(2), vec![far.clone()], common::nop())
        .await
        .unwrap();
    assert!(sst.metadata().wide_local_deletion_time);
    assert_eq!(sst.read_partitions(&ctx).await.unwrap(), vec![far]);
}

#[tokio::test]
async fn test_file_counters_balance() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::temp_config(dir.path());
    let ctx = ShardContext::new(0);

    let sst = common::write(&ctx, &config, 1, vec![common::partition("a", "v")]).await;
    let after_write = ctx.snapshot();
    // Data, Index, Summary, Filter, Statistics, Digest, CRC, TemporaryTOC
    assert_eq!(after_write.created, 8);
    assert_eq!(after_write.opened_w, 8);
    assert_eq!(after_write.closed_w, 8);
    assert_eq!(after_write.opened_r, 0);
    assert!(after_write.bytes_written > 0);

    sst.read_partitions(&ctx).await.unwrap();
    let after_read = ctx.snapshot();
    assert_eq!(after_read.opened_r, 1);
    assert_eq!(after_read.closed_r, 1);
    assert_eq!(after_read.bytes_read, sst.data_size().await.unwrap());
    assert_eq!(after_read.reads_in_flight, 0);
    assert_eq!(after_read.writes_in_flight, 0);

    let other = ShardContext::new(1);
    assert_eq!(other.snapshot().opened_w, 0);
}
