//! STRATA - SSTable Persistence Layer
//! Table instances on disk: their components, encoding, publication and
//! recovery.
//!
//! ## Architecture
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  SstableWriter ──seal──► Sstable ◄── loader   │
//! │       │                     │           │     │
//! │   data / delta / vint   InstrumentedFile│     │
//! │       │                     │        component│
//! │   header (minimums)     SstableStats (shard)  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! All per-shard state (statistics) travels in a [`ShardContext`].

pub mod component;
pub mod data;
pub mod delta;
pub mod descriptor;
pub mod file;
pub mod header;
pub mod loader;
pub mod stats;
pub mod vint;
pub mod writer;

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

pub use component::{ComponentType, FormatType, VersionType};
pub use descriptor::{Descriptor, Generation};

use crate::error::{Result, StrataError};
use crate::large_data::LargeDataHandler;
use crate::types::{Partition, Schema};
use data::DataReader;
use file::{open_sstable_file, sync_directory, FileHandle, OpenFlags};
use header::{SerializationHeader, StatsMetadata};
use stats::{SstableStats, StatsSnapshot};

/// State owned by one execution shard.
#[derive(Debug, Clone)]
pub struct ShardContext {
    shard_id: usize,
    stats: Arc<SstableStats>,
}

impl ShardContext {
    /// Context with fresh counters.
    pub fn new(shard_id: usize) -> Self {
        Self {
            shard_id,
            stats: Arc::new(SstableStats::new()),
        }
    }

    pub fn shard_id(&self) -> usize {
        self.shard_id
    }

    pub fn stats(&self) -> &Arc<SstableStats> {
        &self.stats
    }

    /// Current counters of this shard.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Read a whole file through an instrumented handle.
pub(crate) async fn read_file(stats: &Arc<SstableStats>, path: &Path) -> io::Result<Bytes> {
    let file = open_sstable_file(stats, path, OpenFlags::READ).await?;
    let size = file.size().await?;
    let len = usize::try_from(size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file too large"))?;
    let contents = file.read_bulk(0, len).await?;
    file.close().await?;
    Ok(contents)
}

/// Remove one component file; a missing file is not an error.
pub(crate) async fn remove_file(stats: &SstableStats, path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            stats.record_removal();
            log::debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Parse the decimal CRC32 stored in a Digest component.
pub(crate) fn parse_digest(raw: &[u8]) -> Result<u32> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .ok_or_else(|| StrataError::MalformedSstable("unreadable digest".to_string()))
}

/// A sealed table instance.
#[derive(Debug, Clone)]
pub struct Sstable {
    descriptor: Descriptor,
    schema: Arc<Schema>,
    metadata: StatsMetadata,
    components: BTreeSet<ComponentType>,
}

impl Sstable {
    pub fn new(
        descriptor: Descriptor,
        schema: Arc<Schema>,
        metadata: StatsMetadata,
        components: BTreeSet<ComponentType>,
    ) -> Self {
        Self {
            descriptor,
            schema,
            metadata,
            components,
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn generation(&self) -> Generation {
        self.descriptor.generation
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn metadata(&self) -> &StatsMetadata {
        &self.metadata
    }

    pub fn header(&self) -> &SerializationHeader {
        &self.metadata.header
    }

    pub fn components(&self) -> &BTreeSet<ComponentType> {
        &self.components
    }

    pub fn filename(&self, component: ComponentType) -> PathBuf {
        self.descriptor.filename(component)
    }

    /// Name identifying this instance in large-data records: the Data path.
    pub fn get_filename(&self) -> String {
        self.filename(ComponentType::Data)
            .to_string_lossy()
            .into_owned()
    }

    /// Size of the Data component on disk.
    pub async fn data_size(&self) -> Result<u64> {
        Ok(tokio::fs::metadata(self.filename(ComponentType::Data))
            .await?
            .len())
    }

    /// Combined size of every component.
    pub async fn bytes_on_disk(&self) -> Result<u64> {
        let mut total = 0;
        for component in &self.components {
            total += tokio::fs::metadata(self.filename(*component)).await?.len();
        }
        Ok(total)
    }

    /// Decode every partition in the Data component.
    pub async fn read_partitions(&self, ctx: &ShardContext) -> Result<Vec<Partition>> {
        let data = read_file(ctx.stats(), &self.filename(ComponentType::Data)).await?;
        let mut reader = DataReader::new(
            &data[..],
            self.metadata.header,
            self.metadata.wide_local_deletion_time,
        );
        reader.read_all().await
    }

    /// Check the Data component against the stored digest.
    pub async fn verify_digest(&self, ctx: &ShardContext) -> Result<()> {
        let stored = read_file(ctx.stats(), &self.filename(ComponentType::Digest)).await?;
        let expected = parse_digest(&stored)?;
        let data = read_file(ctx.stats(), &self.filename(ComponentType::Data)).await?;
        let actual = crc32fast::hash(&data);
        if actual != expected {
            return Err(StrataError::MalformedSstable(format!(
                "digest mismatch in {}: expected {}, computed {}",
                self.descriptor, expected, actual
            )));
        }
        Ok(())
    }

    /// Remove every component of this instance.
    ///
    /// The TOC is renamed to TemporaryTOC first so an interrupted delete
    /// leaves a generation the recovery scan purges, never one that looks
    /// complete.
    pub async fn delete(&self, ctx: &ShardContext, handler: &dyn LargeDataHandler) -> Result<()> {
        handler.maybe_clear_large_partition_entry(self).await;

        let temp_toc = self.filename(ComponentType::TemporaryToc);
        tokio::fs::rename(self.filename(ComponentType::Toc), &temp_toc).await?;
        sync_directory(&self.descriptor.dir).await?;

        for component in &self.components {
            if *component != ComponentType::Toc {
                remove_file(ctx.stats(), &self.filename(*component)).await?;
            }
        }
        remove_file(ctx.stats(), &temp_toc).await?;
        sync_directory(&self.descriptor.dir).await?;

        log::info!("Deleted sstable {}", self.descriptor);
        Ok(())
    }
}
