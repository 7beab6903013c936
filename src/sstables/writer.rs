//! STRATA - SSTable Writer
//! Produces one table instance and publishes it atomically.
//!
//! ## Publication
//! 1. Create the `<dir>.<generation>.tmp` marker directory.
//! 2. Write every component under its final name.
//! 3. Write the TOC as TemporaryTOC and make it durable.
//! 4. Rename TemporaryTOC to TOC. This is the publication point.
//! 5. Remove the marker directory.
//!
//! A crash before step 4 leaves a generation without a final TOC, which the
//! recovery scan purges. An error before step 4 aborts the writer, which
//! removes the components and the marker before the error is returned.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use crc32fast::Hasher;

use super::component::{encode_toc, required_components, ComponentType};
use super::data::encode_partition;
use super::descriptor::{Descriptor, Generation};
use super::file::{open_sstable_file, sync_directory, FileHandle, InstrumentedFile, OpenFlags};
use super::header::{EncodingStats, SerializationHeader, StatsMetadata};
use super::vint::encode_unsigned;
use super::{remove_file, ShardContext, Sstable};
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::large_data::LargeDataHandler;
use crate::types::{Partition, PartitionKey, Schema};

/// Bytes covered by each checksum in the CRC component.
pub const CRC_CHUNK_SIZE: usize = 64 * 1024;

/// Write all of `contents` at `offset`, failing on a short write.
async fn write_all_at(
    file: &dyn FileHandle,
    offset: u64,
    contents: &[u8],
    component: ComponentType,
) -> Result<()> {
    let written = file.write(offset, contents).await?;
    if written != contents.len() {
        return Err(StrataError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            format!(
                "short write to {} component ({} of {} bytes)",
                component,
                written,
                contents.len()
            ),
        )));
    }
    Ok(())
}

/// Whole-file digest plus per-chunk checksums of the Data component.
#[derive(Default)]
struct Checksums {
    digest: Hasher,
    chunk: Hasher,
    chunk_fill: usize,
    chunks: Vec<u32>,
}

impl Checksums {
    fn update(&mut self, mut raw: &[u8]) {
        self.digest.update(raw);
        while !raw.is_empty() {
            let take = (CRC_CHUNK_SIZE - self.chunk_fill).min(raw.len());
            self.chunk.update(&raw[..take]);
            self.chunk_fill += take;
            raw = &raw[take..];
            if self.chunk_fill == CRC_CHUNK_SIZE {
                let full = std::mem::take(&mut self.chunk);
                self.chunks.push(full.finalize());
                self.chunk_fill = 0;
            }
        }
    }

    /// Returns the digest and the encoded CRC component.
    fn finish(mut self) -> (u32, Vec<u8>) {
        if self.chunk_fill > 0 {
            self.chunks.push(self.chunk.finalize());
        }
        let mut crc = Vec::with_capacity(4 + 4 * self.chunks.len());
        crc.put_u32(CRC_CHUNK_SIZE as u32);
        for chunk in &self.chunks {
            crc.put_u32(*chunk);
        }
        (self.digest.finalize(), crc)
    }
}

/// Writes one table instance; see the module docs for the protocol.
pub struct SstableWriter {
    ctx: ShardContext,
    instance: Sstable,
    handler: Arc<dyn LargeDataHandler>,
    sync: bool,
    data: InstrumentedFile,
    data_open: bool,
    offset: u64,
    buf: BytesMut,
    index: BytesMut,
    checksums: Checksums,
    first_key: Option<PartitionKey>,
    last_key: Option<PartitionKey>,
}

impl SstableWriter {
    /// Start writing generation `generation` of `schema`'s table.
    ///
    /// Every delta is encoded against `header`, so it must hold the minimums
    /// of all data that will be written.
    pub async fn create(
        ctx: &ShardContext,
        config: &Config,
        schema: Arc<Schema>,
        generation: Generation,
        header: SerializationHeader,
        handler: Arc<dyn LargeDataHandler>,
    ) -> Result<Self> {
        let dir = config.table_dir(&schema.keyspace, &schema.table);
        tokio::fs::create_dir_all(&dir).await?;

        let descriptor = Descriptor::new(
            dir,
            schema.keyspace.clone(),
            schema.table.clone(),
            config.version,
            generation,
            config.format,
        );
        tokio::fs::create_dir(descriptor.temp_dir()).await?;

        let data = match open_sstable_file(
            ctx.stats(),
            descriptor.filename(ComponentType::Data),
            OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::EXCLUSIVE,
        )
        .await
        {
            Ok(data) => data,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_dir(descriptor.temp_dir()).await {
                    log::warn!("Failed to remove marker of {}: {}", descriptor, rm);
                }
                return Err(e.into());
            }
        };
        log::debug!("Writing sstable {}", descriptor);

        let metadata = StatsMetadata::new(header, config.wide_local_deletion_time);
        Ok(Self {
            ctx: ctx.clone(),
            instance: Sstable::new(descriptor, schema, metadata, Default::default()),
            handler,
            sync: config.sync_writes,
            data,
            data_open: true,
            offset: 0,
            buf: BytesMut::new(),
            index: BytesMut::new(),
            checksums: Checksums::default(),
            first_key: None,
            last_key: None,
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.instance.descriptor
    }

    /// Bytes of Data written so far.
    pub fn data_size(&self) -> u64 {
        self.offset
    }

    /// Append a partition. Keys must arrive in strictly increasing order.
    pub async fn write_partition(&mut self, partition: &Partition) -> Result<()> {
        if let Some(last) = &self.last_key {
            if partition.key <= *last {
                return Err(StrataError::Serialization(format!(
                    "partition key {} out of order",
                    partition.key.with_schema(&self.instance.schema)
                )));
            }
        }

        let metadata = &mut self.instance.metadata;
        self.buf.clear();
        let encoded = encode_partition(
            &metadata.header,
            metadata.wide_local_deletion_time,
            partition,
            &mut self.buf,
        )?;

        write_all_at(&self.data, self.offset, &self.buf, ComponentType::Data).await?;
        self.checksums.update(&self.buf);

        encode_unsigned(partition.key.0.len() as u64, &mut self.index);
        self.index.put_slice(&partition.key.0);
        encode_unsigned(self.offset, &mut self.index);
        self.offset += encoded.size;

        metadata.partitions += 1;
        metadata.rows += encoded.rows.len() as u64;
        metadata.cells += encoded.cells;
        metadata.max_partition_size = metadata.max_partition_size.max(encoded.size);

        if self.first_key.is_none() {
            self.first_key = Some(partition.key.clone());
        }
        self.last_key = Some(partition.key.clone());

        self.handler
            .maybe_report_large_partition(&self.instance, &partition.key, encoded.size)
            .await;
        for row in &encoded.rows {
            self.handler.maybe_report_large_row(
                &self.instance,
                &partition.key,
                row.clustering.as_ref(),
                row.size,
            );
        }
        Ok(())
    }

    async fn write_component(&self, component: ComponentType, contents: &[u8]) -> Result<()> {
        let file = open_sstable_file(
            self.ctx.stats(),
            self.instance.filename(component),
            OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::TRUNCATE,
        )
        .await?;
        let mut result = write_all_at(&file, 0, contents, component).await;
        if result.is_ok() && self.sync {
            result = file.flush().await.map_err(StrataError::from);
        }
        file.close().await?;
        result
    }

    fn summary(&self) -> Vec<u8> {
        let mut summary = BytesMut::new();
        encode_unsigned(self.instance.metadata.partitions, &mut summary);
        for key in [&self.first_key, &self.last_key].into_iter().flatten() {
            encode_unsigned(key.0.len() as u64, &mut summary);
            summary.put_slice(&key.0);
        }
        summary.to_vec()
    }

    /// Write every remaining component and rename TemporaryTOC to TOC.
    async fn publish(&mut self) -> Result<BTreeSet<ComponentType>> {
        if self.sync {
            self.data.flush().await?;
        }
        self.data.close().await?;
        self.data_open = false;

        let checksums = std::mem::take(&mut self.checksums);
        let (digest, crc) = checksums.finish();
        let statistics = self.instance.metadata.encode()?;

        self.write_component(ComponentType::Index, &self.index).await?;
        self.write_component(ComponentType::Summary, &self.summary()).await?;
        self.write_component(ComponentType::Filter, &[]).await?;
        self.write_component(ComponentType::Statistics, &statistics).await?;
        self.write_component(ComponentType::Digest, digest.to_string().as_bytes())
            .await?;
        self.write_component(ComponentType::Crc, &crc).await?;

        let descriptor = &self.instance.descriptor;
        let components = required_components(descriptor.version, false);
        let toc = encode_toc(descriptor.version, &components);
        self.write_component(ComponentType::TemporaryToc, toc.as_bytes())
            .await?;
        if self.sync {
            sync_directory(&descriptor.dir).await?;
        }

        tokio::fs::rename(
            descriptor.filename(ComponentType::TemporaryToc),
            descriptor.filename(ComponentType::Toc),
        )
        .await?;
        Ok(components)
    }

    /// Write the remaining components and publish the instance.
    ///
    /// Fails without leaving anything behind unless the TOC is already in
    /// place, in which case the instance is published and only the marker
    /// cleanup failed.
    pub async fn seal(mut self) -> Result<Sstable> {
        let components = match self.publish().await {
            Ok(components) => components,
            Err(e) => return self.abandon(e).await,
        };

        let descriptor = &self.instance.descriptor;
        if self.sync {
            sync_directory(&descriptor.dir).await?;
        }
        tokio::fs::remove_dir(descriptor.temp_dir()).await?;

        log::info!(
            "Sealed sstable {} ({} partitions, {} bytes)",
            descriptor,
            self.instance.metadata.partitions,
            self.offset
        );
        self.instance.components = components;
        Ok(self.instance)
    }

    /// Give up on the instance and remove whatever was written.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned.
    pub async fn abort(mut self) -> Result<()> {
        let mut result = Ok(());
        if self.data_open {
            result = self.data.close().await.map_err(StrataError::from);
            self.data_open = false;
        }
        for component in ComponentType::ALL {
            if let Err(e) = remove_file(self.ctx.stats(), &self.instance.filename(component)).await {
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }
        match tokio::fs::remove_dir(self.instance.descriptor.temp_dir()).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound && result.is_ok() => {
                result = Err(e.into());
            }
            _ => {}
        }
        log::info!("Aborted sstable {}", self.instance.descriptor);
        result
    }

    /// Abort and return `err`, logging a failed cleanup.
    async fn abandon<T>(self, err: StrataError) -> Result<T> {
        let descriptor = self.instance.descriptor.clone();
        if let Err(e) = self.abort().await {
            log::warn!("Failed to clean up sstable {}: {}", descriptor, e);
        }
        Err(err)
    }
}

/// Write `partitions` as one sealed instance, in key order.
pub async fn write_sstable(
    ctx: &ShardContext,
    config: &Config,
    schema: Arc<Schema>,
    generation: Generation,
    mut partitions: Vec<Partition>,
    handler: Arc<dyn LargeDataHandler>,
) -> Result<Sstable> {
    partitions.sort_by(|a, b| a.key.cmp(&b.key));
    let header = EncodingStats::from_partitions(&partitions).header();

    let mut writer = SstableWriter::create(ctx, config, schema, generation, header, handler).await?;
    for partition in &partitions {
        if let Err(e) = writer.write_partition(partition).await {
            return writer.abandon(e).await;
        }
    }
    writer.seal().await
}
