//! STRATA - SSTable Loader
//! Startup scan of one table directory.
//!
//! Every generation found is either loaded (sealed and complete), purged
//! (never sealed), or rejected (its files do not form a valid instance).
//! A generation is unsealed when it has no final TOC and either its
//! `<dir>.<generation>.tmp` marker or a TemporaryTOC exists.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::component::{parse_toc, validate_component_set, ComponentType};
use super::descriptor::{parse_temp_dir_name, temp_sst_dir, Descriptor, Generation, GenerationAllocator};
use super::file::{sync_directory, EntryKind, FileHandle, LocalFile, OpenFlags};
use super::header::StatsMetadata;
use super::{read_file, remove_file, ShardContext, Sstable};
use crate::error::{Result, StrataError};
use crate::types::Schema;

/// Outcome of scanning one table directory.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Sealed instances, by increasing generation.
    pub loadable: Vec<Sstable>,
    /// Unsealed generations whose files were deleted.
    pub purged: Vec<Generation>,
    /// Generations excluded because their files are not a valid instance.
    pub rejected: Vec<(Generation, StrataError)>,
    /// Highest generation seen, including purged and rejected ones.
    pub max_generation: Option<Generation>,
}

impl ScanReport {
    /// Allocator whose generations never collide with anything seen on disk.
    pub fn generation_allocator(&self) -> GenerationAllocator {
        GenerationAllocator::starting_after(self.max_generation.map_or(0, |g| g.0))
    }
}

/// Files of one generation found in the table directory.
struct Found {
    descriptor: Descriptor,
    components: BTreeSet<ComponentType>,
}

async fn list(dir: &Path) -> io::Result<Vec<super::file::DirEntry>> {
    match LocalFile::open(dir, OpenFlags::READ).await {
        Ok(handle) => handle.list_directory().await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Generations with a writing-in-progress marker next to `dir`.
async fn temp_generations(dir: &Path) -> io::Result<BTreeSet<Generation>> {
    let (parent, name) = match (dir.parent(), dir.file_name()) {
        (Some(parent), Some(name)) => (parent, name.to_string_lossy().into_owned()),
        _ => return Ok(BTreeSet::new()),
    };
    Ok(list(parent)
        .await?
        .into_iter()
        .filter(|e| e.kind == EntryKind::Directory)
        .filter_map(|e| parse_temp_dir_name(&name, &e.name))
        .collect())
}

async fn remove_temp_dir(dir: &Path, generation: Generation) -> io::Result<()> {
    match tokio::fs::remove_dir_all(temp_sst_dir(dir, generation)).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn purge(ctx: &ShardContext, dir: &Path, generation: Generation, found: Option<&Found>) -> Result<()> {
    if let Some(found) = found {
        for component in &found.components {
            remove_file(ctx.stats(), &found.descriptor.filename(*component)).await?;
        }
        sync_directory(dir).await?;
    }
    remove_temp_dir(dir, generation).await?;
    log::info!(
        "Purged unsealed sstable generation {} in {}",
        generation,
        dir.display()
    );
    Ok(())
}

/// Load a sealed instance whose files on disk are `on_disk`.
pub async fn load_sstable(
    ctx: &ShardContext,
    descriptor: Descriptor,
    schema: Arc<Schema>,
    on_disk: &BTreeSet<ComponentType>,
) -> Result<Sstable> {
    let generation = descriptor.generation.0;
    let raw_toc = read_file(ctx.stats(), &descriptor.filename(ComponentType::Toc)).await?;
    let toc = std::str::from_utf8(&raw_toc).map_err(|_| StrataError::ComponentIntegrity {
        generation,
        reason: "TOC is not valid UTF-8".to_string(),
    })?;
    let components = parse_toc(generation, descriptor.version, toc)?;
    validate_component_set(generation, descriptor.version, &components)?;

    let missing: Vec<_> = components.difference(on_disk).map(|c| c.to_string()).collect();
    let unlisted: Vec<_> = on_disk.difference(&components).map(|c| c.to_string()).collect();
    if !missing.is_empty() || !unlisted.is_empty() {
        return Err(StrataError::ComponentIntegrity {
            generation,
            reason: format!(
                "files do not match TOC (missing: [{}], not listed: [{}])",
                missing.join(", "),
                unlisted.join(", ")
            ),
        });
    }

    let raw_stats = read_file(ctx.stats(), &descriptor.filename(ComponentType::Statistics)).await?;
    let metadata = StatsMetadata::decode(&raw_stats)?;
    Ok(Sstable::new(descriptor, schema, metadata, components))
}

/// Recover and load every instance of `schema`'s table stored in `dir`.
pub async fn scan_table_dir(ctx: &ShardContext, dir: &Path, schema: Arc<Schema>) -> Result<ScanReport> {
    let mut found: BTreeMap<Generation, Found> = BTreeMap::new();
    for entry in list(dir).await? {
        if entry.kind != EntryKind::File {
            continue;
        }
        let Some((descriptor, component)) = Descriptor::parse(dir, &entry.name) else {
            log::debug!("Ignoring {} in {}", entry.name, dir.display());
            continue;
        };
        if descriptor.keyspace != schema.keyspace || descriptor.table != schema.table {
            log::warn!("Ignoring foreign sstable file {} in {}", entry.name, dir.display());
            continue;
        }
        found
            .entry(descriptor.generation)
            .or_insert_with(|| Found {
                descriptor,
                components: BTreeSet::new(),
            })
            .components
            .insert(component);
    }
    let markers = temp_generations(dir).await?;

    let generations: BTreeSet<Generation> = found.keys().chain(markers.iter()).copied().collect();
    let mut report = ScanReport {
        max_generation: generations.iter().next_back().copied(),
        ..Default::default()
    };

    for generation in generations {
        let mut entry = found.remove(&generation);
        let sealed = entry
            .as_ref()
            .map_or(false, |f| f.components.contains(&ComponentType::Toc));

        if !sealed {
            let unsealed = markers.contains(&generation)
                || entry
                    .as_ref()
                    .map_or(false, |f| f.components.contains(&ComponentType::TemporaryToc));
            if unsealed {
                purge(ctx, dir, generation, entry.as_ref()).await?;
                report.purged.push(generation);
            } else {
                let err = StrataError::ComponentIntegrity {
                    generation: generation.0,
                    reason: "no TOC".to_string(),
                };
                log::warn!("Skipping sstable in {}: {}", dir.display(), err);
                report.rejected.push((generation, err));
            }
            continue;
        }

        let Some(files) = entry.as_mut() else {
            continue;
        };
        if markers.contains(&generation) {
            remove_temp_dir(dir, generation).await?;
            log::debug!("Removed stale marker for sealed generation {}", generation);
        }
        for stale in [ComponentType::TemporaryToc, ComponentType::TemporaryStatistics] {
            if files.components.remove(&stale) {
                remove_file(ctx.stats(), &files.descriptor.filename(stale)).await?;
                log::info!("Removed stale {} of {}", stale, files.descriptor);
            }
        }

        match load_sstable(ctx, files.descriptor.clone(), schema.clone(), &files.components).await {
            Ok(sst) => {
                log::debug!("Loaded sstable {}", sst.descriptor());
                report.loadable.push(sst);
            }
            Err(err) if err.is_corruption() => {
                log::warn!("Skipping sstable {}: {}", files.descriptor, err);
                report.rejected.push((generation, err));
            }
            Err(err) => return Err(err),
        }
    }

    log::info!(
        "Scanned {}: {} loadable, {} purged, {} rejected",
        dir.display(),
        report.loadable.len(),
        report.purged.len(),
        report.rejected.len()
    );
    Ok(report)
}
