//! STRATA - Table Instance Identity
//! Everything needed to name the files of one table instance:
//! `<dir>/<keyspace>-<table>-<version>-<generation>-<format>-<component>`,
//! plus the `<dir>.<generation>.tmp` directory marking an instance that is
//! still being written.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::component::{ComponentType, FormatType, VersionType};

/// Monotonic per-table instance number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one table instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub dir: PathBuf,
    pub keyspace: String,
    pub table: String,
    pub version: VersionType,
    pub generation: Generation,
    pub format: FormatType,
}

/// Path of `component` for the instance identified by the other arguments.
pub fn filename(
    dir: &Path,
    keyspace: &str,
    table: &str,
    version: VersionType,
    generation: Generation,
    format: FormatType,
    component: ComponentType,
) -> PathBuf {
    dir.join(format!(
        "{}-{}-{}-{}-{}-{}",
        keyspace,
        table,
        version.as_str(),
        generation,
        format.as_str(),
        component.file_name(version)
    ))
}

/// Directory marking generation `generation` of `dir` as being written.
pub fn temp_sst_dir(dir: &Path, generation: Generation) -> PathBuf {
    match (dir.parent(), dir.file_name()) {
        (Some(parent), Some(name)) => {
            parent.join(format!("{}.{}.tmp", name.to_string_lossy(), generation))
        }
        _ => {
            let mut raw = dir.as_os_str().to_os_string();
            raw.push(format!(".{}.tmp", generation));
            PathBuf::from(raw)
        }
    }
}

/// Generation encoded in a temporary directory name next to `table_dir_name`.
pub fn parse_temp_dir_name(table_dir_name: &str, entry_name: &str) -> Option<Generation> {
    entry_name
        .strip_prefix(table_dir_name)?
        .strip_prefix('.')?
        .strip_suffix(".tmp")?
        .parse()
        .ok()
        .map(Generation)
}

impl Descriptor {
    pub fn new(
        dir: impl Into<PathBuf>,
        keyspace: impl Into<String>,
        table: impl Into<String>,
        version: VersionType,
        generation: Generation,
        format: FormatType,
    ) -> Self {
        Self {
            dir: dir.into(),
            keyspace: keyspace.into(),
            table: table.into(),
            version,
            generation,
            format,
        }
    }

    /// Path of one component of this instance.
    pub fn filename(&self, component: ComponentType) -> PathBuf {
        filename(
            &self.dir,
            &self.keyspace,
            &self.table,
            self.version,
            self.generation,
            self.format,
            component,
        )
    }

    /// The writing-in-progress marker directory of this instance.
    pub fn temp_dir(&self) -> PathBuf {
        temp_sst_dir(&self.dir, self.generation)
    }

    /// Parse a component file name found in `dir`.
    ///
    /// Returns `None` for names that do not follow the scheme. Table names
    /// may contain `-`; keyspace names may not.
    pub fn parse(dir: &Path, file_name: &str) -> Option<(Descriptor, ComponentType)> {
        let mut parts = file_name.rsplitn(5, '-');
        let component_name = parts.next()?;
        let format = parts.next()?.parse::<FormatType>().ok()?;
        let generation = parts.next()?.parse::<u64>().ok()?;
        let version = parts.next()?.parse::<VersionType>().ok()?;
        let (keyspace, table) = parts.next()?.split_once('-')?;
        if keyspace.is_empty() || table.is_empty() {
            return None;
        }
        let component = ComponentType::from_file_name(component_name, version)?;

        Some((
            Descriptor::new(
                dir,
                keyspace,
                table,
                version,
                Generation(generation),
                format,
            ),
            component,
        ))
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}#{} ({}, {})",
            self.keyspace, self.table, self.generation, self.version, self.format
        )
    }
}

/// Hands out unique, increasing generations for one table.
#[derive(Debug, Default)]
pub struct GenerationAllocator {
    last: AtomicU64,
}

impl GenerationAllocator {
    /// Allocator whose first generation is `last + 1`.
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn allocate(&self) -> Generation {
        Generation(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Make sure future generations are above one seen on disk.
    pub fn observe(&self, seen: Generation) {
        self.last.fetch_max(seen.0, Ordering::Relaxed);
    }
}
