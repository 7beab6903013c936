//! STRATA - Configuration
//! Defines tunable parameters for writing, loading and reporting on SSTables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::sstables::component::{FormatType, VersionType};

/// Configuration for the SSTable persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base directory holding `<keyspace>/<table>` directories.
    pub data_dir: PathBuf,

    /// Partitions larger than this are reported to the large-data sink.
    pub large_partition_threshold_bytes: u64,

    /// Rows larger than this are logged as large rows.
    pub large_row_threshold_bytes: u64,

    /// Version tag used for newly written instances.
    pub version: VersionType,

    /// Storage format type used for newly written instances.
    pub format: FormatType,

    /// Write 64-bit local deletion times and TTLs instead of 32-bit ones.
    pub wide_local_deletion_time: bool,

    /// Whether to fsync components and directories before publication.
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            large_partition_threshold_bytes: 1000 * 1024 * 1024, // 1000 MB
            large_row_threshold_bytes: 10 * 1024 * 1024,         // 10 MB
            version: VersionType::Mc,
            format: FormatType::Big,
            wide_local_deletion_time: false,
            sync_writes: true,
        }
    }
}

impl Config {
    /// Create a new Config with a custom data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Set the large partition reporting threshold.
    pub fn with_large_partition_threshold(mut self, bytes: u64) -> Self {
        self.large_partition_threshold_bytes = bytes;
        self
    }

    /// Set the large row reporting threshold.
    pub fn with_large_row_threshold(mut self, bytes: u64) -> Self {
        self.large_row_threshold_bytes = bytes;
        self
    }

    /// Set the version tag for new instances.
    pub fn with_version(mut self, version: VersionType) -> Self {
        self.version = version;
        self
    }

    /// Select wide (64-bit) local deletion time encoding.
    pub fn with_wide_local_deletion_time(mut self, wide: bool) -> Self {
        self.wide_local_deletion_time = wide;
        self
    }

    /// Enable or disable fsync before publication.
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Directory holding the instances of one table.
    pub fn table_dir(&self, keyspace: &str, table: &str) -> PathBuf {
        self.data_dir.join(keyspace).join(table)
    }

    /// Check that the configured values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.large_partition_threshold_bytes == 0 {
            return Err(StrataError::Config(
                "large_partition_threshold_bytes must be positive".to_string(),
            ));
        }
        if self.large_row_threshold_bytes == 0 {
            return Err(StrataError::Config(
                "large_row_threshold_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.version, VersionType::Mc);
        assert_eq!(config.format, FormatType::Big);
        assert!(!config.wide_local_deletion_time);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_table_dir() {
        let config = Config::new("/var/lib/strata")
            .with_large_partition_threshold(1000)
            .with_wide_local_deletion_time(true);
        assert_eq!(config.large_partition_threshold_bytes, 1000);
        assert!(config.wide_local_deletion_time);
        assert_eq!(
            config.table_dir("ks", "cf"),
            PathBuf::from("/var/lib/strata/ks/cf")
        );
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = Config::default().with_large_row_threshold(0);
        assert!(matches!(config.validate(), Err(StrataError::Config(_))));
    }
}
