//! STRATA - SSTable Persistence Layer
//!
//! Encodes, publishes, recovers and reports on the immutable on-disk table
//! instances (SSTables) of a column-family storage engine.
//!
//! ## Features
//! - **Varint codec**: Prefix-length variable-size integers, signed and unsigned
//! - **Delta metadata**: Timestamps, TTLs and deletion times stored against per-instance minimums
//! - **Component sets**: Version-aware required/optional components and TOC validation
//! - **Atomic publication**: Temporary marker + TemporaryTOC rename, purged on recovery
//! - **Instrumented files**: Per-shard open/close/read/write counters
//! - **Large data**: Oversized partition and row reporting through an event sink
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use strata::config::Config;
//! use strata::large_data::NopLargeDataHandler;
//! use strata::sstables::{loader, writer, Generation, ShardContext};
//! use strata::types::{Cell, ClusteringKey, Partition, PartitionKey, Schema};
//!
//! # async fn run() -> strata::error::Result<()> {
//! let config = Config::default();
//! let ctx = ShardContext::new(0);
//! let schema = Arc::new(Schema::new("ks", "cf"));
//!
//! let partition = Partition::new(PartitionKey::from_slice(b"key"))
//!     .with_row(ClusteringKey::from_slice(b"c"), vec![Cell::live(0, 1, "value")]);
//! writer::write_sstable(&ctx, &config, schema.clone(), Generation(1), vec![partition],
//!     Arc::new(NopLargeDataHandler)).await?;
//!
//! let dir = config.table_dir("ks", "cf");
//! let report = loader::scan_table_dir(&ctx, &dir, schema).await?;
//! assert_eq!(report.loadable.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod large_data;
pub mod sstables;
pub mod types;
