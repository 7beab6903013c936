//! STRATA - Shard Statistics
//! Counters for SSTable file activity and large-data events.
//!
//! One `SstableStats` block belongs to one execution shard and is handed
//! around through [`super::ShardContext`]; there is no process-wide global.
//! Counters only grow, except the in-flight gauges which fall back as
//! operations complete.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::file::OpenFlags;

/// File lifecycle counters.
#[derive(Debug, Default)]
pub struct FileStats {
    /// Files opened with the create flag.
    pub created: AtomicU64,
    /// Files opened for write (write-only or read-write).
    pub opened_w: AtomicU64,
    /// Files opened for read only.
    pub opened_r: AtomicU64,
    /// Files closed after being opened for write.
    pub closed_w: AtomicU64,
    /// Files closed after being opened for read.
    pub closed_r: AtomicU64,
    /// Component files removed.
    pub removed: AtomicU64,
}

/// Positioned I/O counters.
#[derive(Debug, Default)]
pub struct IoStats {
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    pub reads_in_flight: AtomicU64,
    pub writes_in_flight: AtomicU64,
}

/// Large-data detector counters.
#[derive(Debug, Default)]
pub struct LargeDataStats {
    pub partitions_bigger_than_threshold: AtomicU64,
}

/// All SSTable counters of one shard.
#[derive(Debug, Default)]
pub struct SstableStats {
    pub files: FileStats,
    pub io: IoStats,
    pub large_data: LargeDataStats,
}

/// Point-in-time copy of [`SstableStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub created: u64,
    pub opened_w: u64,
    pub opened_r: u64,
    pub closed_w: u64,
    pub closed_r: u64,
    pub removed: u64,
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub reads_in_flight: u64,
    pub writes_in_flight: u64,
    pub partitions_bigger_than_threshold: u64,
}

/// Decrements an in-flight gauge when dropped, including on cancellation.
pub struct InFlightGuard<'a> {
    gauge: &'a AtomicU64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::Relaxed);
    }
}

impl SstableStats {
    /// Create a new stats block with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an open (or duplication) of a file with `flags`.
    pub fn submit_open(&self, flags: OpenFlags) {
        if flags.contains(OpenFlags::CREATE) {
            self.files.created.fetch_add(1, Ordering::Relaxed);
        }
        if flags.is_writable() {
            self.files.opened_w.fetch_add(1, Ordering::Relaxed);
        } else {
            self.files.opened_r.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a successful close of a file opened with `flags`.
    pub fn submit_close(&self, flags: OpenFlags) {
        if flags.is_writable() {
            self.files.closed_w.fetch_add(1, Ordering::Relaxed);
        } else {
            self.files.closed_r.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a component file removal.
    pub fn record_removal(&self) {
        self.files.removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the start of a read; the guard ends it.
    pub fn start_read(&self) -> InFlightGuard<'_> {
        self.io.reads.fetch_add(1, Ordering::Relaxed);
        self.io.reads_in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            gauge: &self.io.reads_in_flight,
        }
    }

    /// Record the start of a write; the guard ends it.
    pub fn start_write(&self) -> InFlightGuard<'_> {
        self.io.writes.fetch_add(1, Ordering::Relaxed);
        self.io.writes_in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            gauge: &self.io.writes_in_flight,
        }
    }

    pub fn record_bytes_read(&self, bytes: usize) {
        self.io.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_bytes_written(&self, bytes: usize) {
        self.io.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a partition above the large-data threshold.
    pub fn record_large_partition(&self) {
        self.large_data
            .partitions_bigger_than_threshold
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            created: load(&self.files.created),
            opened_w: load(&self.files.opened_w),
            opened_r: load(&self.files.opened_r),
            closed_w: load(&self.files.closed_w),
            closed_r: load(&self.files.closed_r),
            removed: load(&self.files.removed),
            reads: load(&self.io.reads),
            writes: load(&self.io.writes),
            bytes_read: load(&self.io.bytes_read),
            bytes_written: load(&self.io.bytes_written),
            reads_in_flight: load(&self.io.reads_in_flight),
            writes_in_flight: load(&self.io.writes_in_flight),
            partitions_bigger_than_threshold: load(
                &self.large_data.partitions_bigger_than_threshold,
            ),
        }
    }

    /// Format the counters as a human-readable report.
    pub fn report(&self) -> String {
        let s = self.snapshot();
        format!(
            "═══ STRATA SSTable Stats ═══\n\
             Files:\n\
               created:   {}\n\
               opened:    {} write / {} read\n\
               closed:    {} write / {} read\n\
               removed:   {}\n\
             I/O:\n\
               reads:     {} ({} bytes, {} in flight)\n\
               writes:    {} ({} bytes, {} in flight)\n\
             Large data:\n\
               partitions over threshold: {}",
            s.created,
            s.opened_w,
            s.opened_r,
            s.closed_w,
            s.closed_r,
            s.removed,
            s.reads,
            s.bytes_read,
            s.reads_in_flight,
            s.writes,
            s.bytes_written,
            s.writes_in_flight,
            s.partitions_bigger_than_threshold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_accounting() {
        let stats = SstableStats::new();

        stats.submit_open(OpenFlags::CREATE | OpenFlags::WRITE);
        stats.submit_open(OpenFlags::READ);
        stats.submit_open(OpenFlags::READ | OpenFlags::WRITE);
        stats.submit_close(OpenFlags::CREATE | OpenFlags::WRITE);
        stats.submit_close(OpenFlags::READ);

        let s = stats.snapshot();
        assert_eq!(s.created, 1);
        assert_eq!(s.opened_w, 2);
        assert_eq!(s.opened_r, 1);
        assert_eq!(s.closed_w, 1);
        assert_eq!(s.closed_r, 1);
    }

    #[test]
    fn test_in_flight_guards() {
        let stats = SstableStats::new();
        {
            let _r = stats.start_read();
            let _w = stats.start_write();
            let s = stats.snapshot();
            assert_eq!(s.reads_in_flight, 1);
            assert_eq!(s.writes_in_flight, 1);
        }
        let s = stats.snapshot();
        assert_eq!(s.reads, 1);
        assert_eq!(s.writes, 1);
        assert_eq!(s.reads_in_flight, 0);
        assert_eq!(s.writes_in_flight, 0);
    }

    #[test]
    fn test_independent_blocks() {
        let a = SstableStats::new();
        let b = SstableStats::new();
        a.record_removal();
        a.record_large_partition();
        assert_eq!(a.snapshot().removed, 1);
        assert_eq!(a.snapshot().partitions_bigger_than_threshold, 1);
        assert_eq!(b.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_report_format() {
        let stats = SstableStats::new();
        stats.record_bytes_written(10);
        let report = stats.report();
        assert!(report.contains("created:"));
        assert!(report.contains("10 bytes"));
    }
}
