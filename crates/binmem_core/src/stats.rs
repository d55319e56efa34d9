//! Store statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! use binmem_core::BinMemory;
//!
//! let store = BinMemory::open_in_memory()?;
//! store.add_entry("users", "u1", "Alice", None, None)?;
//!
//! let stats = store.stats();
//! println!("appends: {}", stats.appends);
//! println!("live entries: {}", stats.live_entries);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct StoreStats {
    appends: AtomicU64,
    bytes_appended: AtomicU64,
    reads: AtomicU64,
    bytes_read: AtomicU64,
    queries: AtomicU64,
    removals: AtomicU64,
    compactions: AtomicU64,
    bytes_reclaimed: AtomicU64,
    exports: AtomicU64,
    imports: AtomicU64,
    errors: AtomicU64,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_append(&self, bytes: u64) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self, bytes_saved: u64) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
        self.bytes_reclaimed.fetch_add(bytes_saved, Ordering::Relaxed);
    }

    pub(crate) fn record_export(&self) {
        self.exports.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_import(&self) {
        self.imports.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of successful appends.
    pub fn appends(&self) -> u64 {
        self.appends.load(Ordering::Relaxed)
    }

    /// Returns the number of records read from the log.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of errors returned to callers.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of the counters combined with the current sizes.
    pub(crate) fn snapshot(&self, gauges: StoreGauges) -> StatsSnapshot {
        StatsSnapshot {
            appends: self.appends(),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            reads: self.reads(),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            bytes_reclaimed: self.bytes_reclaimed.load(Ordering::Relaxed),
            exports: self.exports.load(Ordering::Relaxed),
            imports: self.imports.load(Ordering::Relaxed),
            errors: self.errors(),
            live_entries: gauges.live_entries,
            tombstones: gauges.tombstones,
            log_bytes: gauges.log_bytes,
            live_bytes: gauges.live_bytes,
        }
    }
}

/// Sizes read from the manifest and log when a snapshot is taken.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StoreGauges {
    pub live_entries: u64,
    pub tombstones: u64,
    pub log_bytes: u64,
    pub live_bytes: u64,
}

/// A point-in-time snapshot of store statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Successful appends, imports included.
    pub appends: u64,
    /// Bytes appended to the log.
    pub bytes_appended: u64,
    /// Records read from the log.
    pub reads: u64,
    /// Bytes read from the log.
    pub bytes_read: u64,
    /// Calls to the filtering and predicate reads.
    pub queries: u64,
    /// Successful removals.
    pub removals: u64,
    /// Completed compactions.
    pub compactions: u64,
    /// Bytes reclaimed by compaction.
    pub bytes_reclaimed: u64,
    /// Completed exports.
    pub exports: u64,
    /// Completed imports.
    pub imports: u64,
    /// Errors returned to callers.
    pub errors: u64,
    /// Live entries in the manifest.
    pub live_entries: u64,
    /// Removed entries awaiting compaction.
    pub tombstones: u64,
    /// Current size of the log.
    pub log_bytes: u64,
    /// Bytes of the log occupied by live records.
    pub live_bytes: u64,
}

impl StatsSnapshot {
    /// Bytes a compaction would reclaim right now.
    #[must_use]
    pub fn reclaimable_bytes(&self) -> u64 {
        self.log_bytes.saturating_sub(self.live_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = StoreStats::new();
        assert_eq!(stats.appends(), 0);
        assert_eq!(stats.reads(), 0);
        assert_eq!(stats.snapshot(StoreGauges::default()), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = StoreStats::new();

        stats.record_append(100);
        stats.record_append(50);
        stats.record_read(40);
        stats.record_removal();
        stats.record_compaction(30);

        let snap = stats.snapshot(StoreGauges {
            live_entries: 1,
            tombstones: 0,
            log_bytes: 120,
            live_bytes: 50,
        });
        assert_eq!(snap.appends, 2);
        assert_eq!(snap.bytes_appended, 150);
        assert_eq!(snap.reads, 1);
        assert_eq!(snap.bytes_read, 40);
        assert_eq!(snap.removals, 1);
        assert_eq!(snap.bytes_reclaimed, 30);
        assert_eq!(snap.reclaimable_bytes(), 70);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(StoreStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_append(1);
                        s.record_read(1);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.appends(), 800);
        assert_eq!(stats.reads(), 800);
    }
}
