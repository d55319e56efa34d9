//! Stress tests for BinMem.
//!
//! These tests verify behavior under heavy load and concurrent access.

use binmem_core::{BinMemory, Channel, EntryId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Size of entry values in bytes.
    pub value_size: usize,
    /// Number of entries to pre-populate for read tests.
    pub entry_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 256,
            entry_count: 1_000,
        }
    }
}

fn populate(store: &BinMemory, config: &StressConfig) -> Vec<EntryId> {
    let value = "x".repeat(config.value_size);
    (0..config.entry_count)
        .filter_map(|i| {
            store
                .add_entry("stress", format!("k{i}"), value.as_str(), None, None)
                .ok()
        })
        .collect()
}

/// Run a sequential write stress test.
pub fn stress_sequential_writes(store: &BinMemory, config: &StressConfig) -> StressTestResult {
    let value = "x".repeat(config.value_size);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match store.add_entry("stress", format!("k{i}"), value.as_str(), None, None) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a sequential point-read stress test.
pub fn stress_sequential_reads(store: &BinMemory, config: &StressConfig) -> StressTestResult {
    let ids = populate(store, config);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let Some(id) = ids.get(i % ids.len().max(1)) else {
            failed += 1;
            continue;
        };
        match store.get_entry_by_id(id) {
            Ok(Some(_)) => successful += 1,
            Ok(None) | Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed add/read/remove stress test, compacting every 1000 operations.
pub fn stress_mixed_operations(store: &BinMemory, config: &StressConfig) -> StressTestResult {
    let value = "x".repeat(config.value_size);
    let mut live: Vec<EntryId> = Vec::new();

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let result = match i % 3 {
            0 => store
                .add_entry("stress", format!("k{i}"), value.as_str(), None, Some(Channel::InputOutput))
                .map(|id| live.push(id)),
            1 => store.get_entries(Some("stress"), None).map(|_| ()),
            _ => match live.pop() {
                Some(id) => store.remove_entry(&id).map(|_| ()),
                None => Ok(()),
            },
        };

        let result = if i % 1000 == 999 {
            result.and_then(|()| store.compact().map(|_| ()))
        } else {
            result
        };

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent read stress test.
pub fn stress_concurrent_reads(store: Arc<BinMemory>, config: &StressConfig) -> StressTestResult {
    let ids = Arc::new(populate(&store, config));
    if ids.is_empty() {
        return StressTestResult::new(0, 0, Duration::ZERO);
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let ids = Arc::clone(&ids);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let id = ids[(t * ops_per_thread + i) % ids.len()];
                    match store.get_entry_by_id(&id) {
                        Ok(Some(_)) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(None) | Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run concurrent writers alongside a reader, with one compaction in the middle.
pub fn stress_concurrent_writes(store: Arc<BinMemory>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;
    let value = Arc::new("x".repeat(config.value_size));

    let start = Instant::now();

    let mut handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let value = Arc::clone(&value);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    match store.add_entry("stress", format!("{t}:{i}"), value.as_str(), None, None) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    let compactor = Arc::clone(&store);
    handles.push(thread::spawn(move || {
        for _ in 0..10 {
            let _ = compactor.get_entries(Some("stress"), None);
        }
        let _ = compactor.compact();
    }));

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
