//! Crash recovery testing for BinMem.
//!
//! This module provides utilities for testing crash recovery behavior.
//! It simulates crashes at various points during writes and verifies
//! that the store recovers correctly on the next open.
//!
//! ## Test Strategy
//!
//! 1. **Crash mid-append** - A torn final record is discarded
//! 2. **Crash after append** - Synced records survive without a sidecar
//! 3. **Crash during compaction** - A leftover compaction file is ignored
//! 4. **Stale sidecar** - A sidecar that no longer matches the log is rebuilt
//!
//! ## Usage
//!
//! ```rust,ignore
//! use binmem_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new()?;
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use binmem_codec::{encode_record, BinEntry, EntryId};
use binmem_core::BinMemory;
use binmem_storage::{StorageBackend, StorageError, StorageResult};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected entries after recovery.
    pub expected_entries: usize,
    /// Actual entries after recovery.
    pub actual_entries: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, entries: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_entries: entries,
            actual_entries: entries,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_entries: expected,
            actual_entries: actual,
            error: Some(error.to_string()),
        }
    }
}

/// Shared switches for a [`CrashableBackend`].
///
/// The backend moves into the store, so tests keep this handle to
/// arm crashes while the store is running.
#[derive(Debug)]
pub struct CrashControl {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
    one_shot: AtomicBool,
}

impl CrashControl {
    fn new() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
            one_shot: AtomicBool::new(false),
        }
    }

    /// Crashes once `bytes` more bytes have been appended.
    ///
    /// The append that crosses the limit writes only the bytes up to it.
    pub fn crash_after(&self, bytes: usize) {
        self.one_shot.store(false, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Like [`CrashControl::crash_after`], but only the crossing append
    /// fails. Later appends succeed, as after a transient I/O error.
    pub fn crash_once_after(&self, bytes: usize) {
        self.crash_after(bytes);
        self.one_shot.store(true, Ordering::SeqCst);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
        self.one_shot.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn trip(&self) {
        self.crashed.store(true, Ordering::SeqCst);
        if self.one_shot.swap(false, Ordering::SeqCst) {
            self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        }
    }

    fn check_sync(&self, what: &str) -> StorageResult<()> {
        if self.fail_on_sync.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated(what));
        }
        Ok(())
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(io::Error::other(format!("simulated crash during {what}")))
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: Arc<CrashControl>,
}

impl CrashableBackend {
    /// Wraps `inner` and returns the handle that controls it.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, Arc<CrashControl>) {
        let control = Arc::new(CrashControl::new());
        let backend = Self {
            inner,
            control: Arc::clone(&control),
        };
        (backend, control)
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let control = &self.control;
        let current = control.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        let crash_threshold = control.crash_after_bytes.load(Ordering::SeqCst);

        if current >= crash_threshold {
            control.trip();
            return Err(simulated("write"));
        }

        // Check if this write will cross the crash threshold
        if current + bytes.len() > crash_threshold {
            control.trip();
            let partial_len = crash_threshold - current;
            if partial_len > 0 {
                let _ = self.inner.append(&bytes[..partial_len]);
            }
            return Err(simulated("partial write"));
        }

        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.control.check_sync("flush")?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.control.check_sync("sync")?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// Cuts the file at `path` down to `len` bytes.
pub fn truncate_file(path: &Path, len: u64) -> io::Result<()> {
    OpenOptions::new().write(true).open(path)?.set_len(len)
}

/// Appends the first `keep` bytes of an encoded record, as a crash mid-append would.
pub fn append_torn_record(path: &Path, entry: &BinEntry, keep: usize) -> io::Result<()> {
    let bytes = encode_record(entry);
    let keep = keep.min(bytes.len().saturating_sub(1));
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(&bytes[..keep])?;
    file.sync_all()
}

/// Flips every bit of the byte at `offset`.
pub fn corrupt_byte(path: &Path, offset: usize) -> io::Result<()> {
    let mut data = fs::read(path)?;
    let byte = data
        .get_mut(offset)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset past end of file"))?;
    *byte ^= 0xFF;
    fs::write(path, data)
}

/// Returns `<log><suffix>`, the path of a file kept next to the log.
pub fn sibling_path(log: &Path, suffix: &str) -> PathBuf {
    let mut name = log.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    dir: TempDir,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a new harness with a temporary directory.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
            results: Vec::new(),
        })
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.log"))
    }

    fn record(&mut self, description: &str, expected: usize, outcome: Result<usize, String>) -> CrashRecoveryResult {
        let result = match outcome {
            Ok(actual) if actual == expected => CrashRecoveryResult::pass(description, actual),
            Ok(actual) => CrashRecoveryResult::fail(description, expected, actual, "entry count mismatch"),
            Err(e) => CrashRecoveryResult::fail(description, expected, 0, &e),
        };
        self.results.push(result.clone());
        result
    }

    /// Tests that synced entries survive a crash that left no sidecar.
    pub fn test_synced_entries_survive(&mut self) -> CrashRecoveryResult {
        let log = self.log_path("synced");
        let crashed = self.log_path("synced-crashed");
        let outcome = (|| -> Result<usize, String> {
            let store = BinMemory::open(&log).map_err(|e| e.to_string())?;
            for i in 0..10 {
                store
                    .add_entry("crash", format!("k{i}"), "v", None, None)
                    .map_err(|e| e.to_string())?;
            }
            // Copy while the store is live: the log as a crash would leave it.
            fs::copy(&log, &crashed).map_err(|e| e.to_string())?;
            drop(store);

            let recovered = BinMemory::open(&crashed).map_err(|e| e.to_string())?;
            Ok(recovered.len())
        })();
        self.record("Synced entries survive a crash", 10, outcome)
    }

    /// Tests that a torn final record is discarded and the log stays writable.
    pub fn test_torn_tail_discarded(&mut self) -> CrashRecoveryResult {
        let log = self.log_path("torn");
        let outcome = (|| -> Result<usize, String> {
            {
                let store = BinMemory::open(&log).map_err(|e| e.to_string())?;
                for i in 0..5 {
                    store
                        .add_entry("crash", format!("k{i}"), "v", None, None)
                        .map_err(|e| e.to_string())?;
                }
            }
            let clean_len = fs::metadata(&log).map_err(|e| e.to_string())?.len();
            let torn = BinEntry::new(EntryId::new(), "crash", "torn", "lost");
            append_torn_record(&log, &torn, 20).map_err(|e| e.to_string())?;

            let store = BinMemory::open(&log).map_err(|e| e.to_string())?;
            if store.is_read_only() {
                return Err("store opened read-only after a torn tail".to_string());
            }
            let len = fs::metadata(&log).map_err(|e| e.to_string())?.len();
            if len != clean_len {
                return Err(format!("log is {len} bytes, expected {clean_len}"));
            }
            store
                .add_entry("crash", "after", "v", None, None)
                .map_err(|e| e.to_string())?;
            Ok(store.len())
        })();
        self.record("Torn tail is discarded", 6, outcome)
    }

    /// Tests that a leftover compaction file does not affect the store.
    pub fn test_crash_during_compaction(&mut self) -> CrashRecoveryResult {
        let log = self.log_path("compact");
        let outcome = (|| -> Result<usize, String> {
            {
                let store = BinMemory::open(&log).map_err(|e| e.to_string())?;
                let first = store
                    .add_entry("crash", "k0", "v", None, None)
                    .map_err(|e| e.to_string())?;
                store
                    .add_entry("crash", "k1", "v", None, None)
                    .map_err(|e| e.to_string())?;
                store.remove_entry(&first).map_err(|e| e.to_string())?;
            }
            let leftover = sibling_path(&log, ".compact");
            fs::write(&leftover, b"half-written compaction output").map_err(|e| e.to_string())?;

            let store = BinMemory::open(&log).map_err(|e| e.to_string())?;
            if leftover.exists() {
                return Err("leftover compaction file was not removed".to_string());
            }
            Ok(store.len())
        })();
        self.record("Interrupted compaction is discarded", 1, outcome)
    }

    /// Tests that a sidecar covering more than the log is rebuilt.
    pub fn test_stale_sidecar_rebuilt(&mut self) -> CrashRecoveryResult {
        let log = self.log_path("stale");
        let outcome = (|| -> Result<usize, String> {
            let keep = {
                let store = BinMemory::open(&log).map_err(|e| e.to_string())?;
                let first = store
                    .add_entry("crash", "k0", "v", None, None)
                    .map_err(|e| e.to_string())?;
                for i in 1..4 {
                    store
                        .add_entry("crash", format!("k{i}"), "v", None, None)
                        .map_err(|e| e.to_string())?;
                }
                let info = store
                    .entry_info(&first)
                    .map_err(|e| e.to_string())?
                    .ok_or("first entry missing")?;
                info.end()
            };
            truncate_file(&log, keep).map_err(|e| e.to_string())?;

            let store = BinMemory::open(&log).map_err(|e| e.to_string())?;
            Ok(store.len())
        })();
        self.record("Stale sidecar is rebuilt from the log", 1, outcome)
    }

    /// Tests that removals survive a reopen.
    pub fn test_removal_survives_reopen(&mut self) -> CrashRecoveryResult {
        let log = self.log_path("removal");
        let outcome = (|| -> Result<usize, String> {
            {
                let store = BinMemory::open(&log).map_err(|e| e.to_string())?;
                let ids = (0..3)
                    .map(|i| store.add_entry("crash", format!("k{i}"), "v", None, None))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| e.to_string())?;
                store.remove_entry(&ids[1]).map_err(|e| e.to_string())?;
            }
            let store = BinMemory::open(&log).map_err(|e| e.to_string())?;
            Ok(store.len())
        })();
        self.record("Removal survives reopen", 2, outcome)
    }

    /// Runs all crash recovery tests.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        vec![
            self.test_synced_entries_survive(),
            self.test_torn_tail_discarded(),
            self.test_crash_during_compaction(),
            self.test_stale_sidecar_rebuilt(),
            self.test_removal_survives_reopen(),
        ]
    }

    /// Returns a summary of all test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "Crash Recovery Tests: {}/{} passed\n",
            passed,
            self.results.len()
        );

        for result in &self.results {
            let status = if result.passed { "✓" } else { "✗" };
            summary.push_str(&format!(
                "  {} {} (expected {}, got {})\n",
                status, result.description, result.expected_entries, result.actual_entries
            ));
            if let Some(ref err) = result.error {
                summary.push_str(&format!("    Error: {}\n", err));
            }
        }

        summary
    }

    /// Returns true if all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}
