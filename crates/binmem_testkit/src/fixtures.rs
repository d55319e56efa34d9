//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and common test scenarios.

use binmem_core::{BinMemory, Config};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: BinMemory,
    log_path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: BinMemory::open_in_memory().expect("Failed to open in-memory store"),
            log_path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test store.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a new file-based test store with a custom configuration.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log_path = temp_dir.path().join("bin.log");
        let store = BinMemory::open_with_config(&log_path, config).expect("Failed to open file store");

        Self {
            store,
            log_path: Some(log_path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the log path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Closes the store and opens the same log again.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores, which do not survive a close.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            log_path,
            _temp_dir,
        } = self;
        let log_path = log_path.expect("Only file stores can be reopened");
        let config = store.config().clone();
        store.close().expect("Failed to close store");
        drop(store);

        let store = BinMemory::open_with_config(&log_path, config).expect("Failed to reopen store");
        Self {
            store,
            log_path: Some(log_path),
            _temp_dir,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = BinMemory;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust,ignore
/// use binmem_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         store.add_entry("users", "u1", "Alice", None, None).unwrap();
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&BinMemory) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary file-based store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&BinMemory, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store.path().expect("File store should have a path").to_path_buf();
    f(&test_store.store, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use binmem_core::{Channel, EntryId};

    /// Paths used by [`populated_store`], cycled in order.
    pub const PATHS: [&str; 3] = ["users", "orders", "errors"];

    /// Creates a store with `entry_count` entries spread across [`PATHS`].
    ///
    /// Entries under `errors` go to the error channel, the rest to input/output.
    pub fn populated_store(entry_count: usize) -> TestStore {
        let test_store = TestStore::memory();
        populate(&test_store.store, entry_count);
        test_store
    }

    /// Adds `entry_count` entries spread across [`PATHS`].
    pub fn populate(store: &BinMemory, entry_count: usize) -> Vec<EntryId> {
        (0..entry_count)
            .map(|i| {
                let path = PATHS[i % PATHS.len()];
                let channel = if path == "errors" {
                    Channel::ErrorLog
                } else {
                    Channel::InputOutput
                };
                store
                    .add_entry(path, format!("k{i}"), format!("value {i}"), None, Some(channel))
                    .expect("Failed to add entry")
            })
            .collect()
    }

    /// Creates a file store holding two users, Alice then Bob.
    pub fn users_store() -> (TestStore, EntryId, EntryId) {
        let test_store = TestStore::file();
        let alice = test_store
            .add_entry("users", "u1", "Alice", None, Some(Channel::InputOutput))
            .expect("Failed to add Alice");
        let bob = test_store
            .add_entry("users", "u2", "Bob", None, Some(Channel::InputOutput))
            .expect("Failed to add Bob");
        (test_store, alice, bob)
    }
}
