//! Store configuration.

use std::time::Duration;

/// How [`crate::BinMemory::import`] combines a snapshot with existing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Append snapshot entries whose id the store has never seen.
    ///
    /// Ids already present, live or removed, are skipped, so importing the
    /// same snapshot twice is a no-op.
    #[default]
    Merge,
    /// Discard every existing entry and load exactly the snapshot.
    Replace,
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the log file if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to `fsync` the log after every append (safer but slower).
    ///
    /// When false, appends are only flushed to the OS.
    pub sync_on_append: bool,

    /// Whether to keep the manifest sidecar file up to date.
    ///
    /// The sidecar is what makes removals survive a restart before the next
    /// compaction.
    pub persist_manifest: bool,

    /// Default policy for [`crate::BinMemory::import`].
    pub import_mode: ImportMode,

    /// How long a mutating call waits for the writer lock.
    ///
    /// `None` waits indefinitely; `Some` fails with
    /// [`crate::CoreError::ConcurrentAccess`] once the timeout elapses.
    pub lock_timeout: Option<Duration>,

    /// Initial read window when scanning the log.
    pub scan_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_append: true,
            persist_manifest: true,
            import_mode: ImportMode::Merge,
            lock_timeout: None,
            scan_chunk_size: 64 * 1024,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the log if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the log on every append.
    #[must_use]
    pub const fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Sets whether to maintain the manifest sidecar.
    #[must_use]
    pub const fn persist_manifest(mut self, value: bool) -> Self {
        self.persist_manifest = value;
        self
    }

    /// Sets the default import policy.
    #[must_use]
    pub const fn import_mode(mut self, mode: ImportMode) -> Self {
        self.import_mode = mode;
        self
    }

    /// Fails mutating calls that wait longer than `timeout` for the writer lock.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Sets the initial scan window.
    #[must_use]
    pub const fn scan_chunk_size(mut self, size: usize) -> Self {
        self.scan_chunk_size = size;
        self
    }
}
