//! Store facade and recovery.

use crate::compaction::{CompactionResult, Compactor};
use crate::config::{Config, ImportMode};
use crate::dir::StoreFiles;
use crate::error::{CoreError, CoreResult};
use crate::manifest::{EntryFilter, Manifest, ManifestRecord};
use crate::query::{verify_record, QueryEngine};
use crate::scan::ScanReport;
use crate::snapshot::{
    read_snapshot_file, select_for_import, write_snapshot_file, ExportResult, ImportResult,
    SnapshotBuilder,
};
use crate::stats::{StatsSnapshot, StoreGauges, StoreStats};
use binmem_codec::{
    encode_record, BinEntry, Channel, EntryId, EntryType, Metadata, Timestamp, MAX_FIELD_LEN,
};
use binmem_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::path::Path;
use tracing::{debug, info, warn};

/// An entry to be added to the store.
///
/// The store assigns the id and the creation time.
///
/// ```rust,ignore
/// let id = store.add(
///     NewEntry::new("users", "u1", "Alice")
///         .channel(Channel::InputOutput)
///         .metadata_pair("source", "signup"),
/// )?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    path: String,
    key: String,
    value: String,
    metadata: Metadata,
    channel: Channel,
    entry_type: EntryType,
}

impl NewEntry {
    /// Creates a plain entry on the `Other` channel with no metadata.
    pub fn new(path: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            value: value.into(),
            metadata: Metadata::new(),
            channel: Channel::default(),
            entry_type: EntryType::PLAIN,
        }
    }

    /// Sets the metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds one metadata pair.
    #[must_use]
    pub fn metadata_pair(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the channel.
    #[must_use]
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    /// Sets the entry type.
    #[must_use]
    pub fn entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    fn into_entry(self, id: EntryId) -> BinEntry {
        BinEntry {
            id,
            entry_type: self.entry_type,
            channel: self.channel,
            timestamp: Timestamp::now(),
            path: self.path,
            key: self.key,
            value: self.value,
            metadata: self.metadata,
        }
    }
}

/// The binary log store.
///
/// `BinMemory` owns one append log and the manifest that indexes it. It
/// provides:
/// - Appends that never overwrite (`add_entry`)
/// - Point and filtered reads (`get_entry_by_id`, `get_entries`, `query`)
/// - Tombstone removal (`remove_entry`) and space reclamation (`compact`)
/// - Whole-store snapshots (`export`, `import`)
///
/// All methods take `&self`; share a store between threads with `Arc`.
/// Reads run concurrently with each other and with appends. Compaction and
/// import exclude everything else while they run.
///
/// # Opening a Store
///
/// ```rust,ignore
/// use binmem_core::BinMemory;
/// use std::path::Path;
///
/// let store = BinMemory::open(Path::new("data/bin.log"))?;
///
/// let alice = store.add_entry("users", "u1", "Alice", None, None)?;
/// store.add_entry("users", "u2", "Bob", None, None)?;
///
/// store.remove_entry(&alice)?;
/// store.compact()?;
///
/// store.close()?;
/// ```
///
/// # In-Memory Stores
///
/// For testing, use `BinMemory::open_in_memory()`:
///
/// ```rust,ignore
/// let store = BinMemory::open_in_memory()?;
/// ```
pub struct BinMemory {
    /// Configuration.
    config: Config,
    /// Store files (holds the lock). None for in-memory and custom backends.
    files: Option<StoreFiles>,
    /// Whether the log is a store-owned `InMemoryBackend` that a rewrite
    /// can replace outright.
    log_in_memory: bool,
    /// Shared by reads and appends, exclusive for compaction and import.
    gate: RwLock<()>,
    /// Serializes mutating operations.
    writer: Mutex<()>,
    /// The append log.
    log: RwLock<Box<dyn StorageBackend>>,
    /// Index over the log.
    manifest: RwLock<Manifest>,
    /// Set once a write failed; the store then refuses writes.
    read_only: RwLock<Option<String>>,
    /// Whether the store is open.
    is_open: RwLock<bool>,
    /// Operation counters.
    stats: StoreStats,
}

impl BinMemory {
    /// Opens or creates a store at `path` with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another instance has the store open (`StoreLocked`)
    /// - I/O errors occur
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let store = BinMemory::open(Path::new("data/bin.log"))?;
    /// ```
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens or creates a store at `path`.
    ///
    /// The method:
    /// - Acquires an exclusive lock on `<path>.lock`
    /// - Loads the manifest sidecar if it still matches the log, otherwise
    ///   rebuilds the manifest by scanning the log
    /// - Cuts off a torn record left at the end of the log by a crash
    ///
    /// If the log holds a corrupt record that is not at the tail, the store
    /// opens read-only: entries before the damage stay readable and nothing
    /// is appended after bytes that a rebuild could never get past.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use binmem_core::{BinMemory, Config};
    ///
    /// let config = Config::default().sync_on_append(false);
    /// let store = BinMemory::open_with_config(Path::new("data/bin.log"), config)?;
    /// ```
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let files = StoreFiles::open(path, config.create_if_missing)?;
        files.remove_compact_file()?;

        let mut log: Box<dyn StorageBackend> =
            Box::new(FileBackend::open_with_create_dirs(files.log_path())?);
        let (manifest, read_only) = Self::recover(Some(&files), log.as_mut(), &config)?;

        info!(
            path = %path.display(),
            entries = manifest.live_count(),
            tombstones = manifest.tombstone_count(),
            log_bytes = log.size()?,
            "opened bin store"
        );

        Ok(Self::assemble(config, Some(files), false, log, manifest, read_only))
    }

    /// Opens a store over a caller-provided backend.
    ///
    /// No lock file or manifest sidecar is used; removals do not survive
    /// dropping the backend.
    pub fn open_with_backend(mut log: Box<dyn StorageBackend>, config: Config) -> CoreResult<Self> {
        let (manifest, read_only) = Self::recover(None, log.as_mut(), &config)?;
        debug!(entries = manifest.live_count(), "opened bin store over custom backend");
        Ok(Self::assemble(config, None, false, log, manifest, read_only))
    }

    /// Opens a fresh in-memory store for testing.
    pub fn open_in_memory() -> CoreResult<Self> {
        let log: Box<dyn StorageBackend> = Box::new(InMemoryBackend::new());
        Ok(Self::assemble(Config::default(), None, true, log, Manifest::new(), None))
    }

    fn assemble(
        config: Config,
        files: Option<StoreFiles>,
        log_in_memory: bool,
        log: Box<dyn StorageBackend>,
        manifest: Manifest,
        read_only: Option<String>,
    ) -> Self {
        Self {
            config,
            files,
            log_in_memory,
            gate: RwLock::new(()),
            writer: Mutex::new(()),
            log: RwLock::new(log),
            manifest: RwLock::new(manifest),
            read_only: RwLock::new(read_only),
            is_open: RwLock::new(true),
            stats: StoreStats::new(),
        }
    }

    /// Builds the manifest for `log` and repairs a torn tail.
    ///
    /// Returns the manifest and, if the log is damaged beyond its tail, the
    /// reason the store must stay read-only.
    fn recover(
        files: Option<&StoreFiles>,
        log: &mut dyn StorageBackend,
        config: &Config,
    ) -> CoreResult<(Manifest, Option<String>)> {
        let chunk = config.scan_chunk_size;

        let loaded = match files.filter(|_| config.persist_manifest) {
            Some(files) => Self::load_sidecar(files, log, chunk)?,
            None => None,
        };
        let (manifest, report) = match loaded {
            Some(loaded) => loaded,
            None => Manifest::rebuild(log, chunk)?,
        };

        let read_only = match &report.stop {
            None => None,
            Some(stop) if stop.is_torn_tail() => {
                warn!(
                    valid_len = report.valid_len,
                    torn_bytes = report.ignored_bytes(),
                    "truncating torn record at end of log"
                );
                log.truncate(report.valid_len)?;
                log.sync()?;
                None
            }
            Some(stop) => {
                let reason = format!(
                    "corrupt record at offset {} ({}); {} bytes unreadable",
                    stop.offset,
                    stop.error,
                    report.ignored_bytes()
                );
                warn!(%reason, "opening bin store read-only");
                Some(reason)
            }
        };

        Ok((manifest, read_only))
    }

    /// Loads the sidecar if it still describes a prefix of `log`, then
    /// indexes the records appended after it was written.
    fn load_sidecar(
        files: &StoreFiles,
        log: &dyn StorageBackend,
        chunk: usize,
    ) -> CoreResult<Option<(Manifest, ScanReport)>> {
        let (mut manifest, covered) = match files.load_manifest() {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable manifest sidecar");
                return Ok(None);
            }
        };

        if !Self::sidecar_matches(&manifest, covered, log)? {
            warn!(covered, "manifest sidecar does not match log, rebuilding");
            return Ok(None);
        }

        let report = manifest.index_from(log, covered, chunk)?;
        debug!(
            covered,
            appended = report.records,
            "loaded manifest sidecar"
        );
        Ok(Some((manifest, report)))
    }

    fn sidecar_matches(manifest: &Manifest, covered: u64, log: &dyn StorageBackend) -> CoreResult<bool> {
        if covered > log.size()? {
            return Ok(false);
        }
        let Some(last) = manifest.records().last() else {
            return Ok(covered == 0);
        };
        let bytes = log.read_at(last.offset, last.length as usize)?;
        Ok(verify_record(last, &bytes).is_ok())
    }

    // === Writes ===

    /// Appends a new entry and returns its id.
    ///
    /// `metadata` of `None` and an empty map are equivalent. `channel`
    /// defaults to [`Channel::Other`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store is read-only or closed, if the writer
    /// lock times out (`ConcurrentAccess`), or if the append fails. A failed
    /// append makes the store read-only.
    pub fn add_entry(
        &self,
        path: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        metadata: Option<Metadata>,
        channel: Option<Channel>,
    ) -> CoreResult<EntryId> {
        let mut entry = NewEntry::new(path, key, value);
        if let Some(metadata) = metadata {
            entry = entry.metadata(metadata);
        }
        if let Some(channel) = channel {
            entry = entry.channel(channel);
        }
        self.add(entry)
    }

    /// Appends a new entry built with [`NewEntry`] and returns its id.
    pub fn add(&self, entry: NewEntry) -> CoreResult<EntryId> {
        let result = self.add_inner(entry);
        self.track(result)
    }

    fn add_inner(&self, entry: NewEntry) -> CoreResult<EntryId> {
        self.ensure_writable()?;
        let _writer = self.lock_writer("add_entry")?;
        let _gate = self.gate.read();
        self.ensure_writable()?;

        let id = self.fresh_id();
        let entry = entry.into_entry(id);
        let longest = [&entry.path, &entry.key, &entry.value]
            .into_iter()
            .chain(entry.metadata.iter().flat_map(|(k, v)| [k, v]))
            .map(String::len)
            .max()
            .unwrap_or(0);
        if longest as u64 > MAX_FIELD_LEN {
            return Err(CoreError::invalid_operation(format!(
                "field of {longest} bytes exceeds the {MAX_FIELD_LEN} byte limit"
            )));
        }
        let bytes = encode_record(&entry);

        let mut log = self.log.write();
        let offset = self.append_durable(log.as_mut(), &bytes)?;

        self.manifest
            .write()
            .insert(ManifestRecord::for_entry(&entry, offset, bytes.len() as u64));
        self.stats.record_append(bytes.len() as u64);

        debug!(%id, path = %entry.path, offset, len = bytes.len(), "appended entry");
        Ok(id)
    }

    /// Appends `bytes` and makes them durable according to the config.
    ///
    /// On failure the log is cut back to its previous size where possible
    /// and the store becomes read-only.
    fn append_durable(&self, log: &mut dyn StorageBackend, bytes: &[u8]) -> CoreResult<u64> {
        let before = log.size()?;
        let sync_on_append = self.config.sync_on_append;
        let outcome = log.append(bytes).and_then(|offset| {
            if sync_on_append {
                log.sync()?;
            } else {
                log.flush()?;
            }
            Ok(offset)
        });

        outcome.map_err(|e| {
            if let Err(rollback) = log.truncate(before) {
                warn!(error = %rollback, "could not roll back failed append");
            }
            self.enter_read_only(format!("append failed: {e}"));
            CoreError::from(e)
        })
    }

    fn fresh_id(&self) -> EntryId {
        let manifest = self.manifest.read();
        loop {
            let id = EntryId::new();
            if !manifest.contains(&id) {
                return id;
            }
        }
    }

    /// Removes an entry.
    ///
    /// The record stays in the log until the next [`BinMemory::compact`].
    /// Returns `false` if the id is unknown or already removed.
    pub fn remove_entry(&self, id: &EntryId) -> CoreResult<bool> {
        let result = self.remove_inner(id);
        self.track(result)
    }

    fn remove_inner(&self, id: &EntryId) -> CoreResult<bool> {
        self.ensure_writable()?;
        let _writer = self.lock_writer("remove_entry")?;
        let _gate = self.gate.read();

        let log = self.log.read();
        let mut manifest = self.manifest.write();
        if !manifest.tombstone(id) {
            return Ok(false);
        }
        self.stats.record_removal();
        debug!(%id, "removed entry");

        self.persist_sidecar(&manifest, log.size()?);
        Ok(true)
    }

    /// Rewrites the log keeping only live entries.
    ///
    /// The new log is written next to the old one and renamed over it once
    /// complete. Any failure before the rename leaves the store unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if a live record is corrupt or on I/O failure.
    pub fn compact(&self) -> CoreResult<CompactionResult> {
        let result = self.compact_inner();
        self.track(result)
    }

    fn compact_inner(&self) -> CoreResult<CompactionResult> {
        self.ensure_writable()?;
        let _writer = self.lock_writer("compact")?;
        let _gate = self.gate.write();

        let mut log = self.log.write();
        let mut manifest = self.manifest.write();

        let result = self.install_rewrite(&mut log, &mut manifest, |source, current, target| {
            Compactor::new(source, current).rewrite(target)
        })?;

        self.stats.record_compaction(result.bytes_saved());
        info!(
            records = result.output_records,
            tombstones_removed = result.tombstones_removed,
            bytes_before = result.bytes_before,
            bytes_after = result.bytes_after,
            "compacted bin store"
        );
        Ok(result)
    }

    /// Predicts what [`BinMemory::compact`] would do without changing anything.
    pub fn compaction_estimate(&self) -> CoreResult<CompactionResult> {
        self.ensure_open()?;
        let _gate = self.gate.read();
        let log = self.log.read();
        let manifest = self.manifest.read();
        Compactor::new(log.as_ref(), &manifest).estimate()
    }

    /// Builds a replacement log with `build` and swaps it in.
    ///
    /// File stores write `<log>.compact`, delete the sidecar, rename the new
    /// file over the log and reopen it. In-memory stores build a new backend
    /// and swap it in. Custom backends are rewritten in place from a copy
    /// built in memory, and put back as they were if that fails.
    fn install_rewrite<T, F>(
        &self,
        log: &mut Box<dyn StorageBackend>,
        manifest: &mut Manifest,
        build: F,
    ) -> CoreResult<T>
    where
        F: FnOnce(&dyn StorageBackend, &Manifest, &mut dyn StorageBackend) -> CoreResult<(Manifest, T)>,
    {
        let Some(files) = &self.files else {
            let mut target = InMemoryBackend::new();
            let (rebuilt, value) = build(log.as_ref(), manifest, &mut target)?;
            if self.log_in_memory {
                *log = Box::new(target);
            } else {
                self.rewrite_in_place(log, &target.data())?;
            }
            *manifest = rebuilt;
            return Ok(value);
        };

        files.remove_compact_file()?;
        let mut target = FileBackend::create_truncated(&files.compact_path())?;
        let (rebuilt, value) = match build(log.as_ref(), manifest, &mut target) {
            Ok(built) => built,
            Err(e) => {
                drop(target);
                if let Err(cleanup) = files.remove_compact_file() {
                    warn!(error = %cleanup, "could not remove compaction file");
                }
                return Err(e);
            }
        };
        drop(target);

        files.remove_manifest()?;
        files.install_compact_file()?;

        match FileBackend::open(files.log_path()) {
            Ok(reopened) => *log = Box::new(reopened),
            Err(e) => {
                self.enter_read_only(format!("could not reopen rewritten log: {e}"));
                return Err(e.into());
            }
        }
        *manifest = rebuilt;
        self.persist_sidecar(manifest, log.size()?);
        Ok(value)
    }

    /// Overwrites a custom backend with `data`.
    ///
    /// On failure the previous bytes are written back. If even that fails,
    /// the store keeps serving them from memory and becomes read-only.
    fn rewrite_in_place(&self, log: &mut Box<dyn StorageBackend>, data: &[u8]) -> CoreResult<()> {
        let previous = log.read_at(0, log.size()? as usize)?;
        let outcome = log
            .truncate(0)
            .and_then(|()| log.append(data))
            .and_then(|_| log.sync());
        let Err(e) = outcome else {
            return Ok(());
        };

        let restored = log
            .truncate(0)
            .and_then(|()| log.append(&previous))
            .and_then(|_| log.sync());
        match restored {
            Ok(()) => warn!(error = %e, "rewrite of log failed, previous contents restored"),
            Err(restore) => {
                self.enter_read_only(format!(
                    "rewrite of log failed ({e}) and could not be undone: {restore}"
                ));
                *log = Box::new(InMemoryBackend::with_data(previous));
            }
        }
        Err(e.into())
    }

    // === Snapshots ===

    /// Writes every live entry to a snapshot file at `target`.
    ///
    /// The snapshot is written to `<target>.tmp` and renamed once synced.
    pub fn export(&self, target: &Path) -> CoreResult<ExportResult> {
        let result = self.export_inner(target);
        self.track(result)
    }

    fn export_inner(&self, target: &Path) -> CoreResult<ExportResult> {
        let builder = self.with_engine(|engine| {
            let mut builder = SnapshotBuilder::new();
            for record in engine.list_indexed() {
                let bytes = engine.read_raw(&record)?;
                verify_record(&record, &bytes)?;
                builder.push_record(&bytes);
            }
            Ok(builder)
        })?;

        let entries = builder.len();
        let bytes = builder.finish();
        write_snapshot_file(target, &bytes)?;

        self.stats.record_export();
        info!(path = %target.display(), entries, bytes = bytes.len(), "exported bin store");
        Ok(ExportResult {
            entries,
            bytes: bytes.len() as u64,
            path: target.to_path_buf(),
        })
    }

    /// Imports a snapshot using the configured [`ImportMode`].
    pub fn import(&self, source: &Path) -> CoreResult<ImportResult> {
        self.import_with_mode(source, self.config.import_mode)
    }

    /// Imports a snapshot.
    ///
    /// The snapshot is fully validated before the store is touched. A merge
    /// that fails part way is rolled back by truncating the log to its
    /// previous size; a replace swaps the log in only once it is complete.
    ///
    /// A merge skips ids the manifest still knows, including removed ones.
    /// Compaction forgets removed ids, so importing an older snapshot after
    /// a compaction brings those entries back.
    pub fn import_with_mode(&self, source: &Path, mode: ImportMode) -> CoreResult<ImportResult> {
        let result = self.import_inner(source, mode);
        self.track(result)
    }

    fn import_inner(&self, source: &Path, mode: ImportMode) -> CoreResult<ImportResult> {
        self.ensure_writable()?;
        let entries = read_snapshot_file(source)?;

        let _writer = self.lock_writer("import")?;
        let _gate = self.gate.write();
        let mut log = self.log.write();
        let mut manifest = self.manifest.write();

        let (entries, skipped) = select_for_import(entries, mode, |id| manifest.contains(id));
        let imported = entries.len();

        match mode {
            ImportMode::Merge => self.merge_entries(log.as_mut(), &mut manifest, &entries)?,
            ImportMode::Replace => {
                self.install_rewrite(&mut log, &mut manifest, |_, _, target| {
                    let mut rebuilt = Manifest::new();
                    for entry in &entries {
                        let bytes = encode_record(entry);
                        let offset = target.append(&bytes)?;
                        rebuilt.insert(ManifestRecord::for_entry(entry, offset, bytes.len() as u64));
                    }
                    target.sync()?;
                    Ok((rebuilt, ()))
                })?;
            }
        }

        self.stats.record_import();
        info!(
            source = %source.display(),
            ?mode,
            imported,
            skipped,
            "imported snapshot"
        );
        Ok(ImportResult {
            imported,
            skipped,
            mode,
        })
    }

    fn merge_entries(
        &self,
        log: &mut dyn StorageBackend,
        manifest: &mut Manifest,
        entries: &[BinEntry],
    ) -> CoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let before = log.size()?;
        let mut appended = Vec::with_capacity(entries.len());
        let outcome = entries
            .iter()
            .try_for_each(|entry| {
                let bytes = encode_record(entry);
                let offset = log.append(&bytes)?;
                appended.push(ManifestRecord::for_entry(entry, offset, bytes.len() as u64));
                Ok::<_, binmem_storage::StorageError>(())
            })
            .and_then(|()| log.sync());

        if let Err(e) = outcome {
            if let Err(rollback) = log.truncate(before).and_then(|()| log.sync()) {
                self.enter_read_only(format!("could not roll back failed import: {rollback}"));
            }
            return Err(e.into());
        }

        for record in appended {
            self.stats.record_append(record.length);
            manifest.insert(record);
        }
        self.persist_sidecar(manifest, log.size()?);
        Ok(())
    }

    /// Writes the manifest sidecar now.
    ///
    /// # Errors
    ///
    /// Returns an error for stores without files, or on I/O failure.
    pub fn snapshot_manifest(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let Some(files) = &self.files else {
            return Err(CoreError::invalid_operation(
                "store has no files to write a manifest to",
            ));
        };
        let _gate = self.gate.read();
        let log = self.log.read();
        let manifest = self.manifest.read();
        files.save_manifest(&manifest, log.size()?)
    }

    fn persist_sidecar(&self, manifest: &Manifest, log_len: u64) {
        if !self.config.persist_manifest {
            return;
        }
        if let Some(files) = &self.files {
            if let Err(e) = files.save_manifest(manifest, log_len) {
                self.stats.record_error();
                warn!(error = %e, "could not write manifest sidecar");
            }
        }
    }

    // === Reads ===

    /// Returns live entries with exactly `path` (if given) on `channel` (if
    /// given), in insertion order.
    pub fn get_entries(&self, path: Option<&str>, channel: Option<Channel>) -> CoreResult<Vec<BinEntry>> {
        self.stats.record_query();
        self.with_engine(|engine| engine.get_entries(path, channel))
    }

    /// Returns live entries matching `filter`, in insertion order.
    pub fn get_entries_filtered(&self, filter: &EntryFilter) -> CoreResult<Vec<BinEntry>> {
        self.stats.record_query();
        self.with_engine(|engine| engine.get_entries_filtered(filter))
    }

    /// Returns the live entry with `id`, or `None` if unknown or removed.
    pub fn get_entry_by_id(&self, id: &EntryId) -> CoreResult<Option<BinEntry>> {
        self.with_engine(|engine| engine.get_entry_by_id(id))
    }

    /// Returns every live entry for which `predicate` holds.
    pub fn query<F>(&self, predicate: F) -> CoreResult<Vec<BinEntry>>
    where
        F: Fn(&BinEntry) -> bool,
    {
        self.stats.record_query();
        self.with_engine(|engine| engine.query(predicate))
    }

    /// Returns the encoded record of a live entry.
    pub fn read_entry_raw(&self, id: &EntryId) -> CoreResult<Vec<u8>> {
        self.with_engine(|engine| engine.read_entry_raw(id))
    }

    /// Returns the manifest record of a live entry.
    pub fn entry_info(&self, id: &EntryId) -> CoreResult<Option<ManifestRecord>> {
        self.ensure_open()?;
        Ok(self.manifest.read().lookup_live(id).cloned())
    }

    /// Returns the manifest records of all live entries, in log order.
    pub fn list_indexed(&self) -> CoreResult<Vec<ManifestRecord>> {
        self.with_engine(|engine| Ok(engine.list_indexed()))
    }

    fn with_engine<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(QueryEngine<'_>) -> CoreResult<T>,
    {
        self.ensure_open()?;
        let _gate = self.gate.read();
        let log = self.log.read();
        let manifest = self.manifest.read();
        let result = f(QueryEngine::new(log.as_ref(), &manifest).with_stats(&self.stats));
        self.track(result)
    }

    // === State ===

    /// Returns current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        let _gate = self.gate.read();
        let log_bytes = match self.log.read().size() {
            Ok(size) => size,
            Err(e) => {
                self.stats.record_error();
                warn!(error = %e, "could not read log size for stats");
                0
            }
        };
        let manifest = self.manifest.read();
        self.stats.snapshot(StoreGauges {
            live_entries: manifest.live_count() as u64,
            tombstones: manifest.tombstone_count() as u64,
            log_bytes,
            live_bytes: manifest.live_bytes(),
        })
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifest.read().live_count()
    }

    /// Returns `true` if the store holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a failed write put the store into read-only mode.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.read().is_some()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the log path, or `None` for stores without files.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.files.as_ref().map(StoreFiles::log_path)
    }

    /// Closes the store.
    ///
    /// Syncs the log and writes the manifest sidecar. Further calls fail
    /// with [`CoreError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        let _writer = self.writer.lock();
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        let mut log = self.log.write();
        if !self.is_read_only() {
            log.sync()?;
        }
        let manifest = self.manifest.read();
        self.persist_sidecar(&manifest, log.size()?);

        *is_open = false;
        info!("closed bin store");
        Ok(())
    }

    /// Returns `true` if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::Closed)
        }
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_open()?;
        match &*self.read_only.read() {
            Some(reason) => Err(CoreError::read_only(reason.clone())),
            None => Ok(()),
        }
    }

    fn enter_read_only(&self, reason: String) {
        warn!(%reason, "bin store is now read-only");
        *self.read_only.write() = Some(reason);
    }

    fn lock_writer(&self, operation: &'static str) -> CoreResult<MutexGuard<'_, ()>> {
        match self.config.lock_timeout {
            None => Ok(self.writer.lock()),
            Some(timeout) => self
                .writer
                .try_lock_for(timeout)
                .ok_or(CoreError::ConcurrentAccess { operation }),
        }
    }

    fn track<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if result.is_err() {
            self.stats.record_error();
        }
        result
    }
}

impl std::fmt::Debug for BinMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinMemory")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .field("read_only", &self.is_read_only())
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl Drop for BinMemory {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn metadata(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn open_in_memory() {
        let store = BinMemory::open_in_memory().unwrap();
        assert!(store.is_open());
        assert!(store.is_empty());
        assert!(store.path().is_none());
    }

    #[test]
    fn add_then_get() {
        let store = BinMemory::open_in_memory().unwrap();
        let meta = metadata(&[("source", "signup")]);

        let id = store
            .add_entry("users", "u1", "Alice", Some(meta.clone()), Some(Channel::InputOutput))
            .unwrap();

        let entry = store.get_entry_by_id(&id).unwrap().unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.path, "users");
        assert_eq!(entry.key, "u1");
        assert_eq!(entry.value, "Alice");
        assert_eq!(entry.metadata, meta);
        assert_eq!(entry.channel, Channel::InputOutput);

        let listed = store.get_entries(Some("users"), None).unwrap();
        assert_eq!(listed, vec![entry]);
    }

    #[test]
    fn defaults_channel_and_metadata() {
        let store = BinMemory::open_in_memory().unwrap();
        let id = store.add_entry("p", "k", "v", None, None).unwrap();

        let entry = store.get_entry_by_id(&id).unwrap().unwrap();
        assert_eq!(entry.channel, Channel::Other);
        assert!(entry.metadata.is_empty());
        assert_eq!(entry.entry_type, EntryType::PLAIN);
    }

    #[test]
    fn new_entry_builder() {
        let store = BinMemory::open_in_memory().unwrap();
        let id = store
            .add(
                NewEntry::new("forums", "post:1", "hello")
                    .channel(Channel::ErrorLog)
                    .metadata_pair("thread", "42")
                    .entry_type(EntryType::from_byte(3)),
            )
            .unwrap();

        let entry = store.get_entry_by_id(&id).unwrap().unwrap();
        assert_eq!(entry.channel, Channel::ErrorLog);
        assert_eq!(entry.metadata.get("thread").map(String::as_str), Some("42"));
        assert_eq!(entry.entry_type.as_byte(), 3);
    }

    #[test]
    fn keys_are_not_unique() {
        let store = BinMemory::open_in_memory().unwrap();
        let a = store.add_entry("users", "u1", "first", None, None).unwrap();
        let b = store.add_entry("users", "u1", "second", None, None).unwrap();

        assert_ne!(a, b);
        let values: Vec<String> = store
            .get_entries(Some("users"), None)
            .unwrap()
            .into_iter()
            .map(|e| e.value)
            .collect();
        assert_eq!(values, vec!["first", "second"]);
    }

    #[test]
    fn get_entries_filters() {
        let store = BinMemory::open_in_memory().unwrap();
        store.add_entry("users", "u1", "Alice", None, Some(Channel::InputOutput)).unwrap();
        store.add_entry("users", "u2", "Bob", None, Some(Channel::ErrorLog)).unwrap();
        store.add_entry("forums", "f1", "Hi", None, Some(Channel::ErrorLog)).unwrap();
        store.add_entry("users/admin", "a1", "Root", None, None).unwrap();

        assert_eq!(store.get_entries(None, None).unwrap().len(), 4);
        assert_eq!(store.get_entries(Some("users"), None).unwrap().len(), 2);
        assert_eq!(store.get_entries(None, Some(Channel::ErrorLog)).unwrap().len(), 2);
        assert_eq!(
            store.get_entries(Some("users"), Some(Channel::ErrorLog)).unwrap()[0].value,
            "Bob"
        );
        assert!(store.get_entries(Some("nobody"), None).unwrap().is_empty());
        assert_eq!(
            store
                .get_entries_filtered(&EntryFilter::path_prefix("users"))
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn query_predicate() {
        let store = BinMemory::open_in_memory().unwrap();
        store.add_entry("users", "u1", "Alice", None, None).unwrap();
        store.add_entry("users", "u2", "Bob", None, None).unwrap();

        let found = store.query(|e| e.value.len() == 3).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "Bob");
    }

    #[test]
    fn remove_semantics() {
        let store = BinMemory::open_in_memory().unwrap();
        let id = store.add_entry("users", "u1", "Alice", None, None).unwrap();

        assert!(store.remove_entry(&id).unwrap());
        assert!(!store.remove_entry(&id).unwrap());
        assert!(!store.remove_entry(&EntryId::new()).unwrap());

        assert!(store.get_entry_by_id(&id).unwrap().is_none());
        assert!(store.get_entries(Some("users"), None).unwrap().is_empty());
        assert!(store.query(|_| true).unwrap().is_empty());
        assert!(store.entry_info(&id).unwrap().is_none());
        assert!(matches!(
            store.read_entry_raw(&id),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn alice_bob_compaction_scenario() {
        let temp = tempdir().unwrap();
        let store = BinMemory::open(&temp.path().join("bin.log")).unwrap();

        let alice = store.add_entry("users", "u1", "Alice", None, None).unwrap();
        let bob = store.add_entry("users", "u2", "Bob", None, None).unwrap();
        let size_before = store.stats().log_bytes;

        assert!(store.remove_entry(&alice).unwrap());
        let result = store.compact().unwrap();

        let users = store.get_entries(Some("users"), None).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, bob);
        assert_eq!(users[0].value, "Bob");
        assert!(store.get_entry_by_id(&alice).unwrap().is_none());

        assert!(result.bytes_after <= size_before);
        assert_eq!(result.bytes_before, size_before);
        assert_eq!(result.tombstones_removed, 1);
        assert_eq!(store.stats().log_bytes, result.bytes_after);
    }

    #[test]
    fn compaction_in_memory() {
        let store = BinMemory::open_in_memory().unwrap();
        let ids: Vec<_> = (0..10)
            .map(|i| store.add_entry("p", &format!("k{i}"), "v", None, None).unwrap())
            .collect();
        for id in ids.iter().step_by(2) {
            store.remove_entry(id).unwrap();
        }

        let estimate = store.compaction_estimate().unwrap();
        let result = store.compact().unwrap();
        assert_eq!(estimate, result);
        assert_eq!(result.output_records, 5);

        let survivors: Vec<EntryId> = store.list_indexed().unwrap().iter().map(|r| r.id).collect();
        let expected: Vec<EntryId> = ids.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(survivors, expected);

        store.add_entry("p", "after", "v", None, None).unwrap();
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn entries_survive_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bin.log");

        let id = {
            let store = BinMemory::open(&path).unwrap();
            let id = store.add_entry("users", "u1", "Alice", None, None).unwrap();
            store.close().unwrap();
            id
        };

        let store = BinMemory::open(&path).unwrap();
        assert_eq!(store.get_entry_by_id(&id).unwrap().unwrap().value, "Alice");
    }

    #[test]
    fn tombstones_survive_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bin.log");

        let (removed, kept) = {
            let store = BinMemory::open(&path).unwrap();
            let removed = store.add_entry("users", "u1", "Alice", None, None).unwrap();
            let kept = store.add_entry("users", "u2", "Bob", None, None).unwrap();
            store.remove_entry(&removed).unwrap();
            (removed, kept)
        };

        let store = BinMemory::open(&path).unwrap();
        assert!(store.get_entry_by_id(&removed).unwrap().is_none());
        assert!(store.get_entry_by_id(&kept).unwrap().is_some());
    }

    #[test]
    fn appends_after_sidecar_are_indexed() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bin.log");
        let copy = temp.path().join("copy.log");

        let store = BinMemory::open(&path).unwrap();
        let removed = store.add_entry("p", "a", "1", None, None).unwrap();
        store.remove_entry(&removed).unwrap();
        let late = store.add_entry("p", "b", "2", None, None).unwrap();

        // Copy the files as a crash would leave them: the sidecar predates `late`.
        std::fs::copy(&path, &copy).unwrap();
        std::fs::copy(
            crate::dir::sibling(&path, ".manifest"),
            crate::dir::sibling(&copy, ".manifest"),
        )
        .unwrap();
        drop(store);

        let store = BinMemory::open(&copy).unwrap();
        assert!(store.get_entry_by_id(&removed).unwrap().is_none());
        assert_eq!(store.get_entry_by_id(&late).unwrap().unwrap().value, "2");
    }

    #[test]
    fn stale_sidecar_is_ignored() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bin.log");

        let id = {
            let store = BinMemory::open(&path).unwrap();
            let id = store.add_entry("p", "k", "v", None, None).unwrap();
            store.close().unwrap();
            id
        };

        // Replace the log with a different one behind the sidecar's back.
        let other = BinEntry::new(EntryId::new(), "q", "k", "v");
        std::fs::write(&path, encode_record(&other)).unwrap();

        let store = BinMemory::open(&path).unwrap();
        assert!(store.get_entry_by_id(&id).unwrap().is_none());
        assert!(store.get_entry_by_id(&other.id).unwrap().is_some());
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bin.log");
        let config = Config::default().persist_manifest(false);

        let kept = {
            let store = BinMemory::open_with_config(&path, config.clone()).unwrap();
            let kept = store.add_entry("p", "a", "1", None, None).unwrap();
            store.add_entry("p", "b", "2", None, None).unwrap();
            kept
        };

        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();
        drop(file);

        let store = BinMemory::open_with_config(&path, config).unwrap();
        assert!(!store.is_read_only());
        assert_eq!(store.len(), 1);
        assert!(store.get_entry_by_id(&kept).unwrap().is_some());

        let after = store.add_entry("p", "c", "3", None, None).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get_entry_by_id(&after).unwrap().is_some());
    }

    #[test]
    fn zero_filled_tail_is_truncated_on_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bin.log");

        let kept = {
            let store = BinMemory::open(&path).unwrap();
            store.add_entry("p", "a", "1", None, None).unwrap()
        };
        let valid = std::fs::metadata(&path).unwrap().len();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut file, &[0u8; 64]).unwrap();
        drop(file);

        let store = BinMemory::open(&path).unwrap();
        assert!(!store.is_read_only());
        assert_eq!(store.len(), 1);
        assert!(store.get_entry_by_id(&kept).unwrap().is_some());
        assert_eq!(store.stats().log_bytes, valid);

        store.add_entry("p", "b", "2", None, None).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn damaged_final_record_is_truncated_on_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bin.log");
        let config = Config::default().persist_manifest(false);

        let (kept, lost) = {
            let store = BinMemory::open_with_config(&path, config.clone()).unwrap();
            let kept = store.add_entry("p", "a", "1", None, None).unwrap();
            let lost = store.add_entry("p", "b", "value", None, None).unwrap();
            (kept, lost)
        };

        let mut bytes = std::fs::read(&path).unwrap();
        let inside_value = bytes.len() - 7;
        bytes[inside_value] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let store = BinMemory::open_with_config(&path, config).unwrap();
        assert!(!store.is_read_only());
        assert!(store.get_entry_by_id(&kept).unwrap().is_some());
        assert!(store.get_entry_by_id(&lost).unwrap().is_none());

        store.add_entry("p", "c", "3", None, None).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn mid_log_corruption_opens_read_only() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bin.log");
        let config = Config::default().persist_manifest(false);

        let first = {
            let store = BinMemory::open_with_config(&path, config.clone()).unwrap();
            let first = store.add_entry("p", "a", "1", None, None).unwrap();
            store.add_entry("p", "b", "2", None, None).unwrap();
            store.add_entry("p", "c", "3", None, None).unwrap();
            first
        };

        let first_len = store_record_len(&path, 0);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[first_len as usize + 30] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let store = BinMemory::open_with_config(&path, config).unwrap();
        assert!(store.is_read_only());
        assert!(store.get_entry_by_id(&first).unwrap().is_some());
        assert!(matches!(
            store.add_entry("p", "d", "4", None, None),
            Err(CoreError::ReadOnly { .. })
        ));
    }

    fn store_record_len(path: &Path, offset: usize) -> u64 {
        let bytes = std::fs::read(path).unwrap();
        let (_, len) = binmem_codec::decode_record(&bytes[offset..]).unwrap();
        len as u64
    }

    #[test]
    fn second_instance_is_locked_out() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bin.log");

        let _store = BinMemory::open(&path).unwrap();
        assert!(matches!(BinMemory::open(&path), Err(CoreError::StoreLocked)));
    }

    #[test]
    fn export_import_into_fresh_store() {
        let temp = tempdir().unwrap();
        let snapshot = temp.path().join("bin.snapshot");

        let source = BinMemory::open_in_memory().unwrap();
        let removed = source.add_entry("users", "u1", "Alice", None, None).unwrap();
        source
            .add_entry("users", "u2", "Bob", Some(metadata(&[("k", "v")])), Some(Channel::ErrorLog))
            .unwrap();
        source.add_entry("forums", "f1", "Hello", None, None).unwrap();
        source.remove_entry(&removed).unwrap();

        let exported = source.export(&snapshot).unwrap();
        assert_eq!(exported.entries, 2);
        assert_eq!(exported.bytes, std::fs::metadata(&snapshot).unwrap().len());

        let target = BinMemory::open_in_memory().unwrap();
        let imported = target.import(&snapshot).unwrap();
        assert_eq!(imported.imported, 2);
        assert_eq!(imported.skipped, 0);

        assert_eq!(
            target.get_entries(None, None).unwrap(),
            source.get_entries(None, None).unwrap()
        );
    }

    #[test]
    fn merge_import_is_idempotent() {
        let temp = tempdir().unwrap();
        let snapshot = temp.path().join("bin.snapshot");

        let store = BinMemory::open(&temp.path().join("bin.log")).unwrap();
        store.add_entry("users", "u1", "Alice", None, None).unwrap();
        store.add_entry("users", "u2", "Bob", None, None).unwrap();
        store.export(&snapshot).unwrap();

        let again = store.import(&snapshot).unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.skipped, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn merge_import_does_not_resurrect_removed_entries() {
        let temp = tempdir().unwrap();
        let snapshot = temp.path().join("bin.snapshot");

        let store = BinMemory::open_in_memory().unwrap();
        let id = store.add_entry("users", "u1", "Alice", None, None).unwrap();
        store.export(&snapshot).unwrap();
        store.remove_entry(&id).unwrap();

        let result = store.import(&snapshot).unwrap();
        assert_eq!(result.skipped, 1);
        assert!(store.get_entry_by_id(&id).unwrap().is_none());
    }

    #[test]
    fn replace_import_discards_existing_entries() {
        let temp = tempdir().unwrap();
        let snapshot = temp.path().join("bin.snapshot");

        let source = BinMemory::open_in_memory().unwrap();
        let kept = source.add_entry("users", "u1", "Alice", None, None).unwrap();
        source.export(&snapshot).unwrap();

        let target = BinMemory::open(&temp.path().join("bin.log")).unwrap();
        let dropped = target.add_entry("forums", "f1", "old", None, None).unwrap();

        let result = target.import_with_mode(&snapshot, ImportMode::Replace).unwrap();
        assert_eq!(result.imported, 1);
        assert_eq!(result.mode, ImportMode::Replace);
        assert!(target.get_entry_by_id(&dropped).unwrap().is_none());
        assert_eq!(target.get_entry_by_id(&kept).unwrap().unwrap().value, "Alice");

        target.add_entry("forums", "f2", "new", None, None).unwrap();
        assert_eq!(target.len(), 2);
    }

    #[test]
    fn invalid_snapshot_leaves_store_untouched() {
        let temp = tempdir().unwrap();
        let snapshot = temp.path().join("bin.snapshot");

        let store = BinMemory::open_in_memory().unwrap();
        store.add_entry("users", "u1", "Alice", None, None).unwrap();
        store.export(&snapshot).unwrap();

        let mut bytes = std::fs::read(&snapshot).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&snapshot, &bytes).unwrap();

        let before = store.stats().log_bytes;
        for mode in [ImportMode::Merge, ImportMode::Replace] {
            assert!(matches!(
                store.import_with_mode(&snapshot, mode),
                Err(CoreError::InvalidSnapshot { .. })
            ));
        }
        assert_eq!(store.stats().log_bytes, before);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn read_entry_raw_and_info() {
        let store = BinMemory::open_in_memory().unwrap();
        let id = store.add_entry("users", "u1", "Alice", None, None).unwrap();

        let raw = store.read_entry_raw(&id).unwrap();
        let entry = store.get_entry_by_id(&id).unwrap().unwrap();
        assert_eq!(raw, encode_record(&entry));

        let info = store.entry_info(&id).unwrap().unwrap();
        assert_eq!(info.length, raw.len() as u64);
        assert_eq!(info.created_at, entry.timestamp);
        assert_eq!(&*info.path, "users");
    }

    #[test]
    fn closed_store_rejects_calls() {
        let store = BinMemory::open_in_memory().unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert!(!store.is_open());
        assert!(matches!(
            store.add_entry("p", "k", "v", None, None),
            Err(CoreError::Closed)
        ));
        assert!(matches!(store.get_entries(None, None), Err(CoreError::Closed)));
    }

    #[test]
    fn lock_timeout_reports_concurrent_access() {
        let store = BinMemory::open_with_backend(
            Box::new(InMemoryBackend::new()),
            Config::default().lock_timeout(Duration::from_millis(20)),
        )
        .unwrap();

        let held = store.writer.lock();
        let err = store.add_entry("p", "k", "v", None, None).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ConcurrentAccess {
                operation: "add_entry"
            }
        ));
        drop(held);

        store.add_entry("p", "k", "v", None, None).unwrap();
    }

    #[test]
    fn concurrent_appends_and_reads() {
        let store = Arc::new(BinMemory::open_in_memory().unwrap());

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..25 {
                        store
                            .add_entry("load", &format!("{t}:{i}"), "v", None, None)
                            .unwrap();
                    }
                })
            })
            .collect();
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..25 {
                    let seen = store.get_entries(Some("load"), None).unwrap();
                    assert!(seen.len() <= 100);
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(store.len(), 100);
        let stats = store.stats();
        assert_eq!(stats.appends, 100);
        assert_eq!(stats.live_entries, 100);
    }

    #[test]
    fn stats_track_operations() {
        let store = BinMemory::open_in_memory().unwrap();
        let id = store.add_entry("p", "k", "v", None, None).unwrap();
        store.get_entry_by_id(&id).unwrap();
        store.remove_entry(&id).unwrap();

        let stats = store.stats();
        assert_eq!(stats.appends, 1);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.removals, 1);
        assert_eq!(stats.tombstones, 1);
        assert_eq!(stats.reclaimable_bytes(), stats.log_bytes);

        store.compact().unwrap();
        let stats = store.stats();
        assert_eq!(stats.compactions, 1);
        assert_eq!(stats.log_bytes, 0);
    }

    struct SizeFails {
        inner: InMemoryBackend,
        fail: Arc<AtomicBool>,
    }

    impl StorageBackend for SizeFails {
        fn read_at(&self, offset: u64, len: usize) -> binmem_storage::StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> binmem_storage::StorageResult<u64> {
            self.inner.append(data)
        }

        fn flush(&mut self) -> binmem_storage::StorageResult<()> {
            self.inner.flush()
        }

        fn size(&self) -> binmem_storage::StorageResult<u64> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("size unavailable").into());
            }
            self.inner.size()
        }

        fn sync(&mut self) -> binmem_storage::StorageResult<()> {
            self.inner.sync()
        }

        fn truncate(&mut self, new_size: u64) -> binmem_storage::StorageResult<()> {
            self.inner.truncate(new_size)
        }
    }

    #[test]
    fn stats_count_unreadable_log_size() {
        let fail = Arc::new(AtomicBool::new(false));
        let backend = SizeFails {
            inner: InMemoryBackend::new(),
            fail: Arc::clone(&fail),
        };
        let store = BinMemory::open_with_backend(Box::new(backend), Config::default()).unwrap();
        store.add_entry("p", "k", "v", None, None).unwrap();
        assert_eq!(store.stats().errors, 0);

        fail.store(true, Ordering::SeqCst);
        let stats = store.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.log_bytes, 0);
        assert_eq!(stats.live_entries, 1);
    }

    #[test]
    fn merge_import_after_compaction_restores_removed_entries() {
        let temp = tempdir().unwrap();
        let snapshot = temp.path().join("bin.snapshot");

        let store = BinMemory::open_in_memory().unwrap();
        let id = store.add_entry("users", "u1", "Alice", None, None).unwrap();
        store.export(&snapshot).unwrap();
        store.remove_entry(&id).unwrap();
        store.compact().unwrap();

        let result = store.import(&snapshot).unwrap();
        assert_eq!(result.imported, 1);
        assert_eq!(store.get_entry_by_id(&id).unwrap().unwrap().value, "Alice");
    }

    #[test]
    fn snapshot_manifest_requires_files() {
        let store = BinMemory::open_in_memory().unwrap();
        assert!(matches!(
            store.snapshot_manifest(),
            Err(CoreError::InvalidOperation { .. })
        ));

        let temp = tempdir().unwrap();
        let path = temp.path().join("bin.log");
        let store = BinMemory::open(&path).unwrap();
        store.add_entry("p", "k", "v", None, None).unwrap();
        store.snapshot_manifest().unwrap();
        assert!(crate::dir::sibling(&path, ".manifest").exists());
    }
}
