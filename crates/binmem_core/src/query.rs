//! Read path: resolves manifest records to entries.
//!
//! The engine borrows the log and the manifest for the duration of one read
//! operation. The store hands it both under shared locks, so any number of
//! reads run side by side.

use crate::error::{CoreError, CoreResult};
use crate::manifest::{EntryFilter, Manifest, ManifestRecord};
use crate::stats::StoreStats;
use binmem_codec::{decode_record, BinEntry, Channel, EntryId};
use binmem_storage::StorageBackend;

/// Resolves manifest records against the log.
pub struct QueryEngine<'a> {
    log: &'a dyn StorageBackend,
    manifest: &'a Manifest,
    stats: Option<&'a StoreStats>,
}

impl<'a> QueryEngine<'a> {
    /// Creates an engine over `log` indexed by `manifest`.
    pub fn new(log: &'a dyn StorageBackend, manifest: &'a Manifest) -> Self {
        Self {
            log,
            manifest,
            stats: None,
        }
    }

    /// Counts every record read in `stats`.
    #[must_use]
    pub fn with_stats(mut self, stats: &'a StoreStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Reads the raw bytes of the record at `record`'s location.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the location is past the end of the log.
    pub fn read_raw(&self, record: &ManifestRecord) -> CoreResult<Vec<u8>> {
        let bytes = self.log.read_at(record.offset, record.length as usize)?;
        if let Some(stats) = self.stats {
            stats.record_read(record.length);
        }
        Ok(bytes)
    }

    /// Reads and decodes the entry at `record`'s location.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if the bytes do not decode and
    /// [`CoreError::IdMismatch`] if they decode to a different entry.
    pub fn read_entry(&self, record: &ManifestRecord) -> CoreResult<BinEntry> {
        let bytes = self.read_raw(record)?;
        verify_record(record, &bytes)
    }

    /// Returns live entries with exactly `path` (if given) on `channel` (if given).
    ///
    /// Entries come back in insertion order.
    pub fn get_entries(
        &self,
        path: Option<&str>,
        channel: Option<Channel>,
    ) -> CoreResult<Vec<BinEntry>> {
        self.get_entries_filtered(&EntryFilter::from_parts(path, channel))
    }

    /// Returns live entries matching `filter`, in insertion order.
    pub fn get_entries_filtered(&self, filter: &EntryFilter) -> CoreResult<Vec<BinEntry>> {
        self.manifest
            .filter_by(filter)
            .into_iter()
            .map(|record| self.read_entry(record))
            .collect()
    }

    /// Returns the live entry with `id`, or `None` if unknown or removed.
    pub fn get_entry_by_id(&self, id: &EntryId) -> CoreResult<Option<BinEntry>> {
        self.manifest
            .lookup_live(id)
            .map(|record| self.read_entry(record))
            .transpose()
    }

    /// Returns every live entry for which `predicate` holds, in insertion order.
    ///
    /// Every live record is read and decoded.
    pub fn query<F>(&self, predicate: F) -> CoreResult<Vec<BinEntry>>
    where
        F: Fn(&BinEntry) -> bool,
    {
        let mut matches = Vec::new();
        for record in self.manifest.live_records() {
            let entry = self.read_entry(record)?;
            if predicate(&entry) {
                matches.push(entry);
            }
        }
        Ok(matches)
    }

    /// Returns the encoded record of a live entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the id is unknown or removed.
    pub fn read_entry_raw(&self, id: &EntryId) -> CoreResult<Vec<u8>> {
        let record = self
            .manifest
            .lookup_live(id)
            .ok_or(CoreError::NotFound { id: *id })?;
        self.read_raw(record)
    }

    /// Returns the manifest records of live entries without touching the log.
    #[must_use]
    pub fn list_indexed(&self) -> Vec<ManifestRecord> {
        self.manifest.live_records().cloned().collect()
    }
}

/// Decodes `bytes` read from `record`'s location and checks the id.
pub(crate) fn verify_record(record: &ManifestRecord, bytes: &[u8]) -> CoreResult<BinEntry> {
    let (entry, _) =
        decode_record(bytes).map_err(|e| CoreError::corrupt_record(record.offset, e))?;
    if entry.id != record.id {
        return Err(CoreError::IdMismatch {
            offset: record.offset,
            expected: record.id,
            found: entry.id,
        });
    }
    Ok(entry)
}
