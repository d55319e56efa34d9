//! Log compaction.
//!
//! Removing an entry only tombstones it in the manifest; its record stays in
//! the log. Compaction copies the live records into a fresh log and builds
//! the manifest that describes it. This module provides the [`Compactor`]
//! that performs the copy; installing the result is up to the store.
//!
//! ## Invariants
//!
//! - Compaction **MUST NOT** change any live entry
//! - Live records keep their relative order
//! - The output is never larger than the input

use crate::error::CoreResult;
use crate::manifest::{Manifest, ManifestRecord};
use crate::query::{verify_record, QueryEngine};
use binmem_storage::StorageBackend;
use tracing::debug;

/// Result of a compaction operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Number of records in the input log.
    pub input_records: usize,
    /// Number of records in the output log.
    pub output_records: usize,
    /// Number of removed entries dropped.
    pub tombstones_removed: usize,
    /// Size of the log before compaction.
    pub bytes_before: u64,
    /// Size of the log after compaction.
    pub bytes_after: u64,
}

impl CompactionResult {
    /// Bytes reclaimed.
    #[must_use]
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Copies live records from one log into another.
///
/// ## Example
///
/// ```rust,ignore
/// use binmem_core::compaction::Compactor;
/// use binmem_storage::InMemoryBackend;
///
/// let mut target = InMemoryBackend::new();
/// let (manifest, result) = Compactor::new(&log, &manifest).rewrite(&mut target)?;
/// println!("saved {} bytes", result.bytes_saved());
/// ```
pub struct Compactor<'a> {
    source: &'a dyn StorageBackend,
    manifest: &'a Manifest,
}

impl<'a> Compactor<'a> {
    /// Creates a compactor over `source` as described by `manifest`.
    pub fn new(source: &'a dyn StorageBackend, manifest: &'a Manifest) -> Self {
        Self { source, manifest }
    }

    /// Predicts the result of [`Compactor::rewrite`] without reading records.
    ///
    /// Records are copied verbatim, so the prediction is exact as long as
    /// every live record is intact.
    pub fn estimate(&self) -> CoreResult<CompactionResult> {
        let live = self.manifest.live_count();
        Ok(CompactionResult {
            input_records: self.manifest.len(),
            output_records: live,
            tombstones_removed: self.manifest.tombstone_count(),
            bytes_before: self.source.size()?,
            bytes_after: self.manifest.live_bytes(),
        })
    }

    /// Writes every live record to `target`, in ascending offset order.
    ///
    /// Each record is decoded and checked against its manifest id before it
    /// is copied, so a damaged record fails the compaction instead of being
    /// carried forward. `target` is expected to be empty.
    ///
    /// # Returns
    ///
    /// The manifest describing `target` and the compaction statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a live record is unreadable or corrupt, or if
    /// writing to `target` fails. Nothing is synced on error.
    pub fn rewrite(
        &self,
        target: &mut dyn StorageBackend,
    ) -> CoreResult<(Manifest, CompactionResult)> {
        let engine = QueryEngine::new(self.source, self.manifest);
        let mut output = Manifest::new();

        for record in self.manifest.live_records() {
            let bytes = engine.read_raw(record)?;
            verify_record(record, &bytes)?;
            let offset = target.append(&bytes)?;

            debug!(id = %record.id, from = record.offset, to = offset, "copied record");
            output.insert(ManifestRecord {
                offset,
                tombstoned: false,
                ..record.clone()
            });
        }

        target.sync()?;

        let result = CompactionResult {
            input_records: self.manifest.len(),
            output_records: output.len(),
            tombstones_removed: self.manifest.tombstone_count(),
            bytes_before: self.source.size()?,
            bytes_after: target.size()?,
        };

        Ok((output, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use binmem_codec::{encode_record, BinEntry, EntryId};
    use binmem_storage::InMemoryBackend;

    fn populated(count: usize) -> (InMemoryBackend, Manifest, Vec<BinEntry>) {
        let mut log = InMemoryBackend::new();
        let mut manifest = Manifest::new();
        let mut entries = Vec::new();
        for i in 0..count {
            let entry = BinEntry::new(EntryId::new(), "p", format!("k{i}"), format!("v{i}"));
            let bytes = encode_record(&entry);
            let offset = log.append(&bytes).unwrap();
            manifest.insert(ManifestRecord::for_entry(&entry, offset, bytes.len() as u64));
            entries.push(entry);
        }
        (log, manifest, entries)
    }

    #[test]
    fn compaction_drops_tombstoned_records() {
        let (log, mut manifest, entries) = populated(4);
        manifest.tombstone(&entries[1].id);
        manifest.tombstone(&entries[3].id);

        let mut target = InMemoryBackend::new();
        let (output, result) = Compactor::new(&log, &manifest).rewrite(&mut target).unwrap();

        assert_eq!(result.input_records, 4);
        assert_eq!(result.output_records, 2);
        assert_eq!(result.tombstones_removed, 2);
        assert!(result.bytes_after < result.bytes_before);
        assert_eq!(result.bytes_saved(), result.bytes_before - result.bytes_after);

        assert!(output.lookup(&entries[1].id).is_none());
        let engine = QueryEngine::new(&target, &output);
        let remaining = engine.get_entries(None, None).unwrap();
        assert_eq!(remaining, vec![entries[0].clone(), entries[2].clone()]);
    }

    #[test]
    fn offsets_are_dense_after_compaction() {
        let (log, mut manifest, entries) = populated(3);
        manifest.tombstone(&entries[0].id);

        let mut target = InMemoryBackend::new();
        let (output, _) = Compactor::new(&log, &manifest).rewrite(&mut target).unwrap();

        let first = output.lookup(&entries[1].id).unwrap();
        let second = output.lookup(&entries[2].id).unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, first.end());
        assert_eq!(output.indexed_len(), target.size().unwrap());
    }

    #[test]
    fn estimate_matches_rewrite() {
        let (log, mut manifest, entries) = populated(5);
        manifest.tombstone(&entries[2].id);

        let compactor = Compactor::new(&log, &manifest);
        let estimate = compactor.estimate().unwrap();
        let mut target = InMemoryBackend::new();
        let (_, result) = compactor.rewrite(&mut target).unwrap();

        assert_eq!(estimate, result);
    }

    #[test]
    fn nothing_to_remove_keeps_size() {
        let (log, manifest, _) = populated(3);
        let mut target = InMemoryBackend::new();
        let (_, result) = Compactor::new(&log, &manifest).rewrite(&mut target).unwrap();

        assert_eq!(result.bytes_saved(), 0);
        assert_eq!(target.data(), log.data());
    }

    #[test]
    fn corrupt_live_record_fails() {
        let (log, manifest, _) = populated(2);
        let mut data = log.data();
        data[30] ^= 0xFF;
        let damaged = InMemoryBackend::with_data(data);

        let mut target = InMemoryBackend::new();
        let err = Compactor::new(&damaged, &manifest)
            .rewrite(&mut target)
            .unwrap_err();
        assert!(matches!(err, CoreError::CorruptRecord { .. }));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn compaction_keeps_exactly_the_live_entries(
                values in prop::collection::vec(".{0,64}", 1..24),
                removed in prop::collection::vec(any::<bool>(), 24),
            ) {
                let mut log = InMemoryBackend::new();
                let mut manifest = Manifest::new();
                let mut live = Vec::new();
                for (i, value) in values.iter().enumerate() {
                    let entry = BinEntry::new(EntryId::new(), "prop", format!("k{i}"), value.as_str());
                    let bytes = encode_record(&entry);
                    let offset = log.append(&bytes).unwrap();
                    manifest.insert(ManifestRecord::for_entry(&entry, offset, bytes.len() as u64));
                    if removed[i] {
                        manifest.tombstone(&entry.id);
                    } else {
                        live.push(entry);
                    }
                }

                let mut target = InMemoryBackend::new();
                let (output, result) = Compactor::new(&log, &manifest).rewrite(&mut target).unwrap();

                prop_assert!(result.bytes_after <= result.bytes_before);
                prop_assert_eq!(result.output_records, live.len());
                prop_assert_eq!(output.tombstone_count(), 0);
                let engine = QueryEngine::new(&target, &output);
                prop_assert_eq!(engine.get_entries(None, None).unwrap(), live);
            }
        }
    }
}
