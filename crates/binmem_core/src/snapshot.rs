//! Whole-store snapshots for export and import.
//!
//! ## Format
//!
//! ```text
//! | magic "BMSN" (4) | version (1) | count (varint) | record* |
//! ```
//!
//! Records use the log encoding, so a snapshot is a log with a header.
//! Removed entries are never part of a snapshot.

use crate::config::ImportMode;
use crate::dir::sibling;
use crate::error::{CoreError, CoreResult};
use binmem_codec::{
    decode_record, encode_record, read_varint, write_varint, BinEntry, EntryId,
};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes at the start of a snapshot file.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"BMSN";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Result of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportResult {
    /// Number of entries written.
    pub entries: usize,
    /// Size of the snapshot file.
    pub bytes: u64,
    /// Where the snapshot was written.
    pub path: PathBuf,
}

/// Result of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportResult {
    /// Entries added to the store.
    pub imported: usize,
    /// Entries skipped because the store already knew their id.
    pub skipped: usize,
    /// Policy the import ran with.
    pub mode: ImportMode,
}

/// Builds a snapshot from encoded records.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    count: u64,
    records: Vec<u8>,
}

impl SnapshotBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one encoded record.
    pub fn push_record(&mut self, record: &[u8]) {
        self.records.extend_from_slice(record);
        self.count += 1;
    }

    /// Adds one entry, encoding it.
    pub fn push_entry(&mut self, entry: &BinEntry) {
        self.push_record(&encode_record(entry));
    }

    /// Number of records added.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Returns `true` if no records were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Produces the snapshot bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SNAPSHOT_MAGIC.len() + 11 + self.records.len());
        out.extend_from_slice(&SNAPSHOT_MAGIC);
        out.push(SNAPSHOT_VERSION);
        write_varint(&mut out, self.count);
        out.extend_from_slice(&self.records);
        out
    }
}

/// Decodes and validates a snapshot.
///
/// Validation is complete before anything is returned: header, every record
/// checksum, the declared count, unique ids and the absence of trailing
/// bytes.
///
/// # Errors
///
/// Returns [`CoreError::InvalidSnapshot`] describing the first problem found.
pub fn decode_snapshot(data: &[u8]) -> CoreResult<Vec<BinEntry>> {
    if data.len() < SNAPSHOT_MAGIC.len() + 2 {
        return Err(CoreError::invalid_snapshot("snapshot too short"));
    }
    if data[..4] != SNAPSHOT_MAGIC {
        return Err(CoreError::invalid_snapshot("invalid snapshot magic"));
    }
    if data[4] != SNAPSHOT_VERSION {
        return Err(CoreError::invalid_snapshot(format!(
            "unsupported snapshot version: {}",
            data[4]
        )));
    }

    let (count, used) = read_varint(&data[5..])
        .map_err(|e| CoreError::invalid_snapshot(format!("invalid entry count: {e}")))?;
    let mut pos = 5 + used;

    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    for index in 0..count {
        let (entry, len) = decode_record(&data[pos..]).map_err(|e| {
            CoreError::invalid_snapshot(format!("record {index} at byte {pos}: {e}"))
        })?;
        if !seen.insert(entry.id) {
            return Err(CoreError::invalid_snapshot(format!(
                "duplicate entry id {}",
                entry.id
            )));
        }
        entries.push(entry);
        pos += len;
    }

    if pos != data.len() {
        return Err(CoreError::invalid_snapshot(format!(
            "{} trailing bytes after {count} records",
            data.len() - pos
        )));
    }

    Ok(entries)
}

/// Writes snapshot bytes to `target` atomically.
///
/// The bytes go to `<target>.tmp`, which is synced and then renamed.
pub fn write_snapshot_file(target: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = sibling(target, ".tmp");
    let mut file = File::create(&temp_path)?;
    if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    drop(file);

    fs::rename(&temp_path, target)?;
    Ok(())
}

/// Reads and validates a snapshot file.
pub fn read_snapshot_file(source: &Path) -> CoreResult<Vec<BinEntry>> {
    let data = fs::read(source)?;
    decode_snapshot(&data)
}

/// Splits snapshot entries into those to append and the number skipped.
///
/// Under [`ImportMode::Merge`] an entry is skipped when `known` returns true
/// for its id; under [`ImportMode::Replace`] nothing is skipped.
pub(crate) fn select_for_import<F>(
    entries: Vec<BinEntry>,
    mode: ImportMode,
    known: F,
) -> (Vec<BinEntry>, usize)
where
    F: Fn(&EntryId) -> bool,
{
    match mode {
        ImportMode::Replace => (entries, 0),
        ImportMode::Merge => {
            let total = entries.len();
            let fresh: Vec<BinEntry> = entries.into_iter().filter(|e| !known(&e.id)).collect();
            let skipped = total - fresh.len();
            (fresh, skipped)
        }
    }
}
