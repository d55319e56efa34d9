//! The manifest: an in-memory index from entry id to log location.
//!
//! The manifest is a cache. Everything in it except tombstones can be
//! rebuilt by scanning the log; tombstones live only here (and in the
//! sidecar file, see [`Manifest::encode`]) until the next compaction drops
//! the removed records for good.

use crate::error::{CoreError, CoreResult};
use crate::scan::{LogScanner, ScanReport};
use binmem_codec::{
    read_varint, write_varint, BinEntry, Channel, EntryId, EntryType, Timestamp,
};
use binmem_storage::StorageBackend;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Magic bytes for the manifest sidecar file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"BMMF";

/// Current manifest sidecar version.
pub const MANIFEST_VERSION: u16 = 1;

/// Location and summary of one entry in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    /// Entry id.
    pub id: EntryId,
    /// Offset of the record in the current log.
    pub offset: u64,
    /// Encoded length of the record.
    pub length: u64,
    /// Creation time of the entry.
    pub created_at: Timestamp,
    /// Payload kind of the entry.
    pub entry_type: EntryType,
    /// Channel of the entry.
    pub channel: Channel,
    /// Path of the entry, kept so filters never touch the log.
    pub path: Arc<str>,
    /// Set once the entry has been removed.
    pub tombstoned: bool,
}

impl ManifestRecord {
    /// Creates a live record describing `entry` stored at `offset`.
    #[must_use]
    pub fn for_entry(entry: &BinEntry, offset: u64, length: u64) -> Self {
        Self {
            id: entry.id,
            offset,
            length,
            created_at: entry.timestamp,
            entry_type: entry.entry_type,
            channel: entry.channel,
            path: Arc::from(entry.path.as_str()),
            tombstoned: false,
        }
    }

    /// Returns the offset just past this record.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// How a path filter compares against stored paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathMatch {
    /// Byte-for-byte equality.
    #[default]
    Exact,
    /// The stored path starts with the filter.
    Prefix,
    /// Equality ignoring ASCII case.
    IgnoreCase,
}

/// Selects entries by path and channel.
///
/// An empty filter matches every live entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    path: Option<String>,
    path_match: PathMatch,
    channel: Option<Channel>,
}

impl EntryFilter {
    /// A filter that matches everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches entries whose path equals `path`.
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Matches entries whose path starts with `prefix`.
    #[must_use]
    pub fn path_prefix(prefix: impl Into<String>) -> Self {
        Self {
            path: Some(prefix.into()),
            path_match: PathMatch::Prefix,
            channel: None,
        }
    }

    /// Matches entries whose path equals `path` ignoring ASCII case.
    #[must_use]
    pub fn path_ignore_case(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            path_match: PathMatch::IgnoreCase,
            channel: None,
        }
    }

    /// Builds a filter from the optional path and channel of the store API.
    #[must_use]
    pub fn from_parts(path: Option<&str>, channel: Option<Channel>) -> Self {
        Self {
            path: path.map(str::to_string),
            path_match: PathMatch::Exact,
            channel,
        }
    }

    /// Restricts the filter to one channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Returns `true` if a stored path and channel pass the filter.
    #[must_use]
    pub fn matches(&self, path: &str, channel: Channel) -> bool {
        if self.channel.is_some_and(|c| c != channel) {
            return false;
        }
        match (&self.path, self.path_match) {
            (None, _) => true,
            (Some(p), PathMatch::Exact) => path == p,
            (Some(p), PathMatch::Prefix) => path.starts_with(p.as_str()),
            (Some(p), PathMatch::IgnoreCase) => path.eq_ignore_ascii_case(p),
        }
    }
}

/// In-memory index of every entry the store knows about.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    records: HashMap<EntryId, ManifestRecord>,
    by_offset: BTreeMap<u64, EntryId>,
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a manifest by scanning `log` from offset 0.
    ///
    /// A torn or corrupt record ends the scan; the report says where.
    ///
    /// # Errors
    ///
    /// Returns an error only if the log cannot be read.
    pub fn rebuild(log: &dyn StorageBackend, chunk_size: usize) -> CoreResult<(Self, ScanReport)> {
        let mut manifest = Self::new();
        let report = manifest.index_from(log, 0, chunk_size)?;
        Ok((manifest, report))
    }

    /// Indexes every record from `start` to the end of the log.
    ///
    /// Used after loading a sidecar to pick up appends it does not cover.
    ///
    /// # Errors
    ///
    /// Returns an error only if the log cannot be read.
    pub fn index_from(
        &mut self,
        log: &dyn StorageBackend,
        start: u64,
        chunk_size: usize,
    ) -> CoreResult<ScanReport> {
        let mut scanner = LogScanner::new(log, start, chunk_size)?;
        while let Some(record) = scanner.next_record()? {
            self.insert(ManifestRecord::for_entry(
                &record.entry,
                record.offset,
                record.length,
            ));
        }
        Ok(scanner.finish())
    }

    /// Registers a record, replacing any previous record with the same id.
    pub fn insert(&mut self, record: ManifestRecord) {
        if let Some(previous) = self.records.get(&record.id) {
            self.by_offset.remove(&previous.offset);
        }
        if let Some(displaced) = self.by_offset.insert(record.offset, record.id) {
            if displaced != record.id {
                self.records.remove(&displaced);
            }
        }
        self.records.insert(record.id, record);
    }

    /// Marks an entry as removed.
    ///
    /// Returns `false` if the id is unknown or already removed.
    pub fn tombstone(&mut self, id: &EntryId) -> bool {
        match self.records.get_mut(id) {
            Some(record) if !record.tombstoned => {
                record.tombstoned = true;
                true
            }
            _ => false,
        }
    }

    /// Looks up a record, live or removed.
    #[must_use]
    pub fn lookup(&self, id: &EntryId) -> Option<&ManifestRecord> {
        self.records.get(id)
    }

    /// Looks up a live record.
    #[must_use]
    pub fn lookup_live(&self, id: &EntryId) -> Option<&ManifestRecord> {
        self.lookup(id).filter(|r| !r.tombstoned)
    }

    /// Returns `true` if the id was ever recorded, live or removed.
    #[must_use]
    pub fn contains(&self, id: &EntryId) -> bool {
        self.records.contains_key(id)
    }

    /// Iterates all records, including removed ones, in ascending offset order.
    pub fn records(&self) -> impl Iterator<Item = &ManifestRecord> + '_ {
        self.by_offset
            .values()
            .filter_map(move |id| self.records.get(id))
    }

    /// Iterates live records in ascending offset order.
    pub fn live_records(&self) -> impl Iterator<Item = &ManifestRecord> + '_ {
        self.records().filter(|r| !r.tombstoned)
    }

    /// Returns live records matching `filter`, in ascending offset order.
    #[must_use]
    pub fn filter_by(&self, filter: &EntryFilter) -> Vec<&ManifestRecord> {
        self.live_records()
            .filter(|r| filter.matches(&r.path, r.channel))
            .collect()
    }

    /// Number of records, including removed ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the manifest holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of live records.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.records.values().filter(|r| !r.tombstoned).count()
    }

    /// Number of removed records still occupying log space.
    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.records.values().filter(|r| r.tombstoned).count()
    }

    /// Total encoded size of live records.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_records().map(|r| r.length).sum()
    }

    /// Returns the end offset of the last record, or 0 if empty.
    #[must_use]
    pub fn indexed_len(&self) -> u64 {
        self.by_offset
            .values()
            .next_back()
            .and_then(|id| self.records.get(id))
            .map_or(0, ManifestRecord::end)
    }

    /// Encodes the manifest for the sidecar file.
    ///
    /// `log_len` is the log size the manifest describes; a reader uses it to
    /// tell which appends happened after the sidecar was written.
    ///
    /// ```text
    /// | magic (4) | version (2) | log_len (8) | count (varint) |
    /// { id (16) | offset (varint) | length (varint) | created_at (8) |
    ///   entry_type (1) | channel (1) | tombstoned (1) | path_len (varint) | path }*
    /// | crc32 (4) |
    /// ```
    #[must_use]
    pub fn encode(&self, log_len: u64) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&log_len.to_le_bytes());
        write_varint(&mut buf, self.records.len() as u64);

        for record in self.records() {
            buf.extend_from_slice(record.id.as_bytes());
            write_varint(&mut buf, record.offset);
            write_varint(&mut buf, record.length);
            buf.extend_from_slice(&record.created_at.ticks().to_le_bytes());
            buf.push(record.entry_type.as_byte());
            buf.push(record.channel.as_byte());
            buf.push(u8::from(record.tombstoned));
            write_varint(&mut buf, record.path.len() as u64);
            buf.extend_from_slice(record.path.as_bytes());
        }

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a sidecar file, returning the manifest and the log size it covers.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidManifest`] if the bytes are malformed.
    pub fn decode(data: &[u8]) -> CoreResult<(Self, u64)> {
        if data.len() < MANIFEST_MAGIC.len() + 2 + 8 + 1 + 4 {
            return Err(CoreError::invalid_manifest("manifest too short"));
        }
        if data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_manifest("invalid manifest magic"));
        }

        let body_len = data.len() - 4;
        let stored = u32::from_le_bytes([
            data[body_len],
            data[body_len + 1],
            data[body_len + 2],
            data[body_len + 3],
        ]);
        if stored != crc32fast::hash(&data[..body_len]) {
            return Err(CoreError::invalid_manifest("manifest checksum mismatch"));
        }

        let mut reader = SidecarReader {
            data: &data[..body_len],
            pos: 4,
        };

        let version = u16::from_le_bytes([reader.byte()?, reader.byte()?]);
        if version > MANIFEST_VERSION {
            return Err(CoreError::invalid_manifest(format!(
                "unsupported manifest version: {version}"
            )));
        }

        let log_len = reader.u64_le()?;
        let count = reader.varint()?;

        let mut manifest = Self::new();
        for _ in 0..count {
            let id = EntryId::from_slice(reader.take(16)?)
                .ok_or_else(|| CoreError::invalid_manifest("invalid entry id"))?;
            let offset = reader.varint()?;
            let length = reader.varint()?;
            let created_at = Timestamp::from_ticks(reader.u64_le()?);
            let entry_type = EntryType::from_byte(reader.byte()?);
            let channel_tag = reader.byte()?;
            let channel = Channel::from_byte(channel_tag).ok_or_else(|| {
                CoreError::invalid_manifest(format!("unknown channel tag {channel_tag}"))
            })?;
            let tombstoned = reader.byte()? != 0;
            let path_len = reader.varint()? as usize;
            let path = std::str::from_utf8(reader.take(path_len)?)
                .map_err(|_| CoreError::invalid_manifest("invalid path"))?;

            if offset.checked_add(length).is_none_or(|end| end > log_len) {
                return Err(CoreError::invalid_manifest(
                    "record extends beyond covered log",
                ));
            }

            manifest.insert(ManifestRecord {
                id,
                offset,
                length,
                created_at,
                entry_type,
                channel,
                path: Arc::from(path),
                tombstoned,
            });
        }

        if reader.pos != reader.data.len() {
            return Err(CoreError::invalid_manifest("trailing bytes after records"));
        }

        Ok((manifest, log_len))
    }
}

struct SidecarReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SidecarReader<'a> {
    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        if len > self.data.len() - self.pos {
            return Err(CoreError::invalid_manifest("manifest too short"));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn byte(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64_le(&mut self) -> CoreResult<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn varint(&mut self) -> CoreResult<u64> {
        let (value, used) = read_varint(&self.data[self.pos..])
            .map_err(|e| CoreError::invalid_manifest(e.to_string()))?;
        self.pos += used;
        Ok(value)
    }
}
