//! Async wrapper for use from tokio tasks.
//!
//! Every call runs the blocking store operation on tokio's blocking pool.
//! A write that has started runs to completion even if the awaiting future
//! is dropped; its result is then discarded.

use crate::compaction::CompactionResult;
use crate::error::{CoreError, CoreResult};
use crate::snapshot::{ExportResult, ImportResult};
use crate::store::{BinMemory, NewEntry};
use binmem_codec::{BinEntry, Channel, EntryId, Metadata};
use std::path::PathBuf;
use std::sync::Arc;

/// A cloneable async handle to a [`BinMemory`].
#[derive(Debug, Clone)]
pub struct AsyncBinMemory {
    inner: Arc<BinMemory>,
}

impl AsyncBinMemory {
    /// Wraps a store.
    pub fn new(store: BinMemory) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps a store that is already shared.
    pub fn from_arc(store: Arc<BinMemory>) -> Self {
        Self { inner: store }
    }

    /// Returns the underlying store for synchronous calls.
    pub fn blocking(&self) -> &BinMemory {
        &self.inner
    }

    async fn run<T, F>(&self, op: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&BinMemory) -> CoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| CoreError::invalid_operation(format!("blocking task failed: {e}")))?
    }

    /// Appends a new entry. See [`BinMemory::add_entry`].
    pub async fn add_entry_async(
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
        self.add(entry).await
    }

    /// Appends a new entry built with [`NewEntry`].
    pub async fn add(&self, entry: NewEntry) -> CoreResult<EntryId> {
        self.run(move |store| store.add(entry)).await
    }

    /// See [`BinMemory::get_entries`].
    pub async fn get_entries(
        &self,
        path: Option<String>,
        channel: Option<Channel>,
    ) -> CoreResult<Vec<BinEntry>> {
        self.run(move |store| store.get_entries(path.as_deref(), channel))
            .await
    }

    /// See [`BinMemory::get_entry_by_id`].
    pub async fn get_entry_by_id(&self, id: EntryId) -> CoreResult<Option<BinEntry>> {
        self.run(move |store| store.get_entry_by_id(&id)).await
    }

    /// See [`BinMemory::query`].
    pub async fn query<F>(&self, predicate: F) -> CoreResult<Vec<BinEntry>>
    where
        F: Fn(&BinEntry) -> bool + Send + 'static,
    {
        self.run(move |store| store.query(predicate)).await
    }

    /// See [`BinMemory::remove_entry`].
    pub async fn remove_entry(&self, id: EntryId) -> CoreResult<bool> {
        self.run(move |store| store.remove_entry(&id)).await
    }

    /// See [`BinMemory::compact`].
    pub async fn compact(&self) -> CoreResult<CompactionResult> {
        self.run(BinMemory::compact).await
    }

    /// See [`BinMemory::export`].
    pub async fn export(&self, target: impl Into<PathBuf>) -> CoreResult<ExportResult> {
        let target = target.into();
        self.run(move |store| store.export(&target)).await
    }

    /// See [`BinMemory::import`].
    pub async fn import(&self, source: impl Into<PathBuf>) -> CoreResult<ImportResult> {
        let source = source.into();
        self.run(move |store| store.import(&source)).await
    }
}
