//! Append log backend trait.

use crate::error::StorageResult;

/// The append log a BinMem store writes its records into.
///
/// Backends are **opaque byte stores**. The store frames records, keeps the
/// manifest and decides when to flush; the backend only moves bytes.
///
/// # Invariants
///
/// - `append` writes at the current end and returns the offset where the data begins
/// - Offsets returned by `append` are strictly increasing
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush`/`sync` make all appended data durable
/// - Backends must be `Send + Sync` so readers can share them across threads
///
/// # Implementors
///
/// - [`super::FileBackend`] - For persistent storage
/// - [`super::InMemoryBackend`] - For testing
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends
    /// beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the log.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs. After a failed append the
    /// tail of the log may contain a partial write.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the log in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// Stronger than `flush`: after this returns the appended bytes survive
    /// power loss, not just process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the log to `new_size` bytes.
    ///
    /// Used to roll back appends that were never published to the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::InvalidTruncate`] if `new_size` is
    /// greater than the current size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
