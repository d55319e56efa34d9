//! Error types for the BinMem store.

use binmem_codec::{CodecError, EntryId};
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Append log error.
    #[error("storage error: {0}")]
    Storage(#[from] binmem_storage::StorageError),

    /// I/O error outside the append log (lock file, sidecar, snapshots).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record failed to decode where a valid record was required.
    #[error("corrupt record at offset {offset}: {source}")]
    CorruptRecord {
        /// Log offset of the record.
        offset: u64,
        /// The decode failure.
        source: CodecError,
    },

    /// The record at a manifest location belongs to a different entry.
    #[error("record at offset {offset} holds entry {found}, manifest expected {expected}")]
    IdMismatch {
        /// Log offset of the record.
        offset: u64,
        /// Id recorded in the manifest.
        expected: EntryId,
        /// Id found in the record.
        found: EntryId,
    },

    /// No live entry has this id.
    #[error("entry not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: EntryId,
    },

    /// Another mutating operation held the writer lock past the configured timeout.
    #[error("concurrent access: {operation} could not acquire the writer lock")]
    ConcurrentAccess {
        /// The operation that gave up.
        operation: &'static str,
    },

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Another store instance has the log open.
    #[error("store locked: another instance has exclusive access")]
    StoreLocked,

    /// A previous write failed; the store refuses writes until reopened.
    #[error("store is read-only: {reason}")]
    ReadOnly {
        /// What put the store into read-only mode.
        reason: String,
    },

    /// A snapshot file is malformed.
    #[error("invalid snapshot: {message}")]
    InvalidSnapshot {
        /// Description of the problem.
        message: String,
    },

    /// A manifest sidecar file is malformed.
    #[error("invalid manifest: {message}")]
    InvalidManifest {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a corrupt record error.
    pub fn corrupt_record(offset: u64, source: CodecError) -> Self {
        Self::CorruptRecord { offset, source }
    }

    /// Creates a read-only error.
    pub fn read_only(reason: impl Into<String>) -> Self {
        Self::ReadOnly {
            reason: reason.into(),
        }
    }

    /// Creates an invalid snapshot error.
    pub fn invalid_snapshot(message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            message: message.into(),
        }
    }

    /// Creates an invalid manifest error.
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns `true` if the error means stored bytes are damaged.
    #[must_use]
    pub fn is_corrupt_record(&self) -> bool {
        matches!(self, Self::CorruptRecord { .. } | Self::IdMismatch { .. })
    }
}
