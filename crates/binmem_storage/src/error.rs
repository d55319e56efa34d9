//! Error types for append log operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing the append log.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the log.
    #[error("read beyond end of log: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current log size.
        size: u64,
    },

    /// Attempted to truncate the log to a size larger than it is.
    #[error("cannot truncate log of {size} bytes to {requested} bytes")]
    InvalidTruncate {
        /// The requested new size.
        requested: u64,
        /// The current log size.
        size: u64,
    },
}
