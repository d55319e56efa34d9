//! Error types for the record codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding a record.
///
/// Every variant means the bytes do not hold a valid record. Callers that
/// scan a log use [`CodecError::is_truncation`] to tell a record cut short
/// at the end of the buffer apart from bytes that are actually damaged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A length or fixed-size field would read past the end of the buffer.
    #[error("record truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The stored checksum does not match the record contents.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record bytes.
        actual: u32,
    },

    /// The record was written by an unknown format version.
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),

    /// The channel tag is not one of the known channels.
    #[error("unknown channel tag {0}")]
    UnknownChannel(u8),

    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A varint ran past ten bytes.
    #[error("varint overflow")]
    VarintOverflow,

    /// A length prefix exceeds the maximum field size.
    #[error("field length {len} exceeds maximum of {max} bytes")]
    FieldTooLarge {
        /// The declared length.
        len: u64,
        /// The maximum accepted length.
        max: u64,
    },
}

impl CodecError {
    /// Returns `true` if the buffer simply ended before the record did.
    ///
    /// A truncated record may still be valid once more bytes are available.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}
