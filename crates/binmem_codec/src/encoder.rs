//! Record encoder.

use crate::entry::BinEntry;
use crate::varint::{varint_len, write_varint};
use crate::{CRC_SIZE, FIXED_HEADER_SIZE, RECORD_VERSION};
use bytes::BufMut;

/// Encodes a single entry into one framed record.
///
/// ```text
/// | version (1) | entry_type (1) | channel (1) | id (16) | timestamp_ticks (8) |
/// | path_len (varint) | path | key_len (varint) | key | value_len (varint) | value |
/// | meta_count (varint) | { k_len (varint) | k | v_len (varint) | v }* | crc32 (4) |
/// ```
///
/// All fixed-width integers are little-endian. The CRC32 covers every
/// byte before it.
#[must_use]
pub fn encode_record(entry: &BinEntry) -> Vec<u8> {
    let mut encoder = RecordEncoder::with_capacity(encoded_len(entry));
    encoder.encode(entry);
    encoder.into_bytes()
}

/// Returns the exact size of the record [`encode_record`] produces.
#[must_use]
pub fn encoded_len(entry: &BinEntry) -> usize {
    let field = |s: &str| varint_len(s.len() as u64) + s.len();
    let metadata: usize = entry
        .metadata
        .iter()
        .map(|(k, v)| field(k) + field(v))
        .sum();

    FIXED_HEADER_SIZE
        + field(&entry.path)
        + field(&entry.key)
        + field(&entry.value)
        + varint_len(entry.metadata.len() as u64)
        + metadata
        + CRC_SIZE
}

/// Appends framed records to a growing buffer.
///
/// Each record carries its own checksum, so a buffer of several records can
/// be written to a log or snapshot as-is and decoded one record at a time.
#[derive(Debug, Default)]
pub struct RecordEncoder {
    buffer: Vec<u8>,
}

impl RecordEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder with the given buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encodes one record and returns the number of bytes it occupies.
    pub fn encode(&mut self, entry: &BinEntry) -> usize {
        let start = self.buffer.len();
        let buf = &mut self.buffer;

        buf.put_u8(RECORD_VERSION);
        buf.put_u8(entry.entry_type.as_byte());
        buf.put_u8(entry.channel.as_byte());
        buf.put_slice(entry.id.as_bytes());
        buf.put_u64_le(entry.timestamp.ticks());

        put_str(buf, &entry.path);
        put_str(buf, &entry.key);
        put_str(buf, &entry.value);

        write_varint(buf, entry.metadata.len() as u64);
        for (k, v) in &entry.metadata {
            put_str(buf, k);
            put_str(buf, v);
        }

        let crc = crc32fast::hash(&buf[start..]);
        buf.put_u32_le(crc);

        buf.len() - start
    }

    /// Returns the number of bytes encoded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if nothing has been encoded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes the encoder and returns the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}
