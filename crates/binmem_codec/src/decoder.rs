//! Record decoder.

use crate::entry::{BinEntry, Channel, EntryType, Metadata, Timestamp};
use crate::error::{CodecError, CodecResult};
use crate::id::EntryId;
use crate::varint::read_varint;
use crate::{CRC_SIZE, FIXED_HEADER_SIZE, MAX_FIELD_LEN, RECORD_VERSION};

/// Decodes the record at the start of `data`.
///
/// Returns the entry and the number of bytes the record occupies. Bytes
/// after the record are ignored.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if any field would read past the end of
/// `data`, [`CodecError::ChecksumMismatch`] if the CRC does not match, and
/// other [`CodecError`] variants for structurally invalid records.
pub fn decode_record(data: &[u8]) -> CodecResult<(BinEntry, usize)> {
    let mut decoder = RecordDecoder::new(data);
    let entry = decoder.decode_next()?;
    Ok((entry, decoder.position()))
}

/// Returns how many bytes the record at the start of `data` claims to
/// occupy, checksum included, without verifying the checksum or decoding
/// the strings.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if the framing itself runs past the end
/// of `data`, or another [`CodecError`] if the header or a length prefix is
/// invalid.
pub fn framed_len(data: &[u8]) -> CodecResult<usize> {
    let mut cursor = Cursor { data, pos: 0 };
    cursor.raw_record()?;
    cursor.take(CRC_SIZE)?;
    Ok(cursor.pos)
}

/// Decodes consecutive records from a buffer.
///
/// A failed decode leaves the position at the start of the offending
/// record, so callers know exactly how many bytes were valid.
#[derive(Debug)]
pub struct RecordDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Raw field slices of a record whose checksum has not been checked yet.
struct RawRecord<'a> {
    entry_type: u8,
    channel: u8,
    id: [u8; 16],
    ticks: u64,
    path: &'a [u8],
    key: &'a [u8],
    value: &'a [u8],
    metadata: Vec<(&'a [u8], &'a [u8])>,
}

impl<'a> RecordDecoder<'a> {
    /// Creates a decoder positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns the offset of the next record within the buffer.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns `true` if every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Returns the bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Decodes the next record and advances past it.
    ///
    /// # Errors
    ///
    /// See [`decode_record`].
    pub fn decode_next(&mut self) -> CodecResult<BinEntry> {
        let mut cursor = Cursor {
            data: self.remaining(),
            pos: 0,
        };

        let raw = cursor.raw_record()?;
        let body_len = cursor.pos;

        let stored = cursor.take(CRC_SIZE)?;
        let expected = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        let actual = crc32fast::hash(&cursor.data[..body_len]);
        if expected != actual {
            return Err(CodecError::ChecksumMismatch { expected, actual });
        }

        let entry = raw.into_entry()?;
        self.pos += cursor.pos;
        Ok(entry)
    }
}

impl RawRecord<'_> {
    fn into_entry(self) -> CodecResult<BinEntry> {
        let channel =
            Channel::from_byte(self.channel).ok_or(CodecError::UnknownChannel(self.channel))?;

        let mut metadata = Metadata::new();
        for (k, v) in self.metadata {
            metadata.insert(utf8(k, "metadata key")?, utf8(v, "metadata value")?);
        }

        Ok(BinEntry {
            id: EntryId::from_bytes(self.id),
            entry_type: EntryType::from_byte(self.entry_type),
            channel,
            timestamp: Timestamp::from_ticks(self.ticks),
            path: utf8(self.path, "path")?,
            key: utf8(self.key, "key")?,
            value: utf8(self.value, "value")?,
            metadata,
        })
    }
}

fn utf8(bytes: &[u8], field: &'static str) -> CodecResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let available = self.data.len() - self.pos;
        if len > available {
            return Err(CodecError::Truncated {
                needed: self.pos + len,
                available: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn varint(&mut self) -> CodecResult<u64> {
        let (value, used) = read_varint(&self.data[self.pos..]).map_err(|e| match e {
            CodecError::Truncated { .. } => CodecError::Truncated {
                needed: self.data.len() + 1,
                available: self.data.len(),
            },
            other => other,
        })?;
        self.pos += used;
        Ok(value)
    }

    fn field(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.varint()?;
        if len > MAX_FIELD_LEN {
            return Err(CodecError::FieldTooLarge {
                len,
                max: MAX_FIELD_LEN,
            });
        }
        self.take(len as usize)
    }

    fn raw_record(&mut self) -> CodecResult<RawRecord<'a>> {
        let header = self.take(FIXED_HEADER_SIZE)?;
        if header[0] != RECORD_VERSION {
            return Err(CodecError::UnsupportedVersion(header[0]));
        }

        let mut id = [0u8; 16];
        id.copy_from_slice(&header[3..19]);
        let mut ticks = [0u8; 8];
        ticks.copy_from_slice(&header[19..27]);

        let path = self.field()?;
        let key = self.field()?;
        let value = self.field()?;

        let count = self.varint()?;
        let mut metadata = Vec::new();
        for _ in 0..count {
            let k = self.field()?;
            let v = self.field()?;
            metadata.push((k, v));
        }

        Ok(RawRecord {
            entry_type: header[1],
            channel: header[2],
            id,
            ticks: u64::from_le_bytes(ticks),
            path,
            key,
            value,
            metadata,
        })
    }
}
