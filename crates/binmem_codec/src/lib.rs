//! # BinMem Codec
//!
//! The entry model and the binary record format of the BinMem store.
//!
//! A record is self-framing: every length is a varint prefix and the record
//! ends with a CRC32 over all preceding bytes. That lets a reader walk a log
//! from offset 0 without an external index and stop cleanly at a torn tail.
//!
//! ## Record Layout
//!
//! ```text
//! [version:1][entryType:1][channel:1][id:16][timestampTicks:8]
//! [pathLen:varint][path][keyLen:varint][key][valueLen:varint][value]
//! [metaCount:varint]{[kLen:varint][k][vLen:varint][v]}*[crc32:4]
//! ```
//!
//! The encoding is deterministic: metadata pairs are written in key order.
//!
//! ## Usage
//!
//! ```
//! use binmem_codec::{BinEntry, Channel, Decode, Encode, EntryId};
//!
//! let entry = BinEntry::new(EntryId::new(), "users", "u1", "Alice")
//!     .with_channel(Channel::InputOutput);
//! let bytes = entry.encode();
//! assert_eq!(BinEntry::decode(&bytes).unwrap(), entry);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod entry;
mod error;
mod id;
mod varint;

pub use decoder::{decode_record, framed_len, RecordDecoder};
pub use encoder::{encode_record, encoded_len, RecordEncoder};
pub use entry::{
    BinEntry, Channel, EntryType, Metadata, ParseChannelError, Timestamp, TICKS_PER_SECOND,
    UNIX_EPOCH_TICKS,
};
pub use error::{CodecError, CodecResult};
pub use id::EntryId;
pub use varint::{read_varint, varint_len, write_varint, MAX_VARINT_LEN};

/// Current record format version, written as the first byte of every record.
pub const RECORD_VERSION: u8 = 1;

/// Size of the fixed-width record header (version, type, channel, id, timestamp).
pub const FIXED_HEADER_SIZE: usize = 1 + 1 + 1 + 16 + 8;

/// Size of the trailing checksum.
pub const CRC_SIZE: usize = 4;

/// Smallest possible record: empty path, key, value and no metadata.
pub const MIN_RECORD_SIZE: usize = FIXED_HEADER_SIZE + 4 + CRC_SIZE;

/// Largest accepted length for a single string field.
///
/// Protects readers from allocating on a corrupted length prefix.
pub const MAX_FIELD_LEN: u64 = 256 * 1024 * 1024;

/// Types that encode to a framed record.
pub trait Encode {
    /// Encodes this value as one record.
    fn encode(&self) -> Vec<u8>;
}

/// Types that decode from a framed record.
pub trait Decode: Sized {
    /// Decodes the record at the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the bytes are not a valid record.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for BinEntry {
    fn encode(&self) -> Vec<u8> {
        encode_record(self)
    }
}

impl Decode for BinEntry {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_record(bytes).map(|(entry, _)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> BinEntry {
        let mut metadata = Metadata::new();
        metadata.insert("author".to_string(), "moderator".to_string());
        metadata.insert("thread".to_string(), "42".to_string());

        BinEntry::new(EntryId::from_bytes([7; 16]), "forums", "post:1", "hello")
            .with_channel(Channel::InputOutput)
            .with_metadata(metadata)
            .with_timestamp(Timestamp::from_ticks(638_000_000_000_000_000))
    }

    #[test]
    fn roundtrip_entry() {
        let entry = sample();
        let bytes = entry.encode();
        let (decoded, used) = decode_record(&bytes).unwrap();

        assert_eq!(decoded, entry);
        assert_eq!(used, bytes.len());
        assert_eq!(encoded_len(&entry), bytes.len());
    }

    #[test]
    fn roundtrip_empty_fields() {
        let entry = BinEntry::new(EntryId::from_bytes([0; 16]), "", "", "")
            .with_timestamp(Timestamp::from_ticks(0));
        let bytes = entry.encode();

        assert_eq!(bytes.len(), MIN_RECORD_SIZE);
        assert_eq!(BinEntry::decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn roundtrip_unicode_and_unknown_entry_type() {
        let entry = BinEntry::new(EntryId::new(), "chat/🚀", "ключ", "値")
            .with_entry_type(EntryType::from_byte(9));
        assert_eq!(BinEntry::decode(&entry.encode()).unwrap(), entry);
    }

    #[test]
    fn layout_is_stable() {
        let entry = BinEntry::new(EntryId::from_bytes([0xAB; 16]), "p", "k", "vv")
            .with_channel(Channel::ErrorLog)
            .with_timestamp(Timestamp::from_ticks(0x0102_0304_0506_0708));
        let bytes = entry.encode();

        assert_eq!(bytes[0], RECORD_VERSION);
        assert_eq!(bytes[1], EntryType::PLAIN.as_byte());
        assert_eq!(bytes[2], Channel::ErrorLog.as_byte());
        assert_eq!(&bytes[3..19], &[0xAB; 16]);
        assert_eq!(&bytes[19..27], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&bytes[27..35], &[1, b'p', 1, b'k', 2, b'v', b'v', 0]);

        let crc = crc32fast::hash(&bytes[..35]);
        assert_eq!(&bytes[35..], &crc.to_le_bytes());
    }

    #[test]
    fn metadata_order_is_deterministic() {
        let mut a = Metadata::new();
        a.insert("z".to_string(), "1".to_string());
        a.insert("a".to_string(), "2".to_string());
        let mut b = Metadata::new();
        b.insert("a".to_string(), "2".to_string());
        b.insert("z".to_string(), "1".to_string());

        let base = sample();
        let one = base.clone().with_metadata(a).encode();
        let two = base.with_metadata(b).encode();
        assert_eq!(one, two);
    }

    #[test]
    fn detect_corruption() {
        let mut bytes = sample().encode();
        bytes[30] ^= 0xFF;

        assert!(matches!(
            BinEntry::decode(&bytes),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn every_prefix_is_truncated() {
        let bytes = sample().encode();
        for len in 0..bytes.len() {
            let err = BinEntry::decode(&bytes[..len]).unwrap_err();
            assert!(err.is_truncation(), "prefix {len}: {err}");
        }
    }

    #[test]
    fn framed_len_ignores_the_checksum() {
        let mut bytes = sample().encode();
        let len = bytes.len();
        bytes[len - 6] ^= 0xFF;
        bytes.extend_from_slice(b"trailing");

        assert!(BinEntry::decode(&bytes).is_err());
        assert_eq!(framed_len(&bytes), Ok(len));
        assert!(framed_len(&bytes[..len - 1]).unwrap_err().is_truncation());
        assert_eq!(framed_len(&[0u8; 64]), Err(CodecError::UnsupportedVersion(0)));
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut bytes = sample().encode();
        bytes[0] = 99;
        assert_eq!(
            BinEntry::decode(&bytes),
            Err(CodecError::UnsupportedVersion(99))
        );
    }

    #[test]
    fn unknown_channel_rejected_after_checksum() {
        let mut bytes = sample().encode();
        let body = bytes.len() - CRC_SIZE;
        bytes[2] = 7;
        let crc = crc32fast::hash(&bytes[..body]);
        bytes[body..].copy_from_slice(&crc.to_le_bytes());

        assert_eq!(BinEntry::decode(&bytes), Err(CodecError::UnknownChannel(7)));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut bytes = vec![0u8; FIXED_HEADER_SIZE];
        bytes[0] = RECORD_VERSION;
        write_varint(&mut bytes, MAX_FIELD_LEN + 1);

        assert!(matches!(
            BinEntry::decode(&bytes),
            Err(CodecError::FieldTooLarge { .. })
        ));
    }

    #[test]
    fn decoder_walks_consecutive_records() {
        let first = sample();
        let second = BinEntry::new(EntryId::new(), "blogs", "b1", "draft");

        let mut encoder = RecordEncoder::new();
        let first_len = encoder.encode(&first);
        encoder.encode(&second);
        let mut bytes = encoder.into_bytes();
        bytes.extend_from_slice(&[RECORD_VERSION, 0, 2]);

        let mut decoder = RecordDecoder::new(&bytes);
        assert_eq!(decoder.decode_next().unwrap(), first);
        assert_eq!(decoder.position(), first_len);
        assert_eq!(decoder.decode_next().unwrap(), second);

        let valid = decoder.position();
        assert!(decoder.decode_next().unwrap_err().is_truncation());
        assert_eq!(decoder.position(), valid);
        assert_eq!(decoder.remaining().len(), 3);
    }

    fn channel() -> impl Strategy<Value = Channel> {
        prop::sample::select(Channel::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn roundtrip_any_entry(
            id in prop::array::uniform16(any::<u8>()),
            ticks in any::<u64>(),
            channel in channel(),
            entry_type in any::<u8>(),
            path in ".{0,24}",
            key in ".{0,24}",
            value in ".{0,128}",
            metadata in prop::collection::btree_map(".{0,8}", ".{0,16}", 0..4),
        ) {
            let entry = BinEntry {
                id: EntryId::from_bytes(id),
                entry_type: EntryType::from_byte(entry_type),
                channel,
                timestamp: Timestamp::from_ticks(ticks),
                path,
                key,
                value,
                metadata,
            };

            let bytes = entry.encode();
            prop_assert_eq!(bytes.len(), encoded_len(&entry));
            let (decoded, used) = decode_record(&bytes).unwrap();
            prop_assert_eq!(used, bytes.len());
            prop_assert_eq!(decoded, entry);
        }
    }
}
