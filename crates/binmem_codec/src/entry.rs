//! The entry model: what a collaborator stores and reads back.

use crate::id::EntryId;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Free-form metadata attached to an entry.
///
/// Order is irrelevant to callers; a `BTreeMap` keeps the encoding
/// deterministic. An empty map means the entry carries no metadata.
pub type Metadata = BTreeMap<String, String>;

/// Coarse logical partition of entries.
///
/// Collaborators use channels to separate request/response traffic from
/// error logs and everything else, for filtering and retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Channel {
    /// Input/output traffic.
    InputOutput = 0,
    /// Error log entries.
    ErrorLog = 1,
    /// Anything else.
    #[default]
    Other = 2,
}

impl Channel {
    /// All channels, in tag order.
    pub const ALL: [Channel; 3] = [Channel::InputOutput, Channel::ErrorLog, Channel::Other];

    /// Returns the on-disk tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses an on-disk tag.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::InputOutput),
            1 => Some(Self::ErrorLog),
            2 => Some(Self::Other),
            _ => None,
        }
    }

    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InputOutput => "input-output",
            Self::ErrorLog => "error-log",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a channel name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel '{0}' (expected input-output, error-log or other)")]
pub struct ParseChannelError(String);

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "input-output" | "inputoutput" | "io" => Ok(Self::InputOutput),
            "error-log" | "errorlog" | "error" => Ok(Self::ErrorLog),
            "other" => Ok(Self::Other),
            _ => Err(ParseChannelError(s.to_string())),
        }
    }
}

/// Discriminator byte for the payload kind of a record.
///
/// Only [`EntryType::PLAIN`] is written today; other values are carried
/// through untouched so newer writers can add structured payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntryType(u8);

impl EntryType {
    /// A plain key/value entry.
    pub const PLAIN: Self = Self(0);

    /// Creates an entry type from its raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }
}

/// Number of 100 ns ticks between 0001-01-01T00:00:00Z and the Unix epoch.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Ticks per second (one tick is 100 ns).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// A UTC instant stored as a tick count.
///
/// One tick is 100 ns, counted from 0001-01-01T00:00:00Z. Converting from a
/// [`DateTime<Utc>`] drops sub-tick precision, so a timestamp taken with
/// [`Timestamp::now`] round-trips through the codec exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from raw ticks.
    #[must_use]
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Returns the raw tick count.
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// The current time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Converts from a `chrono` UTC time, clamping instants before year 1.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let ticks = i128::from(UNIX_EPOCH_TICKS)
            + i128::from(dt.timestamp()) * i128::from(TICKS_PER_SECOND)
            + i128::from(dt.timestamp_subsec_nanos() / 100);
        Self(ticks.clamp(0, i128::from(i64::MAX)) as u64)
    }

    /// Converts to a `chrono` UTC time.
    ///
    /// Returns `None` if the tick count is outside chrono's range.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let relative = i128::from(self.0) - i128::from(UNIX_EPOCH_TICKS);
        let per_second = i128::from(TICKS_PER_SECOND);
        let secs = i64::try_from(relative.div_euclid(per_second)).ok()?;
        let nanos = u32::try_from(relative.rem_euclid(per_second) * 100).ok()?;
        DateTime::from_timestamp(secs, nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "ticks:{}", self.0),
        }
    }
}

/// A stored entry.
///
/// Entries are immutable once written. Keys are not unique: two entries may
/// share a path and key and are told apart by their [`EntryId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinEntry {
    /// Store-assigned identifier.
    pub id: EntryId,
    /// Payload kind discriminator.
    pub entry_type: EntryType,
    /// Logical partition.
    pub channel: Channel,
    /// Creation time.
    pub timestamp: Timestamp,
    /// Namespace the entry belongs to (module or topic name).
    pub path: String,
    /// Entry key.
    pub key: String,
    /// Entry value.
    pub value: String,
    /// Optional metadata.
    pub metadata: Metadata,
}

impl BinEntry {
    /// Creates a plain entry on the `Other` channel, stamped with the current time.
    #[must_use]
    pub fn new(
        id: EntryId,
        path: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id,
            entry_type: EntryType::PLAIN,
            channel: Channel::default(),
            timestamp: Timestamp::now(),
            path: path.into(),
            key: key.into(),
            value: value.into(),
            metadata: Metadata::new(),
        }
    }

    /// Sets the channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the creation time.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the entry type.
    #[must_use]
    pub fn with_entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = entry_type;
        self
    }
}
