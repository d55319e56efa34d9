//! # BinMem Core
//!
//! Embedded append-only log store.
//!
//! This crate provides:
//! - The manifest, an in-memory index rebuilt by scanning the log
//! - Filtered, point and predicate reads
//! - Tombstone removal and log compaction
//! - Whole-store snapshot export and import
//! - The [`BinMemory`] facade tying them together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use binmem_core::{BinMemory, Channel};
//! use std::path::Path;
//!
//! let store = BinMemory::open(Path::new("data/bin.log"))?;
//! let id = store.add_entry("users", "u1", "Alice", None, Some(Channel::InputOutput))?;
//!
//! let users = store.get_entries(Some("users"), None)?;
//! assert_eq!(users[0].id, id);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(feature = "async")]
mod async_store;
pub mod compaction;
mod config;
pub mod dir;
mod error;
pub mod manifest;
pub mod query;
pub mod scan;
pub mod snapshot;
mod stats;
mod store;

#[cfg(feature = "async")]
pub use async_store::AsyncBinMemory;
pub use compaction::{CompactionResult, Compactor};
pub use config::{Config, ImportMode};
pub use error::{CoreError, CoreResult};
pub use manifest::{EntryFilter, Manifest, ManifestRecord, PathMatch};
pub use query::QueryEngine;
pub use scan::{scan_log, LogScanner, ScanReport, ScanStop, ScannedRecord};
pub use snapshot::{ExportResult, ImportResult};
pub use stats::{StatsSnapshot, StoreStats};
pub use store::{BinMemory, NewEntry};

pub use binmem_codec::{BinEntry, Channel, EntryId, EntryType, Metadata, Timestamp};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
