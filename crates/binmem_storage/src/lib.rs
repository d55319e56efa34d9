//! # BinMem Storage
//!
//! The append log underneath the BinMem store.
//!
//! Backends are **opaque byte stores**: they append bytes at the end, read
//! back arbitrary ranges, and make writes durable. They know nothing about
//! record framing, manifests or snapshots; `binmem_core` owns all of that.
//!
//! ## Design Principles
//!
//! - Append-only: existing bytes are never rewritten in place
//! - Single writer (`append` takes `&mut self`), many readers (`read_at` takes `&self`)
//! - Must be `Send + Sync`
//! - Every I/O failure is surfaced, never swallowed
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - A single file on disk
//! - [`InMemoryBackend`] - A growable buffer for tests and ephemeral stores
//!
//! ## Example
//!
//! ```rust
//! use binmem_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let offset = log.append(b"record").unwrap();
//! assert_eq!(log.read_at(offset, 6).unwrap(), b"record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
