//! On-disk file layout of a store.
//!
//! A store is a single log file plus a few siblings that share its name:
//!
//! ```text
//! <dir>/
//! ├─ bin.log              # The append log
//! ├─ bin.log.lock         # Advisory lock for single-owner access
//! ├─ bin.log.manifest     # Manifest sidecar (tombstones, index cache)
//! ├─ bin.log.manifest.tmp # Temporary file for atomic sidecar writes
//! └─ bin.log.compact      # Log being rewritten by compaction or import
//! ```

use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_SUFFIX: &str = ".lock";
const MANIFEST_SUFFIX: &str = ".manifest";
const MANIFEST_TEMP_SUFFIX: &str = ".manifest.tmp";
const COMPACT_SUFFIX: &str = ".compact";

/// Appends `suffix` to the file name of `path`.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Manages the files of one store and holds its exclusive lock.
///
/// Only one `StoreFiles` instance can exist per log at a time; the lock is
/// released when the value is dropped.
///
/// # Example
///
/// ```rust,ignore
/// use binmem_core::dir::StoreFiles;
/// use std::path::Path;
///
/// let files = StoreFiles::open(Path::new("data/bin.log"), true)?;
/// println!("sidecar: {:?}", files.manifest_path());
/// ```
#[derive(Debug)]
pub struct StoreFiles {
    log: PathBuf,
    _lock_file: File,
}

impl StoreFiles {
    /// Locks the store at `log`, creating its parent directory if allowed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log doesn't exist and `create_if_missing` is false
    /// - Another instance holds the lock (returns `StoreLocked`)
    /// - I/O errors occur
    pub fn open(log: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !log.exists() {
            if !create_if_missing {
                return Err(CoreError::invalid_operation(format!(
                    "log file does not exist: {}",
                    log.display()
                )));
            }
            if let Some(parent) = log.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        } else if log.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "log path is a directory: {}",
                log.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(sibling(log, LOCK_SUFFIX))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            log: log.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log
    }

    /// Returns the path of the lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.log, LOCK_SUFFIX)
    }

    /// Returns the path of the manifest sidecar.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        sibling(&self.log, MANIFEST_SUFFIX)
    }

    /// Returns the path compaction and import write the new log to.
    #[must_use]
    pub fn compact_path(&self) -> PathBuf {
        sibling(&self.log, COMPACT_SUFFIX)
    }

    /// Loads the manifest sidecar.
    ///
    /// Returns `None` if there is no sidecar. The caller still has to check
    /// the result against the log, see [`Manifest::decode`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load_manifest(&self) -> CoreResult<Option<(Manifest, u64)>> {
        let data = match fs::read(self.manifest_path()) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Manifest::decode(&data).map(Some)
    }

    /// Saves the manifest sidecar atomically.
    ///
    /// Writes a temporary file, syncs it, renames it over the sidecar and
    /// syncs the directory.
    pub fn save_manifest(&self, manifest: &Manifest, log_len: u64) -> CoreResult<()> {
        let temp_path = sibling(&self.log, MANIFEST_TEMP_SUFFIX);

        let mut file = File::create(&temp_path)?;
        file.write_all(&manifest.encode(log_len))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.manifest_path())?;
        self.sync_directory()
    }

    /// Deletes the manifest sidecar if present.
    pub fn remove_manifest(&self) -> CoreResult<()> {
        remove_if_exists(&self.manifest_path())?;
        self.sync_directory()
    }

    /// Deletes a leftover compaction file if present.
    pub fn remove_compact_file(&self) -> CoreResult<()> {
        remove_if_exists(&self.compact_path())
    }

    /// Renames the compaction file over the log.
    pub fn install_compact_file(&self) -> CoreResult<()> {
        fs::rename(self.compact_path(), &self.log)?;
        self.sync_directory()
    }

    /// Syncs the log's directory so renames and deletions are durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        let dir = match self.log.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => File::open(parent)?,
            None => File::open(".")?,
        };
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        // NTFS journals metadata updates
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
