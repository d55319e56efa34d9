//! File-based append log.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An append log backed by a single file.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Thread Safety
///
/// Reads and appends are serialized on an internal lock around the file
/// handle, so a `FileBackend` can be shared behind an `RwLock` by many
/// readers while one writer appends.
///
/// # Example
///
/// ```no_run
/// use binmem_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open(Path::new("memory.bin")).unwrap();
/// let offset = log.append(b"record bytes").unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates an append log at the given path.
    ///
    /// Existing contents are kept; the next append goes to the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Self::from_file(path, file)
    }

    /// Opens or creates an append log, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::open(path)
    }

    /// Creates an empty append log at the given path, discarding any
    /// previous contents.
    ///
    /// Used for scratch files that are renamed over a live log once complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create_truncated(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        let written = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data));

        if let Err(err) = written {
            // A torn write may have extended the file; track what is really there.
            if let Ok(meta) = file.metadata() {
                *size = meta.len();
            }
            return Err(err.into());
        }

        *size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.bin");

        let log = FileBackend::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.bin");

        let mut log = FileBackend::open(&path).unwrap();

        let offset1 = log.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = log.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(log.size().unwrap(), 11);
        assert_eq!(&log.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(&log.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.bin");

        let mut log = FileBackend::open(&path).unwrap();
        log.append(b"hello").unwrap();

        assert!(matches!(
            log.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            log.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.bin");

        {
            let mut log = FileBackend::open(&path).unwrap();
            log.append(b"persistent data").unwrap();
            log.sync().unwrap();
        }

        let mut log = FileBackend::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 15);
        assert_eq!(&log.read_at(0, 15).unwrap(), b"persistent data");

        // Appends after reopen continue at the end.
        assert_eq!(log.append(b"!").unwrap(), 15);
    }

    #[test]
    fn file_empty_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.bin");

        let mut log = FileBackend::open(&path).unwrap();
        log.append(b"x").unwrap();

        assert_eq!(log.append(b"").unwrap(), 1);
        assert_eq!(log.size().unwrap(), 1);
        assert!(log.read_at(1, 0).unwrap().is_empty());
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("memory.bin");

        let log = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
        assert_eq!(log.path(), path);
    }

    #[test]
    fn file_create_truncated_discards_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.bin.compact");

        {
            let mut log = FileBackend::open(&path).unwrap();
            log.append(b"stale").unwrap();
            log.sync().unwrap();
        }

        let log = FileBackend::create_truncated(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
    }

    #[test]
    fn file_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.bin");

        let mut log = FileBackend::open(&path).unwrap();
        log.append(b"hello world").unwrap();

        log.truncate(5).unwrap();
        assert_eq!(log.size().unwrap(), 5);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 5);
        assert_eq!(log.append(b"!").unwrap(), 5);

        assert!(matches!(
            log.truncate(100),
            Err(StorageError::InvalidTruncate { .. })
        ));
    }

    #[test]
    fn file_flush_and_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.bin");

        let mut log = FileBackend::open(&path).unwrap();
        log.append(b"data").unwrap();

        assert!(log.flush().is_ok());
        assert!(log.sync().is_ok());
    }
}
