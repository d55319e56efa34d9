//! Export and import command implementations.

use super::{format_size, require_log};
use binmem_core::{BinMemory, ImportMode};
use std::path::Path;

/// Writes a snapshot of the store's live entries to `target`.
pub fn export(path: &Path, target: &Path) -> Result<(), Box<dyn std::error::Error>> {
    require_log(path)?;

    let store = BinMemory::open(path)?;
    let result = store.export(target)?;
    store.close()?;

    println!(
        "✓ Exported {} entries ({}) to {:?}",
        result.entries,
        format_size(result.bytes),
        result.path
    );
    Ok(())
}

/// Loads the snapshot at `source` into the store, creating the log if needed.
pub fn import(path: &Path, source: &Path, replace: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mode = if replace {
        ImportMode::Replace
    } else {
        ImportMode::Merge
    };

    let store = BinMemory::open(path)?;
    let result = store.import_with_mode(source, mode)?;
    store.close()?;

    println!(
        "✓ Imported {} entries from {:?} ({:?}, {} skipped)",
        result.imported, source, result.mode, result.skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn export_then_import_into_new_log() {
        let dir = tempdir().unwrap();
        let source_log = dir.path().join("source.log");
        let target_log = dir.path().join("target.log");
        let snapshot = dir.path().join("bin.snapshot");

        {
            let store = BinMemory::open(&source_log).unwrap();
            store.add_entry("users", "u1", "Alice", None, None).unwrap();
            store.add_entry("users", "u2", "Bob", None, None).unwrap();
        }

        export(&source_log, &snapshot).unwrap();
        import(&target_log, &snapshot, false).unwrap();
        import(&target_log, &snapshot, false).unwrap();

        let store = BinMemory::open(&target_log).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn replace_discards_existing_entries() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("bin.log");
        let snapshot = dir.path().join("bin.snapshot");

        {
            let store = BinMemory::open(&log).unwrap();
            store.add_entry("users", "u1", "Alice", None, None).unwrap();
        }
        export(&log, &snapshot).unwrap();
        {
            let store = BinMemory::open(&log).unwrap();
            store.add_entry("users", "u2", "Bob", None, None).unwrap();
        }

        import(&log, &snapshot, true).unwrap();

        let store = BinMemory::open(&log).unwrap();
        let users = store.get_entries(Some("users"), None).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].value, "Alice");
    }

    #[test]
    fn export_requires_existing_log() {
        let dir = tempdir().unwrap();
        let result = export(&dir.path().join("absent.log"), &dir.path().join("out.snapshot"));
        assert!(result.is_err());
    }
}
