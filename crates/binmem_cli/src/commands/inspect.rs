//! Inspect command implementation.

use super::{format_size, read_sidecar, require_log};
use binmem_core::{scan_log, Channel, Config, EntryId};
use binmem_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log path.
    pub path: String,
    /// Log file size in bytes.
    pub log_size: u64,
    /// Number of valid records.
    pub record_count: usize,
    /// Bytes covered by valid records.
    pub valid_size: u64,
    /// Bytes after the last valid record.
    pub ignored_bytes: u64,
    /// Why the scan stopped early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Whether a usable manifest sidecar exists.
    pub has_manifest: bool,
    /// Log bytes the sidecar covers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_covers: Option<u64>,
    /// Records not removed.
    pub live_entries: usize,
    /// Removed records awaiting compaction.
    pub tombstones: usize,
    /// Live records per channel.
    pub channels: BTreeMap<String, usize>,
    /// Live records per path.
    pub paths: BTreeMap<String, usize>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Scans the log and its sidecar without modifying either.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    require_log(path)?;

    let backend = FileBackend::open(path)?;
    let log_size = backend.size()?;
    let (records, report) = scan_log(&backend, 0, Config::default().scan_chunk_size)?;

    let sidecar = read_sidecar(path);
    let is_removed = |id: &EntryId| {
        sidecar
            .as_ref()
            .and_then(|(manifest, _)| manifest.lookup(id))
            .is_some_and(|r| r.tombstoned)
    };

    let mut channels: BTreeMap<String, usize> = Channel::ALL
        .iter()
        .map(|c| (c.name().to_string(), 0))
        .collect();
    let mut paths = BTreeMap::new();
    let mut tombstones = 0;

    for record in &records {
        if is_removed(&record.entry.id) {
            tombstones += 1;
            continue;
        }
        *channels.entry(record.entry.channel.name().to_string()).or_insert(0) += 1;
        *paths.entry(record.entry.path.clone()).or_insert(0) += 1;
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        log_size,
        record_count: records.len(),
        valid_size: report.valid_len,
        ignored_bytes: report.ignored_bytes(),
        stop_reason: report
            .stop
            .as_ref()
            .map(|s| format!("offset {}: {}", s.offset, s.error)),
        has_manifest: sidecar.is_some(),
        manifest_covers: sidecar.as_ref().map(|(_, covered)| *covered),
        live_entries: records.len() - tombstones,
        tombstones,
        channels,
        paths,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("BinMem Log Inspection");
    println!("=====================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Log size:       {}", format_size(result.log_size));
    println!("  Valid size:     {}", format_size(result.valid_size));
    if result.ignored_bytes > 0 {
        println!("  Ignored tail:   {}", format_size(result.ignored_bytes));
    }
    println!();
    println!("Records:");
    println!("  Total:          {}", result.record_count);
    println!("  Live:           {}", result.live_entries);
    println!("  Tombstones:     {}", result.tombstones);
    println!();
    println!("Manifest:");
    match result.manifest_covers {
        Some(covered) => println!("  Sidecar covers: {}", format_size(covered)),
        None => println!("  No usable sidecar (rebuilt from the log on open)"),
    }

    println!();
    println!("Channels:");
    for (channel, count) in &result.channels {
        println!("  {:<14}  {}", channel, count);
    }

    if !result.paths.is_empty() {
        println!();
        println!("Paths:");
        for (path, count) in &result.paths {
            println!("  {:<14}  {}", path, count);
        }
    }

    if let Some(reason) = &result.stop_reason {
        println!();
        println!("Scan stopped early at {}", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binmem_core::BinMemory;
    use tempfile::tempdir;

    #[test]
    fn counts_live_and_removed_entries() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("bin.log");
        {
            let store = BinMemory::open(&log).unwrap();
            let alice = store
                .add_entry("users", "u1", "Alice", None, Some(Channel::InputOutput))
                .unwrap();
            store.add_entry("users", "u2", "Bob", None, None).unwrap();
            store.add_entry("errors", "e1", "boom", None, Some(Channel::ErrorLog)).unwrap();
            store.remove_entry(&alice).unwrap();
        }

        let result = inspect(&log).unwrap();
        assert_eq!(result.record_count, 3);
        assert_eq!(result.live_entries, 2);
        assert_eq!(result.tombstones, 1);
        assert!(result.has_manifest);
        assert_eq!(result.paths.get("users"), Some(&1));
        assert_eq!(result.channels.get("error-log"), Some(&1));
        assert_eq!(result.channels.get("input-output"), Some(&0));
        assert_eq!(result.ignored_bytes, 0);
    }

    #[test]
    fn missing_log_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(inspect(&dir.path().join("absent.log")).is_err());
    }
}
