//! Dump command implementation.

use super::{read_sidecar, require_log};
use binmem_core::{scan_log, Channel, Config, EntryFilter};
use binmem_storage::FileBackend;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Which records to print.
#[derive(Debug, Default)]
pub struct DumpOptions {
    /// Maximum number of records.
    pub limit: Option<usize>,
    /// Exact path filter.
    pub path: Option<String>,
    /// Channel filter.
    pub channel: Option<Channel>,
}

/// A log record as printed by `dump`.
#[derive(Debug, Serialize)]
pub struct DumpedEntry {
    /// Offset of the record in the log.
    pub offset: u64,
    /// Encoded record length.
    pub length: u64,
    /// Entry id.
    pub id: String,
    /// Channel name.
    pub channel: String,
    /// Creation time.
    pub timestamp: String,
    /// Entry path.
    pub path: String,
    /// Entry key.
    pub key: String,
    /// Entry value.
    pub value: String,
    /// Entry metadata.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Set if the entry was removed.
    pub removed: bool,
}

/// Runs the dump command.
pub fn run(path: &Path, options: &DumpOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries = collect(path, options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            for entry in &entries {
                print_entry(entry);
            }
            println!();
            println!("{} record(s)", entries.len());
        }
    }

    Ok(())
}

/// Reads the matching records in log order, removed ones included.
pub fn collect(path: &Path, options: &DumpOptions) -> Result<Vec<DumpedEntry>, Box<dyn std::error::Error>> {
    require_log(path)?;

    let backend = FileBackend::open(path)?;
    let (records, _) = scan_log(&backend, 0, Config::default().scan_chunk_size)?;
    let sidecar = read_sidecar(path);
    let filter = EntryFilter::from_parts(options.path.as_deref(), options.channel);

    let entries = records
        .into_iter()
        .filter(|r| filter.matches(&r.entry.path, r.entry.channel))
        .take(options.limit.unwrap_or(usize::MAX))
        .map(|r| {
            let removed = sidecar
                .as_ref()
                .and_then(|(manifest, _)| manifest.lookup(&r.entry.id))
                .is_some_and(|m| m.tombstoned);
            DumpedEntry {
                offset: r.offset,
                length: r.length,
                id: r.entry.id.to_string(),
                channel: r.entry.channel.name().to_string(),
                timestamp: r.entry.timestamp.to_string(),
                path: r.entry.path,
                key: r.entry.key,
                value: r.entry.value,
                metadata: r.entry.metadata,
                removed,
            }
        })
        .collect();

    Ok(entries)
}

fn print_entry(entry: &DumpedEntry) {
    let marker = if entry.removed { " [removed]" } else { "" };
    println!(
        "@{:<8} {} {} {}{}",
        entry.offset, entry.id, entry.channel, entry.timestamp, marker
    );
    println!("  {}/{} = {}", entry.path, entry.key, entry.value);
    for (k, v) in &entry.metadata {
        println!("  {}: {}", k, v);
    }
}
