//! Compact command implementation.

use super::{format_size, require_log};
use binmem_core::{BinMemory, CompactionResult};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    require_log(path)?;

    println!("Compacting log at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let store = BinMemory::open(path)?;
    let estimate = store.compaction_estimate()?;
    print_analysis(&estimate);

    if !dry_run {
        println!();
        if estimate.tombstones_removed > 0 {
            println!("Performing compaction...");
            let result = store.compact()?;
            println!(
                "✓ Compaction complete ({} reclaimed)",
                format_size(result.bytes_saved())
            );
        } else {
            println!("No compaction needed - log has no removed entries");
        }
    }

    store.close()?;
    Ok(())
}

fn print_analysis(stats: &CompactionResult) {
    println!("Compaction Analysis:");
    println!("  Input records:     {}", stats.input_records);
    println!("  Output records:    {}", stats.output_records);
    println!("  Tombstones:        {} (will be removed)", stats.tombstones_removed);
    println!();
    println!("  Size before: {}", format_size(stats.bytes_before));
    println!("  Size after:  {}", format_size(stats.bytes_after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(stats.bytes_saved()),
        if stats.bytes_before > 0 {
            (stats.bytes_saved() as f64 / stats.bytes_before as f64) * 100.0
        } else {
            0.0
        }
    );
}
