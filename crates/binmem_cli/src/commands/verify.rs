//! Verify command implementation.

use super::{read_sidecar, require_log};
use binmem_core::{scan_log, Config, EntryId, ScannedRecord};
use binmem_storage::FileBackend;
use std::collections::HashMap;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Number of valid records.
    pub valid_records: usize,
    /// Number of corrupt records.
    pub corrupt_records: usize,
    /// Problems that make the log unusable as-is.
    pub errors: Vec<String>,
    /// Problems the store repairs on open.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.corrupt_records == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying log at {:?}", path);
    println!();

    let result = verify(path)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every record in the log and the sidecar against it.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    require_log(path)?;

    let backend = FileBackend::open(path)?;
    let (records, report) = scan_log(&backend, 0, Config::default().scan_chunk_size)?;

    let mut result = VerifyResult {
        records_checked: records.len(),
        valid_records: records.len(),
        ..VerifyResult::default()
    };

    if let Some(stop) = &report.stop {
        result.records_checked += 1;
        if stop.is_torn_tail() {
            result.warnings.push(format!(
                "Torn record at offset {} ({} bytes will be truncated on open)",
                stop.offset,
                report.ignored_bytes()
            ));
        } else {
            result.corrupt_records += 1;
            result.errors.push(format!(
                "Corrupt record at offset {}: {} ({} bytes unreadable)",
                stop.offset,
                stop.error,
                report.ignored_bytes()
            ));
        }
    }

    let mut seen: HashMap<EntryId, u64> = HashMap::new();
    for record in &records {
        if let Some(first) = seen.insert(record.entry.id, record.offset) {
            result.errors.push(format!(
                "Duplicate id {} at offsets {} and {}",
                record.entry.id, first, record.offset
            ));
        }
    }

    check_sidecar(path, &records, report.log_len, &mut result);

    Ok(result)
}

fn check_sidecar(path: &Path, records: &[ScannedRecord], log_len: u64, result: &mut VerifyResult) {
    let Some((manifest, covered)) = read_sidecar(path) else {
        return;
    };

    if covered > log_len {
        result.warnings.push(format!(
            "Manifest covers {} bytes but the log has {}; it will be rebuilt",
            covered, log_len
        ));
        return;
    }

    let by_offset: HashMap<u64, &ScannedRecord> = records.iter().map(|r| (r.offset, r)).collect();
    for indexed in manifest.records() {
        let matches = by_offset.get(&indexed.offset).is_some_and(|r| {
            r.entry.id == indexed.id && r.length == indexed.length
        });
        if !matches {
            result.warnings.push(format!(
                "Manifest entry {} at offset {} does not match the log; it will be rebuilt",
                indexed.id, indexed.offset
            ));
            return;
        }
    }
}

fn print_result(result: &VerifyResult) {
    println!("  Records checked: {}", result.records_checked);
    println!("  Valid records:   {}", result.valid_records);
    println!("  Corrupt records: {}", result.corrupt_records);

    for warning in &result.warnings {
        println!("  ! {}", warning);
    }
    for error in &result.errors {
        println!("  ✗ {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binmem_core::BinMemory;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    fn populated_log(dir: &Path) -> std::path::PathBuf {
        let log = dir.join("bin.log");
        let store = BinMemory::open(&log).unwrap();
        for i in 0..5 {
            store
                .add_entry("verify", format!("k{i}"), "value", None, None)
                .unwrap();
        }
        log
    }

    #[test]
    fn clean_log_passes() {
        let dir = tempdir().unwrap();
        let log = populated_log(dir.path());

        let result = verify(&log).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.valid_records, 5);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn torn_tail_is_a_warning() {
        let dir = tempdir().unwrap();
        let log = populated_log(dir.path());

        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(&[1, 0, 2]).unwrap();
        drop(file);

        let result = verify(&log).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.valid_records, 5);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn flipped_byte_fails() {
        let dir = tempdir().unwrap();
        let log = populated_log(dir.path());

        let mut data = std::fs::read(&log).unwrap();
        data[20] ^= 0xFF;
        std::fs::write(&log, &data).unwrap();

        let result = verify(&log).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.corrupt_records, 1);
        assert_eq!(result.valid_records, 0);
    }
}
