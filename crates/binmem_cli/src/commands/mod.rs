//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod snapshot;
pub mod verify;

use binmem_core::Manifest;
use std::path::{Path, PathBuf};

/// Returns the sidecar path for a log.
pub fn manifest_path(log: &Path) -> PathBuf {
    let mut name = log.as_os_str().to_owned();
    name.push(".manifest");
    PathBuf::from(name)
}

/// Reads the manifest sidecar next to `log`, if there is a valid one.
///
/// Returns the manifest and the log size it covers.
pub fn read_sidecar(log: &Path) -> Option<(Manifest, u64)> {
    let data = std::fs::read(manifest_path(log)).ok()?;
    Manifest::decode(&data).ok()
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Fails unless `log` exists.
pub fn require_log(log: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if log.is_file() {
        Ok(())
    } else {
        Err(format!("No log found at {:?}", log).into())
    }
}
