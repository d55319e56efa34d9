//! Sequential log scanning.
//!
//! The log has no index of its own: records are found by decoding them one
//! after another from a starting offset. The scanner reads the log through
//! a window that grows when a record does not fit, so arbitrarily large
//! records are found without reading the whole file up front.
//!
//! A record that is cut short at the end of the log (a torn write from a
//! crash mid-append) or fails its checksum ends the scan. Everything before
//! it is reported as valid; the scanner never returns an error for bad
//! record bytes, only for I/O failures.
//!
//! An undecodable record counts as a torn tail when nothing after it could
//! be a record: the rest of the log is zero-filled, or the record's own
//! framing reaches the end of the log.

use crate::error::CoreResult;
use binmem_codec::{decode_record, framed_len, BinEntry, CodecError};
use binmem_storage::StorageBackend;
use tracing::warn;

/// A record found by the scanner.
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    /// Offset of the record in the log.
    pub offset: u64,
    /// Encoded length of the record.
    pub length: u64,
    /// The decoded entry.
    pub entry: BinEntry,
}

/// Why a scan stopped before the end of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStop {
    /// Offset of the first record that could not be decoded.
    pub offset: u64,
    /// The decode failure.
    pub error: CodecError,
    /// Whether the undecodable bytes run to the end of the log with no
    /// record after them.
    pub at_tail: bool,
}

impl ScanStop {
    /// Returns `true` if the log ended mid-record or with bytes that a
    /// crash mid-append could have left behind.
    #[must_use]
    pub fn is_torn_tail(&self) -> bool {
        self.error.is_truncation() || self.at_tail
    }
}

/// Summary of a completed scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Offset the scan started at.
    pub start: u64,
    /// Number of records decoded.
    pub records: usize,
    /// End of the last valid record.
    pub valid_len: u64,
    /// Size of the log when the scan ran.
    pub log_len: u64,
    /// Set when the scan stopped at an undecodable record.
    pub stop: Option<ScanStop>,
}

impl ScanReport {
    /// Bytes after the last valid record.
    #[must_use]
    pub fn ignored_bytes(&self) -> u64 {
        self.log_len - self.valid_len
    }

    /// Returns `true` if every byte from the start offset decoded cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.stop.is_none()
    }
}

/// Walks the records of a log in offset order.
pub struct LogScanner<'a> {
    log: &'a dyn StorageBackend,
    chunk_size: usize,
    offset: u64,
    end: u64,
    window: Vec<u8>,
    window_start: u64,
    report: ScanReport,
}

impl<'a> LogScanner<'a> {
    /// Creates a scanner starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log size cannot be read.
    pub fn new(log: &'a dyn StorageBackend, start: u64, chunk_size: usize) -> CoreResult<Self> {
        let end = log.size()?;
        let start = start.min(end);
        Ok(Self {
            log,
            chunk_size: chunk_size.max(binmem_codec::MIN_RECORD_SIZE),
            offset: start,
            end,
            window: Vec::new(),
            window_start: start,
            report: ScanReport {
                start,
                valid_len: start,
                log_len: end,
                ..ScanReport::default()
            },
        })
    }

    /// Decodes the next record.
    ///
    /// Returns `Ok(None)` at the end of the log or at the first record that
    /// cannot be decoded; [`LogScanner::finish`] tells the two apart.
    ///
    /// # Errors
    ///
    /// Returns an error only if the log cannot be read.
    pub fn next_record(&mut self) -> CoreResult<Option<ScannedRecord>> {
        if self.report.stop.is_some() || self.offset >= self.end {
            return Ok(None);
        }

        loop {
            let relative = (self.offset - self.window_start) as usize;
            let window_end = self.window_start + self.window.len() as u64;

            match decode_record(&self.window[relative..]) {
                Ok((entry, length)) => {
                    let record = ScannedRecord {
                        offset: self.offset,
                        length: length as u64,
                        entry,
                    };
                    self.offset += length as u64;
                    self.report.records += 1;
                    self.report.valid_len = self.offset;
                    return Ok(Some(record));
                }
                Err(CodecError::Truncated { needed, .. }) if window_end < self.end => {
                    self.refill(needed)?;
                }
                Err(error) => {
                    let at_tail = error.is_truncation() || self.damage_reaches_end(relative)?;
                    warn!(
                        offset = self.offset,
                        log_len = self.end,
                        at_tail,
                        %error,
                        "stopping log scan at undecodable record"
                    );
                    self.report.stop = Some(ScanStop {
                        offset: self.offset,
                        error,
                        at_tail,
                    });
                    return Ok(None);
                }
            }
        }
    }

    /// Consumes the scanner and returns its report.
    #[must_use]
    pub fn finish(self) -> ScanReport {
        self.report
    }

    /// Checks whether the undecodable record at the current offset is the
    /// last thing in the log.
    fn damage_reaches_end(&self, relative: usize) -> CoreResult<bool> {
        let window_end = self.window_start + self.window.len() as u64;
        match framed_len(&self.window[relative..]) {
            Ok(len) if self.offset + len as u64 >= self.end => return Ok(true),
            Err(e) if e.is_truncation() && window_end >= self.end => return Ok(true),
            _ => {}
        }
        self.rest_is_zero()
    }

    fn rest_is_zero(&self) -> CoreResult<bool> {
        let mut offset = self.offset;
        while offset < self.end {
            let len = (self.end - offset).min(self.chunk_size as u64) as usize;
            if self.log.read_at(offset, len)?.iter().any(|&b| b != 0) {
                return Ok(false);
            }
            offset += len as u64;
        }
        Ok(true)
    }

    /// Replaces the window with one starting at the current record that is
    /// at least `needed` bytes long (or reaches the end of the log).
    fn refill(&mut self, needed: usize) -> CoreResult<()> {
        let current = (self.window_start + self.window.len() as u64 - self.offset) as usize;
        let want = needed.max(current * 2).max(self.chunk_size) as u64;
        let len = want.min(self.end - self.offset) as usize;

        self.window = self.log.read_at(self.offset, len)?;
        self.window_start = self.offset;
        Ok(())
    }
}

impl Iterator for LogScanner<'_> {
    type Item = CoreResult<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Scans a whole log from `start`, collecting every valid record.
///
/// # Errors
///
/// Returns an error only if the log cannot be read.
pub fn scan_log(
    log: &dyn StorageBackend,
    start: u64,
    chunk_size: usize,
) -> CoreResult<(Vec<ScannedRecord>, ScanReport)> {
    let mut scanner = LogScanner::new(log, start, chunk_size)?;
    let mut records = Vec::new();
    while let Some(record) = scanner.next_record()? {
        records.push(record);
    }
    Ok((records, scanner.finish()))
}
