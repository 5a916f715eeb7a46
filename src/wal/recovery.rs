//! WAL Recovery
//!
//! Handles crash recovery by replaying the append log.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::Result;

use super::{LogRecord, WalReader};

/// Handles log recovery after a crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of records successfully recovered (handed to the caller)
    pub records_recovered: u64,

    /// Number of valid records skipped because they were at or below the start sequence
    pub records_skipped: u64,

    /// Number of unreadable records dropped (0 or 1: reading stops at the first)
    pub records_corrupted: u64,

    /// Last valid sequence number in the log
    pub last_sequence: u64,

    /// Whether an unreadable tail was found (and, for `recover`, cut off)
    pub was_truncated: bool,

    /// Length of the readable prefix of the log
    pub valid_len: u64,

    /// Bytes after the readable prefix
    pub dropped_bytes: u64,

    /// Description of the unreadable record, if any
    pub corruption: Option<String>,
}

impl WalRecovery {
    /// Recover records from a log file
    ///
    /// This will:
    /// 1. Read all valid records
    /// 2. Stop at the first torn or corrupted record
    /// 3. Truncate everything from that record on
    /// 4. Return all valid records in order
    pub fn recover(path: &Path) -> Result<(Vec<LogRecord>, RecoveryResult)> {
        let mut records = Vec::new();
        let result = Self::replay(path, 0, |record| {
            records.push(record);
            Ok(())
        })?;
        Ok((records, result))
    }

    /// Stream records with `sequence > from_sequence` into `apply`, then cut
    /// off any unreadable tail.
    ///
    /// Records are never buffered; memory use is bounded by one record.
    /// An error returned by `apply` aborts recovery and is propagated.
    pub fn replay<F>(path: &Path, from_sequence: u64, mut apply: F) -> Result<RecoveryResult>
    where
        F: FnMut(LogRecord) -> Result<()>,
    {
        let result = Self::scan(path, from_sequence, &mut apply)?;

        if result.was_truncated {
            tracing::warn!(
                "Dropping unreadable log tail in {} at offset {} ({} bytes): {}",
                path.display(),
                result.valid_len,
                result.dropped_bytes,
                result.corruption.as_deref().unwrap_or("unknown")
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(result.valid_len)?;
            file.sync_all()?;
        }

        Ok(result)
    }

    /// Verify integrity of a log file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::scan(path, 0, &mut |_| Ok(()))
    }

    fn scan<F>(path: &Path, from_sequence: u64, apply: &mut F) -> Result<RecoveryResult>
    where
        F: FnMut(LogRecord) -> Result<()>,
    {
        let mut iter = WalReader::open(path)?.replay_from(from_sequence);
        let mut result = RecoveryResult::default();

        while let Some(item) = iter.next() {
            match item {
                Ok(record) => {
                    result.last_sequence = record.sequence;
                    result.records_recovered += 1;
                    apply(record)?;
                }
                Err(e) => {
                    result.records_corrupted += 1;
                    result.corruption = Some(e.to_string());
                }
            }
        }

        result.records_skipped = iter.skipped();
        result.valid_len = iter.valid_position();
        result.dropped_bytes = iter.file_len() - result.valid_len;
        result.was_truncated = result.dropped_bytes > 0;

        // Records at or below the start sequence still define the log's end
        if result.records_recovered == 0 && result.records_skipped > 0 {
            result.last_sequence = from_sequence;
        }

        Ok(result)
    }
}
