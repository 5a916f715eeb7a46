//! WAL Writer
//!
//! Handles appending records to the append log file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::SyncStrategy;
use crate::error::{QuillError, Result};
use crate::value::unix_millis;

use super::entry::encode_record;
use super::{Operation, WalRecovery};

/// Writes records to the append log file
///
/// ## Sequence Numbers
/// The writer is the single point of sequence assignment. A sequence number
/// is consumed only once its record is fully written (and, for
/// `SyncStrategy::Always`, synced); a failed append rolls the file back to
/// its previous length and leaves the counter untouched, so the log stays
/// gap-free.
pub struct WalWriter {
    /// Path of the log file
    path: PathBuf,

    /// File handle opened in append mode
    file: File,

    /// Sequence number the next record will receive
    next_sequence: u64,

    /// Durability policy
    sync_strategy: SyncStrategy,

    /// Records written since the last fsync
    unsynced: usize,

    /// When the last fsync happened
    last_sync: Instant,

    /// Length of the valid log contents in bytes
    len: u64,
}

impl WalWriter {
    /// Open or create a log file.
    ///
    /// Existing records are scanned to continue the sequence; a torn tail
    /// left by a crash is cut off so new records are not written after garbage.
    pub fn open(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        Self::open_after(path, sync_strategy, 0)
    }

    /// Open a log whose next sequence must be greater than `floor`.
    ///
    /// Used after a checkpoint at `floor` truncated the log.
    pub fn open_after(path: &Path, sync_strategy: SyncStrategy, floor: u64) -> Result<Self> {
        let mut last_sequence = 0;
        let mut valid_len = 0;

        if path.exists() {
            let scan = WalRecovery::verify(path)?;
            last_sequence = scan.last_sequence;
            valid_len = scan.valid_len;

            if scan.was_truncated {
                tracing::warn!(
                    "Cutting {} bytes of unreadable tail from {}",
                    scan.dropped_bytes,
                    path.display()
                );
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        if file.metadata()?.len() != valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_sequence: last_sequence.max(floor) + 1,
            sync_strategy,
            unsynced: 0,
            last_sync: Instant::now(),
            len: valid_len,
        })
    }

    /// Append an operation stamped with the current time
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        self.append_at(&operation, unix_millis())
    }

    /// Append an operation with an explicit timestamp.
    ///
    /// Returns the sequence number assigned to the record. Any I/O failure
    /// surfaces as `QuillError::Persistence` with the file rolled back.
    pub fn append_at(&mut self, operation: &Operation, timestamp: u64) -> Result<u64> {
        let sequence = self.next_sequence;
        let bytes = encode_record(sequence, timestamp, operation)?;

        if let Err(e) = self.file.write_all(&bytes) {
            self.rollback();
            return Err(QuillError::Persistence(format!(
                "append of record {} failed: {}",
                sequence, e
            )));
        }

        self.unsynced += 1;

        let must_sync = match self.sync_strategy {
            SyncStrategy::Always => true,
            SyncStrategy::EverySecond => self.last_sync.elapsed() >= Duration::from_secs(1),
            SyncStrategy::Never => false,
        };

        if must_sync {
            if let Err(e) = self.file.sync_data() {
                self.unsynced -= 1;
                self.rollback();
                return Err(QuillError::Persistence(format!(
                    "fsync of record {} failed: {}",
                    sequence, e
                )));
            }
            self.mark_synced();
        }

        self.len += bytes.len() as u64;
        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| QuillError::Persistence(format!("fsync failed: {}", e)))?;
        self.mark_synced();
        Ok(())
    }

    /// Sync if records are pending and the strategy's window has elapsed.
    ///
    /// Returns true if a sync happened.
    pub fn sync_if_due(&mut self) -> Result<bool> {
        if self.unsynced == 0 {
            return Ok(false);
        }
        let due = match self.sync_strategy {
            SyncStrategy::Always => true,
            SyncStrategy::EverySecond => self.last_sync.elapsed() >= Duration::from_secs(1),
            SyncStrategy::Never => false,
        };
        if due {
            self.sync()?;
        }
        Ok(due)
    }

    /// Drop every record (they are covered by a checkpoint).
    ///
    /// The sequence counter keeps counting.
    pub fn truncate(&mut self) -> Result<()> {
        self.file
            .set_len(0)
            .and_then(|_| self.file.sync_all())
            .map_err(|e| QuillError::Persistence(format!("log truncate failed: {}", e)))?;
        self.len = 0;
        self.mark_synced();
        Ok(())
    }

    /// Sequence number the next record will receive
    pub fn current_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Sequence number of the last record written (0 if none)
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Records written since the last fsync
    pub fn uncommitted_count(&self) -> usize {
        self.unsynced
    }

    /// Time since the last fsync
    pub fn since_last_sync(&self) -> Duration {
        self.last_sync.elapsed()
    }

    /// Sync strategy in effect
    pub fn sync_strategy(&self) -> SyncStrategy {
        self.sync_strategy
    }

    /// Length of the log file contents in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn mark_synced(&mut self) {
        self.unsynced = 0;
        self.last_sync = Instant::now();
    }

    /// Best-effort: cut a partially written record off the end of the file
    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            tracing::error!(
                "Failed to roll back {} to {} bytes: {}",
                self.path.display(),
                self.len,
                e
            );
        }
    }
}
