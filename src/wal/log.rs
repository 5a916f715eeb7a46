//! Append log handle used by the engine
//!
//! Wraps a durable `WalWriter` or, for the in-memory backend, a bare sequence
//! counter so both backends share one write path.

use std::path::Path;

use crate::config::SyncStrategy;
use crate::error::{QuillError, Result};

use super::{Operation, WalIterator, WalReader, WalWriter};

/// Durable or volatile append log
pub enum AppendLog {
    /// Records go to a file on disk
    Durable(WalWriter),

    /// Records are only numbered; nothing is stored
    Volatile {
        next_sequence: u64,

        /// Appends past this sequence fail, for exercising persistence errors
        fail_after: Option<u64>,
    },
}

impl AppendLog {
    /// Open a file-backed log whose sequence continues after `floor`
    pub fn durable(path: &Path, sync_strategy: SyncStrategy, floor: u64) -> Result<Self> {
        Ok(AppendLog::Durable(WalWriter::open_after(
            path,
            sync_strategy,
            floor,
        )?))
    }

    /// A log that only assigns sequence numbers
    pub fn volatile() -> Self {
        AppendLog::Volatile {
            next_sequence: 1,
            fail_after: None,
        }
    }

    /// A volatile log that refuses every append after sequence `last`
    #[cfg(test)]
    pub(crate) fn volatile_until(next_sequence: u64, last: u64) -> Self {
        AppendLog::Volatile {
            next_sequence,
            fail_after: Some(last),
        }
    }

    /// Append one operation and return its sequence number
    pub fn append(&mut self, operation: &Operation, timestamp: u64) -> Result<u64> {
        match self {
            AppendLog::Durable(writer) => writer.append_at(operation, timestamp),
            AppendLog::Volatile {
                next_sequence,
                fail_after,
            } => {
                let sequence = *next_sequence;
                if fail_after.map_or(false, |last| sequence > last) {
                    return Err(QuillError::Persistence(format!(
                        "append of record {} refused",
                        sequence
                    )));
                }
                *next_sequence += 1;
                Ok(sequence)
            }
        }
    }

    /// Force pending records to disk
    pub fn sync(&mut self) -> Result<()> {
        match self {
            AppendLog::Durable(writer) => writer.sync(),
            AppendLog::Volatile { .. } => Ok(()),
        }
    }

    /// Sync when the strategy's window has elapsed
    pub fn sync_if_due(&mut self) -> Result<bool> {
        match self {
            AppendLog::Durable(writer) => writer.sync_if_due(),
            AppendLog::Volatile { .. } => Ok(false),
        }
    }

    /// Drop all records (covered by a checkpoint); numbering continues
    pub fn truncate(&mut self) -> Result<()> {
        match self {
            AppendLog::Durable(writer) => writer.truncate(),
            AppendLog::Volatile { .. } => Ok(()),
        }
    }

    /// Sequence of the last appended record (0 if none)
    pub fn last_sequence(&self) -> u64 {
        match self {
            AppendLog::Durable(writer) => writer.last_sequence(),
            AppendLog::Volatile { next_sequence, .. } => *next_sequence - 1,
        }
    }

    /// Records appended since the last sync
    pub fn unsynced_count(&self) -> usize {
        match self {
            AppendLog::Durable(writer) => writer.uncommitted_count(),
            AppendLog::Volatile { .. } => 0,
        }
    }

    /// Bytes currently held in the log file
    pub fn len(&self) -> u64 {
        match self {
            AppendLog::Durable(writer) => writer.len(),
            AppendLog::Volatile { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, AppendLog::Durable(_))
    }

    /// Lazy, restartable replay of records with `sequence > from_sequence`.
    ///
    /// Each call opens a fresh reader, so the iterator can be re-created at
    /// any time. Volatile logs yield nothing.
    pub fn replay(&self, from_sequence: u64) -> Result<WalIterator> {
        match self {
            AppendLog::Durable(writer) => {
                Ok(WalReader::open(writer.path())?.replay_from(from_sequence))
            }
            AppendLog::Volatile { .. } => Ok(WalIterator::empty()),
        }
    }
}
