//! WAL Reader
//!
//! Handles reading records from the append log file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{QuillError, Result};

use super::entry::{RecordHeader, MAX_PAYLOAD_SIZE};
use super::{LogRecord, HEADER_SIZE};

/// Reads records from the log file, front to back
pub struct WalReader {
    /// Buffered file handle
    reader: BufReader<File>,

    /// Offset just past the last record that decoded cleanly
    position: u64,

    /// File length when the reader was opened
    file_len: u64,

    /// Sequence of the last record returned
    last_sequence: u64,
}

impl WalReader {
    /// Open a log file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
            last_sequence: 0,
        })
    }

    /// Read the next record.
    ///
    /// Returns:
    /// - `Ok(Some(record))`: a valid record
    /// - `Ok(None)`: clean end of log
    /// - `Err(Corruption)`: torn or corrupted record at `position()`; nothing
    ///   after it can be trusted
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        let remaining = self.file_len - self.position;
        if remaining == 0 {
            return Ok(None);
        }

        if remaining < HEADER_SIZE as u64 {
            return Err(QuillError::Corruption(format!(
                "truncated record header at offset {} ({} bytes left)",
                self.position, remaining
            )));
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header_bytes)?;
        let header = RecordHeader::parse(&header_bytes);

        let available = remaining - HEADER_SIZE as u64;
        if header.len > MAX_PAYLOAD_SIZE || header.len as u64 > available {
            return Err(QuillError::Corruption(format!(
                "truncated record {} at offset {}: payload needs {} bytes, {} left",
                header.sequence, self.position, header.len, available
            )));
        }

        let mut payload = vec![0u8; header.len as usize];
        self.reader.read_exact(&mut payload)?;

        let record = LogRecord::from_parts(&header, &payload)?;

        if record.sequence <= self.last_sequence {
            return Err(QuillError::Corruption(format!(
                "sequence went backwards at offset {}: {} after {}",
                self.position, record.sequence, self.last_sequence
            )));
        }

        self.position += LogRecord::encoded_len(header.len);
        self.last_sequence = record.sequence;
        Ok(Some(record))
    }

    /// Offset just past the last valid record
    pub fn position(&self) -> u64 {
        self.position
    }

    /// File length at open time
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Iterate over all records
    pub fn records(self) -> WalIterator {
        self.replay_from(0)
    }

    /// Iterate over records with `sequence > from_sequence`
    pub fn replay_from(self, from_sequence: u64) -> WalIterator {
        WalIterator {
            reader: Some(self),
            after: from_sequence,
            skipped: 0,
            failed: false,
        }
    }
}

/// Lazy iterator over log records, ascending by sequence.
///
/// Yields at most one error (the first unreadable record) and then stops.
/// Open a new reader to restart.
pub struct WalIterator {
    reader: Option<WalReader>,
    after: u64,
    skipped: u64,
    failed: bool,
}

impl WalIterator {
    /// An iterator that yields nothing (volatile logs)
    pub fn empty() -> Self {
        Self {
            reader: None,
            after: 0,
            skipped: 0,
            failed: false,
        }
    }

    /// Offset just past the last valid record seen so far
    pub fn valid_position(&self) -> u64 {
        self.reader.as_ref().map(|r| r.position()).unwrap_or(0)
    }

    /// File length of the underlying log
    pub fn file_len(&self) -> u64 {
        self.reader.as_ref().map(|r| r.file_len()).unwrap_or(0)
    }

    /// Records passed over because they were at or below the start sequence
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// True once an unreadable record was hit
    pub fn hit_corruption(&self) -> bool {
        self.failed
    }
}

impl Iterator for WalIterator {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let reader = self.reader.as_mut()?;

        loop {
            match reader.next_record() {
                Ok(Some(record)) if record.sequence <= self.after => {
                    self.skipped += 1;
                }
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
