//! Snapshot Store
//!
//! Full-state checkpoints that bound log replay time.
//!
//! ## Responsibilities
//! - Write a dump of every live entry plus the sequence it covers
//! - All-or-nothing writes: temp file, fsync, rename, fsync directory
//! - Load the newest readable snapshot, skipping corrupt ones
//! - Keep only the newest `retained` files
//!
//! ## File Format
//! ```text
//! ┌───────────┬─────────────┬──────────┬─────────┬─────────┬──────────────┐
//! │ Magic (4) │ Version (2) │ Seq (8)  │ CRC (4) │ Len (8) │ Body         │
//! │  "QSNP"   │             │          │         │         │ (bincode)    │
//! └───────────┴─────────────┴──────────┴─────────┴─────────┴──────────────┘
//! ```
//! Files are named `snapshot-{seq:020}.snap` so lexical order is sequence order.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{QuillError, Result};
use crate::value::{Entry, Keyspace};

const MAGIC: &[u8; 4] = b"QSNP";
const FORMAT_VERSION: u16 = 1;
const HEADER_SIZE: usize = 4 + 2 + 8 + 4 + 8;
const FILE_PREFIX: &str = "snapshot-";
const FILE_SUFFIX: &str = ".snap";
const TMP_SUFFIX: &str = ".tmp";

/// A full copy of the live key space at one sequence number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Last log sequence reflected in `entries`
    pub sequence: u64,

    /// When the snapshot was taken (unix millis)
    pub taken_at: u64,

    /// Live entries, sorted by key
    pub entries: Vec<(Bytes, Entry)>,
}

impl Snapshot {
    /// Capture the live entries of `keyspace` as of `sequence`
    pub fn capture(keyspace: &Keyspace, sequence: u64, now: u64) -> Self {
        Self {
            sequence,
            taken_at: now,
            entries: keyspace.live_entries(now),
        }
    }

    /// Rebuild a keyspace from this snapshot
    pub fn into_keyspace(self) -> Keyspace {
        Keyspace::from_entries(self.entries)
    }

    /// Encode into the on-disk format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let crc = crc32fast::hash(&body);

        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode from the on-disk format, verifying magic, length and checksum
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(QuillError::Corruption(format!(
                "snapshot header truncated: {} of {} bytes",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(QuillError::Corruption("bad snapshot magic".to_string()));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(QuillError::Corruption(format!(
                "unsupported snapshot version {}",
                version
            )));
        }

        let sequence = read_u64(&bytes[6..14]);
        let crc = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);
        let len = read_u64(&bytes[18..26]);

        let body = &bytes[HEADER_SIZE..];
        if body.len() as u64 != len {
            return Err(QuillError::Corruption(format!(
                "snapshot body is {} bytes, header says {}",
                body.len(),
                len
            )));
        }

        let actual = crc32fast::hash(body);
        if actual != crc {
            return Err(QuillError::Corruption(format!(
                "snapshot CRC mismatch: expected {:08x}, got {:08x}",
                crc, actual
            )));
        }

        let snapshot: Snapshot = bincode::deserialize(body)
            .map_err(|e| QuillError::Corruption(format!("snapshot body unreadable: {}", e)))?;

        if snapshot.sequence != sequence {
            return Err(QuillError::Corruption(format!(
                "snapshot sequence mismatch: header {}, body {}",
                sequence, snapshot.sequence
            )));
        }

        Ok(snapshot)
    }
}

/// Manages snapshot files in one directory
pub struct SnapshotStore {
    dir: PathBuf,
    retained: usize,
}

impl SnapshotStore {
    /// Open (creating if needed) a snapshot directory.
    ///
    /// Leftover temp files from an interrupted checkpoint are removed.
    pub fn open(dir: &Path, retained: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(TMP_SUFFIX))
                .unwrap_or(false);
            if is_tmp {
                tracing::warn!("Removing interrupted checkpoint {}", path.display());
                fs::remove_file(&path)?;
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            retained: retained.max(1),
        })
    }

    /// Directory holding the snapshot files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture `keyspace` at `sequence` and write it atomically.
    ///
    /// Older snapshots beyond the retention count are deleted afterwards.
    pub fn checkpoint(&self, keyspace: &Keyspace, sequence: u64, now: u64) -> Result<Snapshot> {
        let snapshot = Snapshot::capture(keyspace, sequence, now);
        self.write(&snapshot)?;
        Ok(snapshot)
    }

    /// Write a snapshot atomically and prune old ones
    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let bytes = snapshot.encode()?;
        let path = self.path_for(snapshot.sequence);
        let tmp_path = path.with_extension("snap.tmp");

        let written = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)?;
            sync_dir(&self.dir)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(QuillError::Persistence(format!(
                "snapshot {} write failed: {}",
                snapshot.sequence, e
            )));
        }

        tracing::info!(
            "Wrote snapshot at sequence {} ({} keys, {} bytes)",
            snapshot.sequence,
            snapshot.entries.len(),
            bytes.len()
        );

        self.prune()?;
        Ok(path)
    }

    /// Load the newest readable snapshot.
    ///
    /// Corrupt snapshots are skipped with a warning in favor of older ones.
    /// Returns `Ok(None)` when no snapshot exists and `Err(Corruption)` when
    /// snapshots exist but none of them is readable.
    pub fn load_latest(&self) -> Result<Option<Snapshot>> {
        let files = self.list()?;
        if files.is_empty() {
            return Ok(None);
        }

        for (sequence, path) in files.iter().rev() {
            match fs::read(path).map_err(QuillError::from).and_then(|b| Snapshot::decode(&b)) {
                Ok(snapshot) if snapshot.sequence == *sequence => return Ok(Some(snapshot)),
                Ok(snapshot) => tracing::warn!(
                    "Skipping snapshot {}: file name says {}, contents say {}",
                    path.display(),
                    sequence,
                    snapshot.sequence
                ),
                Err(e) => tracing::warn!("Skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }

        Err(QuillError::Corruption(format!(
            "none of {} snapshots in {} is readable",
            files.len(),
            self.dir.display()
        )))
    }

    /// Snapshot files on disk as `(sequence, path)`, oldest first
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(sequence) = parse_sequence(&path) {
                files.push((sequence, path));
            }
        }
        files.sort_by_key(|(sequence, _)| *sequence);
        Ok(files)
    }

    /// Sequence of the newest snapshot file, if any
    pub fn latest_sequence(&self) -> Result<Option<u64>> {
        Ok(self.list()?.last().map(|(sequence, _)| *sequence))
    }

    fn path_for(&self, sequence: u64) -> PathBuf {
        self.dir
            .join(format!("{}{:020}{}", FILE_PREFIX, sequence, FILE_SUFFIX))
    }

    /// Delete all but the newest `retained` snapshots
    fn prune(&self) -> Result<()> {
        let files = self.list()?;
        if files.len() <= self.retained {
            return Ok(());
        }
        let excess = files.len() - self.retained;
        for (sequence, path) in files.into_iter().take(excess) {
            tracing::debug!("Removing old snapshot at sequence {}", sequence);
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

fn parse_sequence(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Persist a rename by syncing the parent directory (no-op where unsupported)
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    match File::open(dir) {
        Ok(handle) => match handle.sync_all() {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!("Directory sync unsupported for {}: {}", dir.display(), e);
                Ok(())
            }
        },
        Err(e) => {
            tracing::debug!("Cannot open {} for sync: {}", dir.display(), e);
            Ok(())
        }
    }
}
