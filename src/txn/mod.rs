//! Transaction Manager types
//!
//! Optimistic concurrency control: a transaction buffers writes and remembers
//! the version of every key it observed. `Engine::commit` re-checks those
//! versions inside the commit region and applies all writes as one log record,
//! or none of them.
//!
//! ## Lifecycle
//! ```text
//!   begin() ──► Active ──commit ok──► Committed
//!                 │
//!                 ├──commit conflict──► Aborted
//!                 └──abort / guard drop──► Aborted
//! ```

mod guard;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{QuillError, Result};
use crate::value::Value;

pub use guard::TransactionGuard;

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    Aborted,
}

/// Expiry of a staged put, resolved at commit time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Keep whatever expiry the key has when the transaction commits
    Keep,

    /// No expiry
    Never,

    /// Expire this long after commit
    After(Duration),

    /// Expire at this absolute unix-millis time
    At(u64),
}

impl Expiry {
    /// Absolute expiry at `now`; `current` is the key's live expiry
    pub fn resolve(self, now: u64, current: Option<u64>) -> Option<u64> {
        match self {
            Expiry::Keep => current,
            Expiry::Never => None,
            Expiry::After(ttl) => {
                Some(now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)))
            }
            Expiry::At(at) => Some(at),
        }
    }
}

/// A buffered write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    Put { value: Value, expiry: Expiry },
    Delete,
}

/// An optimistic transaction.
///
/// Owned by the caller; nothing reaches the store until `Engine::commit`.
#[derive(Debug)]
pub struct Transaction {
    id: u64,

    /// Key → version observed on first read (or first write)
    read_set: HashMap<Bytes, u64>,

    /// Key → staged write, in key order
    write_set: BTreeMap<Bytes, PendingWrite>,

    status: TransactionStatus,
}

impl Transaction {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            read_set: HashMap::new(),
            write_set: BTreeMap::new(),
            status: TransactionStatus::Active,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    pub fn read_set(&self) -> &HashMap<Bytes, u64> {
        &self.read_set
    }

    pub fn write_set(&self) -> &BTreeMap<Bytes, PendingWrite> {
        &self.write_set
    }

    /// Version recorded for `key`, if it was observed
    pub fn observed_version(&self, key: &[u8]) -> Option<u64> {
        self.read_set.get(key).copied()
    }

    /// Staged write for `key`, if any
    pub fn staged(&self, key: &[u8]) -> Option<&PendingWrite> {
        self.write_set.get(key)
    }

    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(QuillError::TransactionClosed {
                id: self.id,
                status: self.status,
            })
        }
    }

    /// Remember the first version seen for `key`
    pub(crate) fn record_read(&mut self, key: &Bytes, version: u64) {
        self.read_set.entry(key.clone()).or_insert(version);
    }

    pub(crate) fn has_observed(&self, key: &[u8]) -> bool {
        self.read_set.contains_key(key)
    }

    /// Stage a write; a `Keep` put inherits the expiry of an earlier staged
    /// put, and has none after a staged delete
    pub(crate) fn stage(&mut self, key: Bytes, write: PendingWrite) {
        let write = match write {
            PendingWrite::Put {
                value,
                expiry: Expiry::Keep,
            } => {
                let expiry = match self.write_set.get(&key) {
                    Some(PendingWrite::Put { expiry, .. }) => *expiry,
                    Some(PendingWrite::Delete) => Expiry::Never,
                    None => Expiry::Keep,
                };
                PendingWrite::Put { value, expiry }
            }
            other => other,
        };
        self.write_set.insert(key, write);
    }

    /// Drain the write set for commit
    pub(crate) fn take_writes(&mut self) -> BTreeMap<Bytes, PendingWrite> {
        std::mem::take(&mut self.write_set)
    }

    pub(crate) fn finish(&mut self, status: TransactionStatus) {
        self.status = status;
        if status == TransactionStatus::Aborted {
            self.write_set.clear();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() && !self.write_set.is_empty() {
            tracing::debug!(
                "Transaction {} dropped while active; discarding {} staged writes",
                self.id,
                self.write_set.len()
            );
        }
    }
}
