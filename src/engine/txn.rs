//! Transactions: optimistic reads and writes, commit-time validation

use std::time::Duration;

use bytes::Bytes;

use crate::error::{QuillError, Result};
use crate::txn::{Expiry, PendingWrite, Transaction, TransactionGuard, TransactionStatus};
use crate::value::{unix_millis, Value};
use crate::wal::Operation;

use super::{Counters, Engine};

impl Engine {
    /// Start a transaction
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.next_txn_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }

    /// Start a transaction that aborts when dropped uncommitted
    pub fn transaction(&self) -> TransactionGuard<'_> {
        TransactionGuard::new(self, self.begin())
    }

    /// Read inside a transaction.
    ///
    /// A staged write is returned as-is; otherwise the live value is returned
    /// and its version recorded (first observation wins).
    pub fn txn_read(&self, txn: &mut Transaction, key: impl AsRef<[u8]>) -> Result<Option<Value>> {
        txn.ensure_active()?;
        let key = key.as_ref();

        if let Some(write) = txn.staged(key) {
            return Ok(match write {
                PendingWrite::Put { value, .. } => Some(value.clone()),
                PendingWrite::Delete => None,
            });
        }

        let (version, value) = {
            let mut state = self.state.lock();
            let now = unix_millis();
            self.expire_key(&mut state, key, now);
            match state.keyspace.get(key) {
                Some(entry) => {
                    let found = (entry.version, Some(entry.value.clone()));
                    Counters::bump(&self.counters.hits);
                    state.eviction.on_access(key);
                    found
                }
                None => {
                    Counters::bump(&self.counters.misses);
                    (0, None)
                }
            }
        };

        txn.record_read(&Bytes::copy_from_slice(key), version);
        Ok(value)
    }

    /// Stage a put. `ttl` counts from commit time; zero is rejected.
    pub fn txn_write(
        &self,
        txn: &mut Transaction,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let expiry = match ttl {
            None => Expiry::Never,
            Some(ttl) if ttl.is_zero() => {
                return Err(QuillError::InvalidArgument(
                    "ttl must be greater than zero".to_string(),
                ))
            }
            Some(ttl) => Expiry::After(ttl),
        };
        self.txn_write_with_expiry(txn, key, value, expiry)
    }

    /// Stage a put with an explicit expiry rule
    pub fn txn_write_with_expiry(
        &self,
        txn: &mut Transaction,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        expiry: Expiry,
    ) -> Result<()> {
        let value = value.into();
        if value.is_empty_collection() {
            return Err(QuillError::InvalidArgument(
                "cannot store an empty collection".to_string(),
            ));
        }
        self.stage(txn, key.as_ref(), PendingWrite::Put { value, expiry })
    }

    /// Stage a delete
    pub fn txn_delete(&self, txn: &mut Transaction, key: impl AsRef<[u8]>) -> Result<()> {
        self.stage(txn, key.as_ref(), PendingWrite::Delete)
    }

    /// Validate the read set and apply the write set as one record.
    ///
    /// Any key whose version moved since it was observed aborts the whole
    /// transaction with `Conflict`. Returns the commit record's sequence, or
    /// `None` when nothing needed writing.
    pub fn commit(&self, txn: &mut Transaction) -> Result<Option<u64>> {
        txn.ensure_active()?;

        let mut state = self.lock_writable()?;
        let now = unix_millis();

        let conflict = txn
            .read_set()
            .iter()
            .find(|(key, observed)| state.keyspace.version_of(key, now) != **observed)
            .map(|(key, observed)| (key.clone(), *observed));

        if let Some((key, observed)) = conflict {
            let current = state.keyspace.version_of(&key, now);
            drop(state);

            txn.finish(TransactionStatus::Aborted);
            Counters::bump(&self.counters.conflicts);
            Counters::bump(&self.counters.aborts);
            tracing::debug!(
                "Transaction {} conflicts on '{}': observed version {}, now {}",
                txn.id(),
                String::from_utf8_lossy(&key),
                observed,
                current
            );
            return Err(QuillError::conflict(&key));
        }

        let writes = txn.take_writes();
        let mut ops = Vec::with_capacity(writes.len());
        for (key, write) in writes {
            self.expire_key(&mut state, &key, now);
            let op = match write {
                PendingWrite::Put { value, expiry } => {
                    let current = state.keyspace.get(&key).and_then(|e| e.expires_at);
                    match expiry.resolve(now, current) {
                        Some(at) if at <= now => Operation::Delete { key },
                        expires_at => Operation::Set {
                            key,
                            value,
                            expires_at,
                        },
                    }
                }
                PendingWrite::Delete => Operation::Delete { key },
            };
            if state.keyspace.check(&op, now)?.is_none() {
                ops.push(op);
            }
        }

        match self.apply_batch(&mut state, ops, now) {
            Ok(sequence) => {
                txn.finish(TransactionStatus::Committed);
                Counters::bump(&self.counters.commits);
                Ok(sequence)
            }
            Err(e) => {
                txn.finish(TransactionStatus::Aborted);
                Counters::bump(&self.counters.aborts);
                Err(e)
            }
        }
    }

    /// Discard a transaction's staged writes. No effect if already finished.
    pub fn abort(&self, txn: &mut Transaction) {
        if txn.is_active() {
            txn.finish(TransactionStatus::Aborted);
            Counters::bump(&self.counters.aborts);
            tracing::debug!("Transaction {} aborted", txn.id());
        }
    }

    /// Run `f` in a transaction and commit; any error aborts
    pub fn run_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionGuard<'_>) -> Result<T>,
    {
        let mut guard = self.transaction();
        let out = f(&mut guard)?;
        guard.commit()?;
        Ok(out)
    }

    /// `run_transaction`, retried up to `attempts` times on conflict
    pub fn run_transaction_with_retry<T, F>(&self, attempts: usize, mut f: F) -> Result<T>
    where
        F: FnMut(&mut TransactionGuard<'_>) -> Result<T>,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run_transaction(|guard| f(guard)) {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::debug!("Transaction attempt {} of {} conflicted: {}", attempt, attempts, e);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Stage a write, recording the key's current version if not yet observed
    /// so a concurrent change to a blind-written key still conflicts
    fn stage(&self, txn: &mut Transaction, key: &[u8], write: PendingWrite) -> Result<()> {
        txn.ensure_active()?;
        let key = Bytes::copy_from_slice(key);

        if !txn.has_observed(&key) {
            let version = self.state.lock().keyspace.version_of(&key, unix_millis());
            txn.record_read(&key, version);
        }

        txn.stage(key, write);
        Ok(())
    }
}
