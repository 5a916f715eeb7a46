//! Scoped transaction handle
//!
//! Aborts on every exit path that is not an explicit commit, including early
//! returns through `?` and panics.

use std::time::Duration;

use bytes::Bytes;

use crate::engine::Engine;
use crate::error::{QuillError, Result};
use crate::value::{checked_increment, Value, ValueKind};

use super::{Expiry, PendingWrite, Transaction, TransactionStatus};

/// A transaction bound to an engine for the duration of a scope
pub struct TransactionGuard<'a> {
    engine: &'a Engine,
    txn: Transaction,
}

impl<'a> TransactionGuard<'a> {
    pub(crate) fn new(engine: &'a Engine, txn: Transaction) -> Self {
        Self { engine, txn }
    }

    pub fn id(&self) -> u64 {
        self.txn.id()
    }

    pub fn status(&self) -> TransactionStatus {
        self.txn.status()
    }

    /// The underlying transaction
    pub fn transaction(&self) -> &Transaction {
        &self.txn
    }

    /// Read a key (staged value first), recording its version
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Value>> {
        self.engine.txn_read(&mut self.txn, key)
    }

    /// Stage a put without expiry
    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Result<()> {
        self.engine.txn_write(&mut self.txn, key, value, None)
    }

    /// Stage a put that expires `ttl` after commit
    pub fn put_with_ttl(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        ttl: Duration,
    ) -> Result<()> {
        self.engine.txn_write(&mut self.txn, key, value, Some(ttl))
    }

    /// Stage a delete
    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<()> {
        self.engine.txn_delete(&mut self.txn, key)
    }

    /// Read-modify-write counter update; returns the staged value
    pub fn increment(&mut self, key: impl AsRef<[u8]>, delta: i64) -> Result<i64> {
        let key = key.as_ref();
        let current = self.get(key)?;
        let next = checked_increment(current.as_ref(), delta)?;
        self.stage_keep(key, Value::Integer(next))?;
        Ok(next)
    }

    /// Append to a list; returns the staged length
    pub fn list_push(&mut self, key: impl AsRef<[u8]>, value: impl Into<Bytes>) -> Result<usize> {
        let key = key.as_ref();
        let mut items = match self.get(key)? {
            None => Default::default(),
            Some(Value::List(items)) => items,
            Some(other) => return Err(mismatch(ValueKind::List, &other)),
        };
        items.push_back(value.into());
        let len = items.len();
        self.stage_keep(key, Value::List(items))?;
        Ok(len)
    }

    /// Add a member to a set; returns true if it was new
    pub fn set_add(&mut self, key: impl AsRef<[u8]>, member: impl Into<Bytes>) -> Result<bool> {
        let key = key.as_ref();
        let mut members = match self.get(key)? {
            None => Default::default(),
            Some(Value::Set(members)) => members,
            Some(other) => return Err(mismatch(ValueKind::Set, &other)),
        };
        let added = members.insert(member.into());
        if added {
            self.stage_keep(key, Value::Set(members))?;
        }
        Ok(added)
    }

    /// Set a hash field; returns true if the field was new
    pub fn hash_set(
        &mut self,
        key: impl AsRef<[u8]>,
        field: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<bool> {
        let key = key.as_ref();
        let mut fields = match self.get(key)? {
            None => Default::default(),
            Some(Value::Hash(fields)) => fields,
            Some(other) => return Err(mismatch(ValueKind::Hash, &other)),
        };
        let is_new = fields.insert(field.into(), value.into()).is_none();
        self.stage_keep(key, Value::Hash(fields))?;
        Ok(is_new)
    }

    /// Validate and apply. Returns the commit record's sequence, or `None`
    /// when there was nothing to write.
    pub fn commit(mut self) -> Result<Option<u64>> {
        self.engine.commit(&mut self.txn)
    }

    /// Discard all staged writes
    pub fn abort(mut self) {
        self.engine.abort(&mut self.txn);
    }

    fn stage_keep(&mut self, key: &[u8], value: Value) -> Result<()> {
        self.txn.ensure_active()?;
        self.txn.stage(
            Bytes::copy_from_slice(key),
            PendingWrite::Put {
                value,
                expiry: Expiry::Keep,
            },
        );
        Ok(())
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.txn.is_active() {
            if std::thread::panicking() {
                tracing::debug!("Aborting transaction {} during unwind", self.txn.id());
            }
            self.engine.abort(&mut self.txn);
        }
    }
}

fn mismatch(expected: ValueKind, found: &Value) -> QuillError {
    QuillError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}
