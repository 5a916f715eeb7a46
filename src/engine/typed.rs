//! Typed operations: strings, counters, lists, sets, hashes and batches

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{QuillError, Result};
use crate::value::{resolve_range, unix_millis, Reply, Value, ValueKind};
use crate::wal::Operation;

use super::Engine;

impl Engine {
    // =========================================================================
    // Key Space
    // =========================================================================

    /// Store a value, replacing whatever the key held.
    ///
    /// Returns the key's new version. A zero `ttl` is rejected; use `delete`.
    pub fn put(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> Result<u64> {
        let value = value.into();
        if value.is_empty_collection() {
            return Err(QuillError::InvalidArgument(
                "cannot store an empty collection".to_string(),
            ));
        }

        let now = unix_millis();
        let op = Operation::Set {
            key: Bytes::copy_from_slice(key.as_ref()),
            value,
            expires_at: expiry_after(now, ttl)?,
        };
        let (_, sequence) = self.execute(op, now)?;
        Ok(sequence.unwrap_or(0))
    }

    /// `put` without expiry
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Result<u64> {
        self.put(key, value, None)
    }

    /// Remove a key. Returns true if it existed.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let op = Operation::Delete {
            key: Bytes::copy_from_slice(key.as_ref()),
        };
        bool_reply(self.execute(op, unix_millis())?.0)
    }

    /// Set a key's time to live. Returns false if the key does not exist.
    pub fn expire(&self, key: impl AsRef<[u8]>, ttl: Duration) -> Result<bool> {
        let now = unix_millis();
        let op = Operation::Expire {
            key: Bytes::copy_from_slice(key.as_ref()),
            expires_at: expiry_after(now, Some(ttl))?,
        };
        bool_reply(self.execute(op, now)?.0)
    }

    /// Remove a key's expiry. Returns false if the key is absent or had none.
    pub fn persist(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let op = Operation::Expire {
            key: Bytes::copy_from_slice(key.as_ref()),
            expires_at: None,
        };
        bool_reply(self.execute(op, unix_millis())?.0)
    }

    /// Remove every key (one log record). Returns how many were removed.
    pub fn flush_all(&self) -> Result<usize> {
        length_reply(self.execute(Operation::Flush, unix_millis())?.0)
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Add `delta` to a counter; an absent key counts as 0.
    ///
    /// Strings holding a decimal integer are accepted. Non-numeric values and
    /// overflow fail with `NotAnInteger`; collections with `TypeMismatch`.
    /// An existing expiry is kept.
    pub fn increment(&self, key: impl AsRef<[u8]>, delta: i64) -> Result<i64> {
        let op = Operation::Increment {
            key: Bytes::copy_from_slice(key.as_ref()),
            delta,
        };
        match self.execute(op, unix_millis())?.0 {
            Reply::Integer(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    /// Subtract `delta` from a counter
    pub fn decrement(&self, key: impl AsRef<[u8]>, delta: i64) -> Result<i64> {
        let delta = delta.checked_neg().ok_or(QuillError::NotAnInteger)?;
        self.increment(key, delta)
    }

    // =========================================================================
    // Lists
    // =========================================================================

    /// Append to the tail of a list. Returns the new length.
    pub fn list_push(&self, key: impl AsRef<[u8]>, value: impl Into<Bytes>) -> Result<usize> {
        self.list_push_all(key, [value], false)
    }

    /// Prepend to the head of a list. Returns the new length.
    pub fn list_push_left(&self, key: impl AsRef<[u8]>, value: impl Into<Bytes>) -> Result<usize> {
        self.list_push_all(key, [value], true)
    }

    /// Push several values in order at one end, as one mutation
    pub fn list_push_all<V: Into<Bytes>>(
        &self,
        key: impl AsRef<[u8]>,
        values: impl IntoIterator<Item = V>,
        front: bool,
    ) -> Result<usize> {
        let op = Operation::ListPush {
            key: Bytes::copy_from_slice(key.as_ref()),
            values: values.into_iter().map(Into::into).collect(),
            front,
        };
        length_reply(self.execute(op, unix_millis())?.0)
    }

    /// Pop from the tail of a list
    pub fn list_pop(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.pop(key.as_ref(), false)
    }

    /// Pop from the head of a list
    pub fn list_pop_left(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.pop(key.as_ref(), true)
    }

    /// Elements `start..=end`; negative indices count from the end.
    /// Out-of-range indices are clamped; an absent key is an empty list.
    pub fn list_range(&self, key: impl AsRef<[u8]>, start: i64, end: i64) -> Result<Vec<Bytes>> {
        self.read_typed(key.as_ref(), |value| match value {
            Value::List(items) => Ok(match resolve_range(items.len(), start, end) {
                Some((from, to)) => items.range(from..to).cloned().collect(),
                None => Vec::new(),
            }),
            other => Err(mismatch(ValueKind::List, other)),
        })
        .map(Option::unwrap_or_default)
    }

    /// Length of a list (0 if absent)
    pub fn list_len(&self, key: impl AsRef<[u8]>) -> Result<usize> {
        self.read_typed(key.as_ref(), |value| match value {
            Value::List(items) => Ok(items.len()),
            other => Err(mismatch(ValueKind::List, other)),
        })
        .map(Option::unwrap_or_default)
    }

    fn pop(&self, key: &[u8], front: bool) -> Result<Option<Bytes>> {
        let op = Operation::ListPop {
            key: Bytes::copy_from_slice(key),
            front,
        };
        match self.execute(op, unix_millis())?.0 {
            Reply::Popped(item) => Ok(item),
            other => Err(unexpected(other)),
        }
    }

    // =========================================================================
    // Sets
    // =========================================================================

    /// Add members to a set. Returns how many were new.
    pub fn set_add<M: Into<Bytes>>(
        &self,
        key: impl AsRef<[u8]>,
        members: impl IntoIterator<Item = M>,
    ) -> Result<usize> {
        let op = Operation::SetAdd {
            key: Bytes::copy_from_slice(key.as_ref()),
            members: members.into_iter().map(Into::into).collect(),
        };
        length_reply(self.execute(op, unix_millis())?.0)
    }

    /// Remove members from a set. Returns how many were present.
    pub fn set_remove<M: Into<Bytes>>(
        &self,
        key: impl AsRef<[u8]>,
        members: impl IntoIterator<Item = M>,
    ) -> Result<usize> {
        let op = Operation::SetRemove {
            key: Bytes::copy_from_slice(key.as_ref()),
            members: members.into_iter().map(Into::into).collect(),
        };
        length_reply(self.execute(op, unix_millis())?.0)
    }

    /// All members, sorted (empty if absent)
    pub fn set_members(&self, key: impl AsRef<[u8]>) -> Result<Vec<Bytes>> {
        self.read_typed(key.as_ref(), |value| match value {
            Value::Set(members) => Ok(members.iter().cloned().collect()),
            other => Err(mismatch(ValueKind::Set, other)),
        })
        .map(Option::unwrap_or_default)
    }

    pub fn set_is_member(&self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Result<bool> {
        let member = member.as_ref();
        self.read_typed(key.as_ref(), |value| match value {
            Value::Set(members) => Ok(members.contains(member)),
            other => Err(mismatch(ValueKind::Set, other)),
        })
        .map(|found| found.unwrap_or(false))
    }

    // =========================================================================
    // Hashes
    // =========================================================================

    /// Set one field. Returns true if the field is new.
    pub fn hash_set(
        &self,
        key: impl AsRef<[u8]>,
        field: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<bool> {
        let op = Operation::HashSet {
            key: Bytes::copy_from_slice(key.as_ref()),
            field: field.into(),
            value: value.into(),
        };
        bool_reply(self.execute(op, unix_millis())?.0)
    }

    pub fn hash_get(&self, key: impl AsRef<[u8]>, field: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let field = field.as_ref();
        self.read_typed(key.as_ref(), |value| match value {
            Value::Hash(fields) => Ok(fields.get(field).cloned()),
            other => Err(mismatch(ValueKind::Hash, other)),
        })
        .map(Option::flatten)
    }

    /// Remove fields. Returns how many existed.
    pub fn hash_delete<F: Into<Bytes>>(
        &self,
        key: impl AsRef<[u8]>,
        fields: impl IntoIterator<Item = F>,
    ) -> Result<usize> {
        let op = Operation::HashDelete {
            key: Bytes::copy_from_slice(key.as_ref()),
            fields: fields.into_iter().map(Into::into).collect(),
        };
        length_reply(self.execute(op, unix_millis())?.0)
    }

    pub fn hash_exists(&self, key: impl AsRef<[u8]>, field: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.hash_get(key, field)?.is_some())
    }

    /// All field/value pairs, sorted by field (empty if absent)
    pub fn hash_get_all(&self, key: impl AsRef<[u8]>) -> Result<Vec<(Bytes, Bytes)>> {
        self.read_typed(key.as_ref(), |value| match value {
            Value::Hash(fields) => Ok(fields
                .iter()
                .map(|(f, v)| (f.clone(), v.clone()))
                .collect()),
            other => Err(mismatch(ValueKind::Hash, other)),
        })
        .map(Option::unwrap_or_default)
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Store several values as one all-or-nothing record.
    ///
    /// A key listed twice keeps its last value. Returns the record's
    /// sequence (`None` for an empty batch).
    pub fn batch_set<K, V>(&self, items: impl IntoIterator<Item = (K, V)>) -> Result<Option<u64>>
    where
        K: AsRef<[u8]>,
        V: Into<Value>,
    {
        let mut writes = BTreeMap::new();
        for (key, value) in items {
            let value = value.into();
            if value.is_empty_collection() {
                return Err(QuillError::InvalidArgument(
                    "cannot store an empty collection".to_string(),
                ));
            }
            writes.insert(Bytes::copy_from_slice(key.as_ref()), value);
        }

        let mut state = self.lock_writable()?;
        let now = unix_millis();
        for key in writes.keys() {
            self.expire_key(&mut state, key, now);
        }

        let ops = writes
            .into_iter()
            .map(|(key, value)| Operation::Set {
                key,
                value,
                expires_at: None,
            })
            .collect();
        self.apply_batch(&mut state, ops, now)
    }

    /// Read several keys under one acquisition of the commit region
    pub fn batch_get<K: AsRef<[u8]>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<Vec<Option<Value>>> {
        let mut state = self.state.lock();
        let now = unix_millis();

        let mut out = Vec::new();
        for key in keys {
            let key = key.as_ref();
            self.expire_key(&mut state, key, now);
            let value = state.keyspace.get(key).map(|entry| entry.value.clone());
            if value.is_some() {
                super::Counters::bump(&self.counters.hits);
                state.eviction.on_access(key);
            } else {
                super::Counters::bump(&self.counters.misses);
            }
            out.push(value);
        }
        Ok(out)
    }

    /// Delete several keys as one all-or-nothing record. Returns how many existed.
    pub fn batch_delete<K: AsRef<[u8]>>(&self, keys: impl IntoIterator<Item = K>) -> Result<usize> {
        let keys: BTreeSet<Bytes> = keys
            .into_iter()
            .map(|key| Bytes::copy_from_slice(key.as_ref()))
            .collect();

        let mut state = self.lock_writable()?;
        let now = unix_millis();

        let mut ops = Vec::new();
        for key in keys {
            self.expire_key(&mut state, &key, now);
            let op = Operation::Delete { key };
            if state.keyspace.check(&op, now)?.is_none() {
                ops.push(op);
            }
        }

        let removed = ops.len();
        self.apply_batch(&mut state, ops, now)?;
        Ok(removed)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Run a typed read against a live value; `Ok(None)` if absent
    fn read_typed<T>(&self, key: &[u8], f: impl FnOnce(&Value) -> Result<T>) -> Result<Option<T>> {
        self.read(key, |entry| f(&entry.value)).transpose()
    }
}

/// Absolute expiry for `ttl` from `now`; zero is rejected
fn expiry_after(now: u64, ttl: Option<Duration>) -> Result<Option<u64>> {
    match ttl {
        None => Ok(None),
        Some(ttl) if ttl.is_zero() => Err(QuillError::InvalidArgument(
            "ttl must be greater than zero".to_string(),
        )),
        Some(ttl) => {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            Ok(Some(now.saturating_add(millis)))
        }
    }
}

fn bool_reply(reply: Reply) -> Result<bool> {
    match reply {
        Reply::Bool(b) => Ok(b),
        other => Err(unexpected(other)),
    }
}

fn length_reply(reply: Reply) -> Result<usize> {
    match reply {
        Reply::Length(n) => Ok(n),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: Reply) -> QuillError {
    QuillError::InvalidArgument(format!("unexpected reply {:?}", reply))
}

fn mismatch(expected: ValueKind, found: &Value) -> QuillError {
    QuillError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}
