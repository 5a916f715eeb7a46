//! Keyspace: the live key → entry map
//!
//! All type-specific mutations are expressed as [`Operation`]s so the exact
//! same code path serves live writes and log replay. Writes are split in two
//! phases:
//!
//! 1. `check()`: validates the operation against current state without
//!    touching it (type errors, counter overflow) and detects no-ops.
//! 2. `apply()`: performs the mutation and stamps the key's version with the
//!    record's sequence number.
//!
//! The engine logs the record between the two phases, so a failed check never
//! reaches the append log and a failed append never reaches the map.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{QuillError, Result};
use crate::wal::{LogRecord, Operation};

use super::{checked_increment, element_size, expect_kind, Entry, Value, ValueKind, ELEMENT_OVERHEAD};

/// Result returned to the caller of a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nothing to report (set)
    Unit,

    /// Yes/no outcome (delete, expire, hash_set "field was new")
    Bool(bool),

    /// New counter value (increment)
    Integer(i64),

    /// A length or count (list_push, set_add, hash_delete, flush)
    Length(usize),

    /// Popped element (list_pop)
    Popped(Option<Bytes>),
}

/// What a mutation did to the key, for eviction bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEffect {
    /// A new key was inserted with this size estimate
    Created { size: usize },

    /// An existing key changed; new size estimate
    Updated { size: usize },

    /// The key was removed
    Removed,

    /// Nothing changed
    Unchanged,

    /// Every key was removed
    Flushed { removed: usize },
}

/// Outcome of `Keyspace::apply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub reply: Reply,
    pub effect: KeyEffect,
}

impl Applied {
    fn new(reply: Reply, effect: KeyEffect) -> Self {
        Self { reply, effect }
    }
}

/// The live key space
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<Bytes, Entry>,
}

impl Keyspace {
    /// Create an empty keyspace
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a keyspace from snapshot entries
    pub fn from_entries(entries: impl IntoIterator<Item = (Bytes, Entry)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(key, mut entry)| {
                entry.rebuild_size(&key);
                (key, entry)
            })
            .collect();
        Self { entries }
    }

    /// Number of stored keys (including not-yet-collected expired ones)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw lookup, ignoring expiry
    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Lookup that treats expired entries as absent
    pub fn get_live(&self, key: &[u8], now: u64) -> Option<&Entry> {
        self.entries.get(key).filter(|e| !e.is_expired_at(now))
    }

    /// Physically remove `key` if it has expired. Returns true if removed.
    pub fn expire_if_due(&mut self, key: &[u8], now: u64) -> bool {
        let due = self
            .entries
            .get(key)
            .map(|e| e.is_expired_at(now))
            .unwrap_or(false);
        if due {
            self.entries.remove(key);
        }
        due
    }

    /// Current version of `key` (0 when absent or expired)
    pub fn version_of(&self, key: &[u8], now: u64) -> u64 {
        self.get_live(key, now).map(|e| e.version).unwrap_or(0)
    }

    /// Remove a key unconditionally
    pub fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        self.entries.remove(key)
    }

    /// Remove every key
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over all stored entries (including expired ones)
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Entry)> {
        self.entries.iter()
    }

    /// Keys whose expiry has passed at `now`
    pub fn expired_keys(&self, now: u64) -> Vec<Bytes> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Owned copy of all live entries, sorted by key
    pub fn live_entries(&self, now: u64) -> Vec<(Bytes, Entry)> {
        let mut out: Vec<(Bytes, Entry)> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired_at(now))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Sum of all cached size estimates
    pub fn memory_estimate(&self) -> usize {
        self.entries.values().map(|e| e.size_estimate()).sum()
    }

    // =========================================================================
    // Phase 1: validation
    // =========================================================================

    /// Validate `op` against the state at `now`.
    ///
    /// Returns:
    /// - `Ok(None)`: the operation will mutate state and must be logged
    /// - `Ok(Some(reply))`: the operation is a no-op; `reply` is its result
    /// - `Err(_)`: the operation is invalid (type mismatch, overflow, ...)
    pub fn check(&self, op: &Operation, now: u64) -> Result<Option<Reply>> {
        let live = |key: &Bytes| self.get_live(key, now);

        match op {
            Operation::Set { .. } => Ok(None),

            Operation::Delete { key } => Ok(match live(key) {
                Some(_) => None,
                None => Some(Reply::Bool(false)),
            }),

            Operation::Expire { key, expires_at } => Ok(match live(key) {
                None => Some(Reply::Bool(false)),
                Some(entry) if expires_at.is_none() && entry.expires_at.is_none() => {
                    Some(Reply::Bool(false))
                }
                Some(_) => None,
            }),

            Operation::Increment { key, delta } => {
                checked_increment(live(key).map(|e| &e.value), *delta)?;
                Ok(None)
            }

            Operation::ListPush { key, values, .. } => match live(key) {
                Some(entry) => match &entry.value {
                    Value::List(items) if values.is_empty() => Ok(Some(Reply::Length(items.len()))),
                    Value::List(_) => Ok(None),
                    other => Err(mismatch(ValueKind::List, other)),
                },
                None if values.is_empty() => Ok(Some(Reply::Length(0))),
                None => Ok(None),
            },

            Operation::ListPop { key, .. } => match live(key) {
                Some(entry) => {
                    expect_kind(&entry.value, ValueKind::List)?;
                    Ok(None)
                }
                None => Ok(Some(Reply::Popped(None))),
            },

            Operation::SetAdd { key, members } => match live(key) {
                Some(entry) => match &entry.value {
                    Value::Set(set) if members.iter().all(|m| set.contains(m)) => {
                        Ok(Some(Reply::Length(0)))
                    }
                    Value::Set(_) => Ok(None),
                    other => Err(mismatch(ValueKind::Set, other)),
                },
                None if members.is_empty() => Ok(Some(Reply::Length(0))),
                None => Ok(None),
            },

            Operation::SetRemove { key, members } => match live(key) {
                Some(entry) => match &entry.value {
                    Value::Set(set) if members.iter().any(|m| set.contains(m)) => Ok(None),
                    Value::Set(_) => Ok(Some(Reply::Length(0))),
                    other => Err(mismatch(ValueKind::Set, other)),
                },
                None => Ok(Some(Reply::Length(0))),
            },

            Operation::HashSet { key, .. } => match live(key) {
                Some(entry) => {
                    expect_kind(&entry.value, ValueKind::Hash)?;
                    Ok(None)
                }
                None => Ok(None),
            },

            Operation::HashDelete { key, fields } => match live(key) {
                Some(entry) => match &entry.value {
                    Value::Hash(map) if fields.iter().any(|f| map.contains_key(f)) => Ok(None),
                    Value::Hash(_) => Ok(Some(Reply::Length(0))),
                    other => Err(mismatch(ValueKind::Hash, other)),
                },
                None => Ok(Some(Reply::Length(0))),
            },

            Operation::Flush => Ok(if self.entries.is_empty() {
                Some(Reply::Length(0))
            } else {
                None
            }),

            Operation::Batch { .. } => Err(QuillError::InvalidArgument(
                "batches are checked operation by operation".to_string(),
            )),
        }
    }

    // =========================================================================
    // Phase 2: mutation
    // =========================================================================

    /// Apply a single (non-batch) operation stamped with `sequence`.
    ///
    /// Expired entries for the touched key are dropped first, so replaying a
    /// record with its original timestamp sees the same state the live write saw.
    pub fn apply(&mut self, op: &Operation, sequence: u64, now: u64) -> Result<Applied> {
        if let Some(key) = op.key() {
            self.expire_if_due(key, now);
        }

        match op {
            Operation::Set {
                key,
                value,
                expires_at,
            } => {
                let entry = Entry::new(key, value.clone(), *expires_at, sequence);
                let size = entry.size_estimate();
                let effect = match self.entries.insert(key.clone(), entry) {
                    Some(_) => KeyEffect::Updated { size },
                    None => KeyEffect::Created { size },
                };
                Ok(Applied::new(Reply::Unit, effect))
            }

            Operation::Delete { key } => Ok(match self.entries.remove(key) {
                Some(_) => Applied::new(Reply::Bool(true), KeyEffect::Removed),
                None => Applied::new(Reply::Bool(false), KeyEffect::Unchanged),
            }),

            Operation::Expire { key, expires_at } => match self.entries.get_mut(key) {
                Some(entry) => {
                    entry.expires_at = *expires_at;
                    entry.version = sequence;
                    let size = entry.size_estimate();
                    Ok(Applied::new(Reply::Bool(true), KeyEffect::Updated { size }))
                }
                None => Ok(Applied::new(Reply::Bool(false), KeyEffect::Unchanged)),
            },

            Operation::Increment { key, delta } => match self.entries.get_mut(key) {
                Some(entry) => {
                    let next = checked_increment(Some(&entry.value), *delta)?;
                    entry.value = Value::Integer(next);
                    entry.version = sequence;
                    entry.rebuild_size(key);
                    let size = entry.size_estimate();
                    Ok(Applied::new(Reply::Integer(next), KeyEffect::Updated { size }))
                }
                None => {
                    let entry = Entry::new(key, Value::Integer(*delta), None, sequence);
                    let size = entry.size_estimate();
                    self.entries.insert(key.clone(), entry);
                    Ok(Applied::new(Reply::Integer(*delta), KeyEffect::Created { size }))
                }
            },

            Operation::ListPush { key, values, front } => {
                let (entry, created) = self.collection_mut(key, ValueKind::List, sequence)?;
                let mut added = 0;
                let len = match &mut entry.value {
                    Value::List(items) => {
                        for value in values {
                            added += element_size(value);
                            if *front {
                                items.push_front(value.clone());
                            } else {
                                items.push_back(value.clone());
                            }
                        }
                        items.len()
                    }
                    other => return Err(mismatch(ValueKind::List, other)),
                };
                entry.grow(added);
                let effect = self.finish_collection(key, created);
                Ok(Applied::new(Reply::Length(len), effect))
            }

            Operation::ListPop { key, front } => {
                let popped = match self.entries.get_mut(key) {
                    None => return Ok(Applied::new(Reply::Popped(None), KeyEffect::Unchanged)),
                    Some(entry) => {
                        let popped = match &mut entry.value {
                            Value::List(items) => {
                                if *front {
                                    items.pop_front()
                                } else {
                                    items.pop_back()
                                }
                            }
                            other => return Err(mismatch(ValueKind::List, other)),
                        };
                        if let Some(item) = &popped {
                            entry.shrink(element_size(item));
                            entry.version = sequence;
                        }
                        popped
                    }
                };
                let effect = if popped.is_some() {
                    self.finish_collection(key, false)
                } else {
                    KeyEffect::Unchanged
                };
                Ok(Applied::new(Reply::Popped(popped), effect))
            }

            Operation::SetAdd { key, members } => {
                let (entry, created) = self.collection_mut(key, ValueKind::Set, sequence)?;
                let mut added = 0usize;
                let mut grown = 0usize;
                match &mut entry.value {
                    Value::Set(set) => {
                        for member in members {
                            if set.insert(member.clone()) {
                                added += 1;
                                grown += element_size(member);
                            }
                        }
                    }
                    other => return Err(mismatch(ValueKind::Set, other)),
                }
                entry.grow(grown);
                let effect = self.finish_collection(key, created);
                Ok(Applied::new(Reply::Length(added), effect))
            }

            Operation::SetRemove { key, members } => {
                let Some(entry) = self.entries.get_mut(key) else {
                    return Ok(Applied::new(Reply::Length(0), KeyEffect::Unchanged));
                };
                let mut removed = 0usize;
                let mut shrunk = 0usize;
                match &mut entry.value {
                    Value::Set(set) => {
                        for member in members {
                            if set.remove(member) {
                                removed += 1;
                                shrunk += element_size(member);
                            }
                        }
                    }
                    other => return Err(mismatch(ValueKind::Set, other)),
                }
                entry.shrink(shrunk);
                entry.version = sequence;
                let effect = self.finish_collection(key, false);
                Ok(Applied::new(Reply::Length(removed), effect))
            }

            Operation::HashSet { key, field, value } => {
                let (entry, created) = self.collection_mut(key, ValueKind::Hash, sequence)?;
                let is_new = match &mut entry.value {
                    Value::Hash(map) => map.insert(field.clone(), value.clone()),
                    other => return Err(mismatch(ValueKind::Hash, other)),
                };
                let is_new = match is_new {
                    Some(old) => {
                        entry.shrink(old.len());
                        entry.grow(value.len());
                        false
                    }
                    None => {
                        entry.grow(field.len() + value.len() + ELEMENT_OVERHEAD);
                        true
                    }
                };
                let effect = self.finish_collection(key, created);
                Ok(Applied::new(Reply::Bool(is_new), effect))
            }

            Operation::HashDelete { key, fields } => {
                let Some(entry) = self.entries.get_mut(key) else {
                    return Ok(Applied::new(Reply::Length(0), KeyEffect::Unchanged));
                };
                let mut removed = 0usize;
                let mut shrunk = 0usize;
                match &mut entry.value {
                    Value::Hash(map) => {
                        for field in fields {
                            if let Some(old) = map.remove(field) {
                                removed += 1;
                                shrunk += field.len() + old.len() + ELEMENT_OVERHEAD;
                            }
                        }
                    }
                    other => return Err(mismatch(ValueKind::Hash, other)),
                }
                entry.shrink(shrunk);
                entry.version = sequence;
                let effect = self.finish_collection(key, false);
                Ok(Applied::new(Reply::Length(removed), effect))
            }

            Operation::Flush => {
                let removed = self.entries.len();
                self.entries.clear();
                Ok(Applied::new(
                    Reply::Length(removed),
                    KeyEffect::Flushed { removed },
                ))
            }

            Operation::Batch { .. } => Err(QuillError::InvalidArgument(
                "batches are applied operation by operation".to_string(),
            )),
        }
    }

    /// Replay one log record (batches included) using its own timestamp
    pub fn replay(&mut self, record: &LogRecord) -> Result<()> {
        match &record.operation {
            Operation::Batch { ops } => {
                for op in ops {
                    self.apply(op, record.sequence, record.timestamp)?;
                }
            }
            op => {
                self.apply(op, record.sequence, record.timestamp)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Get the collection under `key`, creating an empty one if absent.
    /// Type is checked before anything is inserted.
    fn collection_mut(
        &mut self,
        key: &Bytes,
        kind: ValueKind,
        sequence: u64,
    ) -> Result<(&mut Entry, bool)> {
        if let Some(existing) = self.entries.get(key) {
            expect_kind(&existing.value, kind)?;
        }

        let created = !self.entries.contains_key(key);
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(key, Value::empty_of(kind), None, sequence));
        entry.version = sequence;
        Ok((entry, created))
    }

    /// Drop collections that became empty and report the resulting effect
    fn finish_collection(&mut self, key: &Bytes, created: bool) -> KeyEffect {
        let (empty, size) = match self.entries.get(key) {
            Some(entry) => (entry.value.is_empty_collection(), entry.size_estimate()),
            None => return KeyEffect::Unchanged,
        };

        if empty {
            self.entries.remove(key);
            return if created {
                KeyEffect::Unchanged
            } else {
                KeyEffect::Removed
            };
        }

        if created {
            KeyEffect::Created { size }
        } else {
            KeyEffect::Updated { size }
        }
    }
}

fn mismatch(expected: ValueKind, found: &Value) -> QuillError {
    QuillError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}
