//! Value Model
//!
//! Typed values and per-key metadata.
//!
//! ## Responsibilities
//! - Five value kinds: string, integer, list, set, hash
//! - Per-key expiry (absolute unix millis) and version
//! - Type checking for type-specific operations
//! - Lazy expiry on access (see [`Keyspace`])
//!
//! ## Size Estimates
//! Every entry carries an estimated in-memory footprint used by the
//! eviction ceilings:
//! ```text
//! entry   = key.len() + ENTRY_OVERHEAD + value
//! string  = bytes.len()
//! integer = 8
//! list    = Σ (elem.len() + ELEMENT_OVERHEAD)
//! set     = Σ (member.len() + ELEMENT_OVERHEAD)
//! hash    = Σ (field.len() + value.len() + ELEMENT_OVERHEAD)
//! ```

mod entry;
mod keyspace;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{QuillError, Result};

pub use entry::Entry;
pub use keyspace::{Applied, KeyEffect, Keyspace, Reply};

/// Fixed per-entry bookkeeping cost (map slot, metadata)
pub const ENTRY_OVERHEAD: usize = 48;

/// Fixed per-element cost inside collections
pub const ELEMENT_OVERHEAD: usize = 16;

/// A typed value stored under a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Opaque byte string
    String(Bytes),

    /// Signed 64-bit counter
    Integer(i64),

    /// Ordered list with O(1) push/pop at both ends
    List(VecDeque<Bytes>),

    /// Set of unique members (ordered for deterministic snapshots)
    Set(BTreeSet<Bytes>),

    /// Field → value map
    Hash(BTreeMap<Bytes, Bytes>),
}

/// The kind of a [`Value`], used in type errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    Integer,
    List,
    Set,
    Hash,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::List => "list",
            ValueKind::Set => "set",
            ValueKind::Hash => "hash",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Integer(_) => ValueKind::Integer,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::Hash(_) => ValueKind::Hash,
        }
    }

    /// Estimated in-memory size of the value payload
    pub fn size_estimate(&self) -> usize {
        match self {
            Value::String(bytes) => bytes.len(),
            Value::Integer(_) => 8,
            Value::List(items) => items.iter().map(|i| element_size(i)).sum(),
            Value::Set(members) => members.iter().map(|m| element_size(m)).sum(),
            Value::Hash(fields) => fields
                .iter()
                .map(|(f, v)| f.len() + v.len() + ELEMENT_OVERHEAD)
                .sum(),
        }
    }

    /// Read this value as an integer.
    ///
    /// Strings holding a decimal integer are accepted; collections are a type
    /// mismatch and other strings are `NotAnInteger`.
    pub fn as_integer(&self) -> Result<i64> {
        match self {
            Value::Integer(n) => Ok(*n),
            Value::String(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(QuillError::NotAnInteger),
            other => Err(QuillError::TypeMismatch {
                expected: ValueKind::Integer,
                found: other.kind(),
            }),
        }
    }

    /// Build an empty collection of the given kind
    pub(crate) fn empty_of(kind: ValueKind) -> Value {
        match kind {
            ValueKind::String => Value::String(Bytes::new()),
            ValueKind::Integer => Value::Integer(0),
            ValueKind::List => Value::List(VecDeque::new()),
            ValueKind::Set => Value::Set(BTreeSet::new()),
            ValueKind::Hash => Value::Hash(BTreeMap::new()),
        }
    }

    /// True for collections that hold no elements
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::List(items) => items.is_empty(),
            Value::Set(members) => members.is_empty(),
            Value::Hash(fields) => fields.is_empty(),
            Value::String(_) | Value::Integer(_) => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Bytes::from(s))
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::String(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::String(Bytes::from(b))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::String(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

/// Estimated size of one collection element
#[inline]
pub(crate) fn element_size(bytes: &[u8]) -> usize {
    bytes.len() + ELEMENT_OVERHEAD
}

/// Add `delta` to an optional current value following counter semantics.
///
/// Absent counts as zero. Overflow is reported as `NotAnInteger`.
pub fn checked_increment(current: Option<&Value>, delta: i64) -> Result<i64> {
    let base = match current {
        None => 0,
        Some(value) => value.as_integer()?,
    };
    base.checked_add(delta).ok_or(QuillError::NotAnInteger)
}

/// Fail with `TypeMismatch` unless `value` is of `expected` kind
pub(crate) fn expect_kind(value: &Value, expected: ValueKind) -> Result<()> {
    if value.kind() == expected {
        Ok(())
    } else {
        Err(QuillError::TypeMismatch {
            expected,
            found: value.kind(),
        })
    }
}

/// Current wall clock time as unix milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Resolve `start..=end` list indices (negative = from the end) to a
/// clamped half-open range, or `None` if the range is empty.
pub(crate) fn resolve_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }

    let mut start = if start < 0 { len + start } else { start };
    let mut end = if end < 0 { len + end } else { end };

    if start < 0 {
        start = 0;
    }
    if end >= len {
        end = len - 1;
    }
    if start > end || start >= len {
        return None;
    }

    Some((start as usize, end as usize + 1))
}
