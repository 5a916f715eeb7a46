//! Entry: one key's value plus metadata

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Value, ENTRY_OVERHEAD};

/// A stored value with expiry and version metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The typed value
    pub value: Value,

    /// Absolute expiry time in unix millis (None = never expires)
    pub expires_at: Option<u64>,

    /// Sequence number of the last mutation of this key.
    ///
    /// Sequence numbers are globally increasing, so the version of any
    /// single key strictly increases on every mutation and is reproduced
    /// exactly by replay.
    pub version: u64,

    /// Cached size estimate (key + overhead + value), rebuilt on load
    #[serde(skip)]
    size: usize,
}

impl Entry {
    /// Creates a new entry for `key`
    pub fn new(key: &[u8], value: Value, expires_at: Option<u64>, version: u64) -> Self {
        let size = Self::estimate(key, &value);
        Self {
            value,
            expires_at,
            version,
            size,
        }
    }

    /// Full size estimate for an entry under `key`
    pub fn estimate(key: &[u8], value: &Value) -> usize {
        key.len() + ENTRY_OVERHEAD + value.size_estimate()
    }

    /// Cached size estimate
    #[inline]
    pub fn size_estimate(&self) -> usize {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    pub(crate) fn grow(&mut self, bytes: usize) {
        self.size += bytes;
    }

    pub(crate) fn shrink(&mut self, bytes: usize) {
        self.size = self.size.saturating_sub(bytes);
    }

    /// Recompute the cached size (after deserialization)
    pub(crate) fn rebuild_size(&mut self, key: &[u8]) {
        self.size = Self::estimate(key, &self.value);
    }

    /// Checks if this entry has expired at `now` (unix millis)
    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    /// Remaining time to live at `now`, or None if no expiry
    pub fn ttl_at(&self, now: u64) -> Option<Duration> {
        self.expires_at
            .map(|exp| Duration::from_millis(exp.saturating_sub(now)))
    }
}
