//! LFU tracker
//!
//! Keys ordered by `(frequency, insertion tick)`; the first element is the
//! victim, so equal frequencies fall back to the oldest insertion.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;

use crate::config::EvictionPolicy;

use super::EvictionTracker;

/// Least-frequently-used ordering of keys
#[derive(Default)]
pub struct LfuTracker {
    /// Key → (frequency, insertion tick)
    counters: HashMap<Bytes, (u64, u64)>,

    /// Ordered view of `counters`
    order: BTreeSet<(u64, u64, Bytes)>,

    /// Monotonic insertion counter
    tick: u64,
}

impl LfuTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access frequency of `key`, if tracked
    pub fn frequency(&self, key: &[u8]) -> Option<u64> {
        self.counters.get(key).map(|(freq, _)| *freq)
    }
}

impl EvictionTracker for LfuTracker {
    fn record_insert(&mut self, key: &Bytes) {
        if self.counters.contains_key(key.as_ref()) {
            self.record_access(key);
            return;
        }
        self.tick += 1;
        self.counters.insert(key.clone(), (1, self.tick));
        self.order.insert((1, self.tick, key.clone()));
    }

    fn record_access(&mut self, key: &[u8]) {
        let Some((freq, tick)) = self.counters.get_mut(key) else {
            return;
        };
        let (old_freq, inserted) = (*freq, *tick);
        *freq = old_freq.saturating_add(1);
        let new_freq = *freq;

        let owned = Bytes::copy_from_slice(key);
        self.order.remove(&(old_freq, inserted, owned.clone()));
        self.order.insert((new_freq, inserted, owned));
    }

    fn remove(&mut self, key: &[u8]) {
        if let Some((key, (freq, tick))) = self.counters.remove_entry(key) {
            self.order.remove(&(freq, tick, key));
        }
    }

    fn victim(&self) -> Option<Bytes> {
        self.order.first().map(|(_, _, key)| key.clone())
    }

    fn len(&self) -> usize {
        self.counters.len()
    }

    fn clear(&mut self) {
        self.counters.clear();
        self.order.clear();
    }

    fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::Lfu
    }
}
