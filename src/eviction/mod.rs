//! Eviction Policy Manager
//!
//! Bounds the key space by estimated memory and key count.
//!
//! ## Responsibilities
//! - Track recency (LRU) or frequency (LFU) per key
//! - Track the size estimate of every key and the running total
//! - Report when a ceiling is exceeded and pick the victim
//!
//! The manager only decides; the engine removes the victim, logs the delete
//! and emits the notification, all inline with the triggering write.

mod lfu;
mod lru;

use std::collections::HashMap;

use bytes::Bytes;

use crate::config::{Config, EvictionPolicy, EvictionTrigger};

pub use lfu::LfuTracker;
pub use lru::LruTracker;

/// Per-key recency/frequency bookkeeping for one policy
pub trait EvictionTracker: Send {
    /// A new key was inserted
    fn record_insert(&mut self, key: &Bytes);

    /// An existing key was read or written
    fn record_access(&mut self, key: &[u8]);

    /// A key is gone (deleted, expired or evicted)
    fn remove(&mut self, key: &[u8]);

    /// The key this policy would evict next
    fn victim(&self) -> Option<Bytes>;

    /// Number of tracked keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every key
    fn clear(&mut self);

    /// Policy implemented by this tracker
    fn policy(&self) -> EvictionPolicy;
}

/// Build the tracker for a policy
pub fn tracker_for(policy: EvictionPolicy) -> Box<dyn EvictionTracker> {
    match policy {
        EvictionPolicy::Lru => Box::new(LruTracker::new()),
        EvictionPolicy::Lfu => Box::new(LfuTracker::new()),
    }
}

/// Ceilings plus per-key tracking
pub struct EvictionManager {
    tracker: Box<dyn EvictionTracker>,

    /// Key → size estimate
    sizes: HashMap<Bytes, usize>,

    /// Sum of `sizes`
    memory: usize,

    max_memory: Option<usize>,
    max_keys: Option<usize>,
    trigger: EvictionTrigger,
}

impl EvictionManager {
    pub fn new(
        policy: EvictionPolicy,
        max_memory: Option<usize>,
        max_keys: Option<usize>,
        trigger: EvictionTrigger,
    ) -> Self {
        Self {
            tracker: tracker_for(policy),
            sizes: HashMap::new(),
            memory: 0,
            max_memory,
            max_keys,
            trigger,
        }
    }

    /// Manager configured from engine config
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.eviction_policy,
            config.max_memory,
            config.max_keys,
            config.eviction_trigger,
        )
    }

    /// A key was created with `size` estimated bytes
    pub fn on_insert(&mut self, key: &Bytes, size: usize) {
        if let Some(old) = self.sizes.insert(key.clone(), size) {
            self.memory -= old;
        }
        self.memory += size;
        self.tracker.record_insert(key);
    }

    /// A key was read
    pub fn on_access(&mut self, key: &[u8]) {
        self.tracker.record_access(key);
    }

    /// An existing key was written; `size` is its new estimate.
    ///
    /// Returns true when the key's estimate grew (or it was not tracked).
    pub fn on_update(&mut self, key: &Bytes, size: usize) -> bool {
        match self.sizes.get_mut(key.as_ref()) {
            Some(current) => {
                let grew = size > *current;
                self.memory = self.memory - *current + size;
                *current = size;
                self.tracker.record_access(key);
                grew
            }
            None => {
                self.on_insert(key, size);
                true
            }
        }
    }

    /// A key was removed for any reason
    pub fn on_remove(&mut self, key: &[u8]) {
        if let Some(old) = self.sizes.remove(key) {
            self.memory -= old;
        }
        self.tracker.remove(key);
    }

    /// Forget every key
    pub fn clear(&mut self) {
        self.sizes.clear();
        self.memory = 0;
        self.tracker.clear();
    }

    /// Next key to evict, if any
    pub fn select_victim(&self) -> Option<Bytes> {
        self.tracker.victim()
    }

    /// True when a ceiling is exceeded
    pub fn over_limit(&self) -> bool {
        let over_keys = self
            .max_keys
            .map(|max| self.sizes.len() > max)
            .unwrap_or(false);
        let over_memory = self
            .max_memory
            .map(|max| self.memory > max)
            .unwrap_or(false);
        over_keys || over_memory
    }

    /// Whether a write should re-check the ceilings
    pub fn should_enforce(&self, grew: bool) -> bool {
        if self.max_keys.is_none() && self.max_memory.is_none() {
            return false;
        }
        match self.trigger {
            EvictionTrigger::Insert => grew,
            EvictionTrigger::AnyWrite => true,
        }
    }

    /// Total estimated bytes of tracked keys
    pub fn memory_usage(&self) -> usize {
        self.memory
    }

    /// Number of tracked keys
    pub fn tracked_keys(&self) -> usize {
        self.sizes.len()
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.tracker.policy()
    }

    pub fn trigger(&self) -> EvictionTrigger {
        self.trigger
    }
}
