//! LRU tracker
//!
//! Doubly linked list stored in a slab plus a key → slot index, giving O(1)
//! touch, insert, remove and victim lookup.

use std::collections::HashMap;

use bytes::Bytes;

use crate::config::EvictionPolicy;

use super::EvictionTracker;

struct Node {
    key: Bytes,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Least-recently-used ordering of keys
#[derive(Default)]
pub struct LruTracker {
    /// Slab of list nodes; `None` slots are on the free list
    nodes: Vec<Option<Node>>,

    /// Reusable slots
    free: Vec<usize>,

    /// Key → slot
    index: HashMap<Bytes, usize>,

    /// Least recently used
    head: Option<usize>,

    /// Most recently used
    tail: Option<usize>,
}

impl LruTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys from least to most recently used
    pub fn order(&self) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            match &self.nodes[slot] {
                Some(node) => {
                    out.push(node.key.clone());
                    cursor = node.next;
                }
                None => break,
            }
        }
        out
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match &self.nodes[slot] {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_back(&mut self, slot: usize) {
        if let Some(node) = self.nodes[slot].as_mut() {
            node.prev = self.tail;
            node.next = None;
        }
        match self.tail {
            Some(t) => {
                if let Some(node) = self.nodes[t].as_mut() {
                    node.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn allocate(&mut self, key: Bytes) -> usize {
        let node = Node {
            key,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }
}

impl EvictionTracker for LruTracker {
    fn record_insert(&mut self, key: &Bytes) {
        if self.index.contains_key(key.as_ref()) {
            self.record_access(key);
            return;
        }
        let slot = self.allocate(key.clone());
        self.push_back(slot);
        self.index.insert(key.clone(), slot);
    }

    fn record_access(&mut self, key: &[u8]) {
        let Some(&slot) = self.index.get(key) else {
            return;
        };
        if self.tail == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_back(slot);
    }

    fn remove(&mut self, key: &[u8]) {
        let Some(slot) = self.index.remove(key) else {
            return;
        };
        self.unlink(slot);
        self.nodes[slot] = None;
        self.free.push(slot);
    }

    fn victim(&self) -> Option<Bytes> {
        self.head
            .and_then(|slot| self.nodes[slot].as_ref())
            .map(|node| node.key.clone())
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::Lru
    }
}
