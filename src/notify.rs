//! Change notification
//!
//! Every committed mutation produces one [`ChangeEvent`], delivered in commit
//! order to synchronous hooks and to channel subscribers.
//!
//! ## Delivery
//! - Hooks run on the writer's thread while the engine's commit region is
//!   held. They must be quick and must not call back into the engine.
//! - Subscribers receive events over an unbounded crossbeam channel, filtered
//!   by an optional glob pattern. A dropped `Subscription` is pruned the
//!   next time an event matches it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::pattern::GlobPattern;
use crate::wal::Operation;

/// What happened to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Set,
    Delete,
    /// An expiry was set
    Expire,
    /// An expiry was cleared
    Persist,
    Increment,
    ListPush,
    ListPop,
    SetAdd,
    SetRemove,
    HashSet,
    HashDelete,
    /// Every key was removed (the event key is empty)
    Flush,
    /// The key's TTL elapsed
    Expired,
    /// The key was removed to respect a ceiling
    Evicted,
}

impl ChangeKind {
    /// Event kind produced by applying `op` (None for batches)
    pub fn for_operation(op: &Operation) -> Option<Self> {
        Some(match op {
            Operation::Set { .. } => ChangeKind::Set,
            Operation::Delete { .. } => ChangeKind::Delete,
            Operation::Expire {
                expires_at: Some(_),
                ..
            } => ChangeKind::Expire,
            Operation::Expire {
                expires_at: None, ..
            } => ChangeKind::Persist,
            Operation::Increment { .. } => ChangeKind::Increment,
            Operation::ListPush { .. } => ChangeKind::ListPush,
            Operation::ListPop { .. } => ChangeKind::ListPop,
            Operation::SetAdd { .. } => ChangeKind::SetAdd,
            Operation::SetRemove { .. } => ChangeKind::SetRemove,
            Operation::HashSet { .. } => ChangeKind::HashSet,
            Operation::HashDelete { .. } => ChangeKind::HashDelete,
            Operation::Flush => ChangeKind::Flush,
            Operation::Batch { .. } => return None,
        })
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Set => "set",
            ChangeKind::Delete => "del",
            ChangeKind::Expire => "expire",
            ChangeKind::Persist => "persist",
            ChangeKind::Increment => "incrby",
            ChangeKind::ListPush => "lpush",
            ChangeKind::ListPop => "lpop",
            ChangeKind::SetAdd => "sadd",
            ChangeKind::SetRemove => "srem",
            ChangeKind::HashSet => "hset",
            ChangeKind::HashDelete => "hdel",
            ChangeKind::Flush => "flushall",
            ChangeKind::Expired => "expired",
            ChangeKind::Evicted => "evicted",
        };
        f.write_str(name)
    }
}

/// One committed change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: Bytes,
    pub kind: ChangeKind,

    /// Log sequence of the change; `None` for lazy expiry, which is not logged
    pub sequence: Option<u64>,
}

impl ChangeEvent {
    pub fn new(key: Bytes, kind: ChangeKind, sequence: Option<u64>) -> Self {
        Self {
            key,
            kind,
            sequence,
        }
    }
}

/// Handle for removing a registered hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Synchronous change callback
pub type ChangeHook = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    pattern: Option<GlobPattern>,
    sender: Sender<ChangeEvent>,
}

impl Subscriber {
    fn wants(&self, event: &ChangeEvent) -> bool {
        match &self.pattern {
            None => true,
            Some(_) if event.kind == ChangeKind::Flush => true,
            Some(pattern) => pattern.matches(&event.key),
        }
    }
}

/// Receiving end of a change subscription.
///
/// Dropping it (or passing it to `Engine::unsubscribe`) ends the subscription.
pub struct Subscription {
    id: u64,
    receiver: Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event if one is queued
    pub fn try_recv(&self) -> Option<ChangeEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Blocking iterator; ends once the subscription is cancelled or the
    /// engine is dropped
    pub fn iter(&self) -> channel::Iter<'_, ChangeEvent> {
        self.receiver.iter()
    }

    /// Non-blocking iterator over the queued events
    pub fn try_iter(&self) -> channel::TryIter<'_, ChangeEvent> {
        self.receiver.try_iter()
    }

    /// Number of queued events
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

/// Fan-out of change events to hooks and subscribers
#[derive(Default)]
pub struct Notifier {
    hooks: Vec<(HookId, ChangeHook)>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous hook
    pub fn add_hook(&mut self, hook: ChangeHook) -> HookId {
        self.next_id += 1;
        let id = HookId(self.next_id);
        self.hooks.push((id, hook));
        id
    }

    /// Remove a hook. Returns true if it was registered.
    pub fn remove_hook(&mut self, id: HookId) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(hook_id, _)| *hook_id != id);
        self.hooks.len() != before
    }

    /// Open a channel subscription, optionally filtered by a key pattern
    pub fn subscribe(&mut self, pattern: Option<GlobPattern>) -> Subscription {
        self.next_id += 1;
        let (sender, receiver) = channel::unbounded();
        let pattern = pattern.filter(|p| !p.matches_everything());
        self.subscribers.push(Subscriber {
            id: self.next_id,
            pattern,
            sender,
        });
        Subscription {
            id: self.next_id,
            receiver,
        }
    }

    /// Cancel a subscription by id. Returns true if it was active.
    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Number of registered hooks plus live subscribers
    pub fn listener_count(&self) -> usize {
        self.hooks.len() + self.subscribers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.hooks.is_empty() && self.subscribers.is_empty()
    }

    /// Deliver one event to every listener
    pub fn emit(&mut self, event: ChangeEvent) {
        for (id, hook) in &self.hooks {
            if panic::catch_unwind(AssertUnwindSafe(|| hook(&event))).is_err() {
                tracing::warn!("Change hook {:?} panicked on {} event", id, event.kind);
            }
        }

        // a failed send means the receiver is gone
        self.subscribers.retain(|subscriber| {
            !subscriber.wants(&event) || subscriber.sender.send(event.clone()).is_ok()
        });
    }
}
