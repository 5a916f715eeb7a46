//! # QuillKV
//!
//! An embeddable, single-node key-value storage engine with:
//! - Typed values (strings, integers, lists, sets, hashes) with per-key expiry
//! - Append log for durability, with crash recovery that truncates torn tails
//! - Point-in-time snapshots that bound recovery time and log growth
//! - Optimistic multi-key transactions validated by per-key versions
//! - LRU/LFU eviction against memory and key-count limits
//! - Change hooks and pattern subscriptions
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Engine (typed API, txns)                   │
//! │          (one commit region: check → log → apply)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!      ┌────────────────┼──────────────────┬──────────────────┐
//!      │                │                  │                  │
//!      ▼                ▼                  ▼                  ▼
//! ┌──────────┐   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │ Append   │   │  Keyspace   │    │  Eviction   │    │  Notifier   │
//! │ Log      │   │ (versions,  │    │ (LRU / LFU) │    │ (hooks,     │
//! │          │   │  expiry)    │    │             │    │  channels)  │
//! └────┬─────┘   └──────┬──────┘    └─────────────┘    └─────────────┘
//!      │                │
//!      │                ▼
//!      │         ┌─────────────┐
//!      └────────►│  Snapshots  │  (checkpoint truncates the log)
//!                └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use quillkv::Engine;
//!
//! let engine = Engine::in_memory()?;
//! engine.set("visits", 1i64)?;
//! assert_eq!(engine.increment("visits", 5)?, 6);
//! # Ok::<(), quillkv::QuillError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod value;
pub mod wal;
pub mod snapshot;
pub mod eviction;
pub mod txn;
pub mod notify;
pub mod pattern;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{QuillError, Result};
pub use config::{Backend, Config, EvictionPolicy, EvictionTrigger, SnapshotPolicy, SyncStrategy};
pub use engine::{Engine, EngineStats, RecoveryReport};
pub use value::{Entry, Value, ValueKind};
pub use txn::{Expiry, Transaction, TransactionGuard, TransactionStatus};
pub use notify::{ChangeEvent, ChangeKind, HookId, Subscription};
pub use pattern::GlobPattern;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of QuillKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
