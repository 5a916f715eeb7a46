//! Tests for eviction
//!
//! These tests verify:
//! - Manager bookkeeping (sizes, totals, ceilings, trigger)
//! - LRU and LFU victim choice through the engine
//! - Evictions are logged and survive reopen
//! - Eviction events reach subscribers

use bytes::Bytes;
use quillkv::config::{Config, EvictionPolicy, EvictionTrigger, SnapshotPolicy, SyncStrategy};
use quillkv::eviction::EvictionManager;
use quillkv::{ChangeKind, Engine};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn engine_with(policy: EvictionPolicy, max_keys: Option<usize>, max_memory: Option<usize>) -> Engine {
    let mut builder = Config::builder().in_memory().eviction_policy(policy);
    if let Some(keys) = max_keys {
        builder = builder.max_keys(keys);
    }
    if let Some(bytes) = max_memory {
        builder = builder.max_memory(bytes);
    }
    Engine::open(builder.build()).unwrap()
}

fn key(k: &str) -> Bytes {
    Bytes::copy_from_slice(k.as_bytes())
}

// =============================================================================
// Manager Tests
// =============================================================================

#[test]
fn test_manager_tracks_memory_total() {
    let mut manager = EvictionManager::new(EvictionPolicy::Lru, None, None, EvictionTrigger::Insert);

    manager.on_insert(&key("a"), 100);
    manager.on_insert(&key("b"), 50);
    assert!(!manager.on_update(&key("a"), 30));
    assert_eq!(manager.memory_usage(), 80);
    assert_eq!(manager.tracked_keys(), 2);

    manager.on_remove(b"b");
    assert_eq!(manager.memory_usage(), 30);

    manager.clear();
    assert_eq!(manager.memory_usage(), 0);
    assert!(manager.select_victim().is_none());
}

#[test]
fn test_manager_over_limit() {
    let mut manager =
        EvictionManager::new(EvictionPolicy::Lru, Some(100), Some(2), EvictionTrigger::Insert);

    manager.on_insert(&key("a"), 40);
    manager.on_insert(&key("b"), 40);
    assert!(!manager.over_limit());

    manager.on_insert(&key("c"), 10);
    assert!(manager.over_limit());
    manager.on_remove(b"c");

    assert!(manager.on_update(&key("b"), 70));
    assert!(manager.over_limit());
}

#[test]
fn test_manager_trigger() {
    let insert = EvictionManager::new(EvictionPolicy::Lru, Some(10), None, EvictionTrigger::Insert);
    assert!(insert.should_enforce(true));
    assert!(!insert.should_enforce(false));

    let any = EvictionManager::new(EvictionPolicy::Lru, Some(10), None, EvictionTrigger::AnyWrite);
    assert!(any.should_enforce(false));

    let unbounded = EvictionManager::new(EvictionPolicy::Lru, None, None, EvictionTrigger::AnyWrite);
    assert!(!unbounded.should_enforce(true));
}

// =============================================================================
// Engine LRU Tests
// =============================================================================

#[test]
fn test_lru_evicts_least_recently_used_key() {
    let engine = engine_with(EvictionPolicy::Lru, Some(3), None);

    engine.set("a", "1").unwrap();
    engine.set("b", "2").unwrap();
    engine.set("c", "3").unwrap();
    engine.get("a").unwrap();

    engine.set("d", "4").unwrap();

    assert_eq!(engine.len(), 3);
    assert!(engine.exists("a").unwrap());
    assert!(!engine.exists("b").unwrap());
    assert!(engine.exists("c").unwrap());
    assert!(engine.exists("d").unwrap());
    assert_eq!(engine.stats().evicted, 1);
}

#[test]
fn test_lru_write_counts_as_use() {
    let engine = engine_with(EvictionPolicy::Lru, Some(2), None);

    engine.set("a", "1").unwrap();
    engine.set("b", "2").unwrap();
    engine.set("a", "updated").unwrap();
    engine.set("c", "3").unwrap();

    assert!(engine.exists("a").unwrap());
    assert!(!engine.exists("b").unwrap());
}

#[test]
fn test_memory_ceiling_evicts_until_within() {
    // Each entry is 2 (key) + 48 (overhead) + 1 (value) = 51 bytes
    let engine = engine_with(EvictionPolicy::Lru, None, Some(200));

    for k in ["k1", "k2", "k3", "k4"] {
        engine.set(k, "x").unwrap();
    }

    assert!(!engine.exists("k1").unwrap());
    assert_eq!(engine.len(), 3);
    assert!(engine.memory_usage() <= 200);
}

#[test]
fn test_oversized_entry_evicts_itself_last() {
    let engine = engine_with(EvictionPolicy::Lru, None, Some(200));

    engine.set("k1", "x").unwrap();
    engine.set("k2", "x").unwrap();
    engine.set("big", "x".repeat(500)).unwrap();

    assert!(engine.is_empty());
    assert_eq!(engine.memory_usage(), 0);
    assert_eq!(engine.stats().evicted, 3);
}

#[test]
fn test_growth_of_existing_key_enforces_memory_ceiling() {
    // "a" and "b" are 1 (key) + 48 (overhead) + 1 (value) = 50 bytes each
    let engine = engine_with(EvictionPolicy::Lru, None, Some(200));

    engine.set("a", "x").unwrap();
    engine.set("b", "x").unwrap();
    engine.set("a", "y".repeat(120)).unwrap();

    assert!(engine.exists("a").unwrap());
    assert!(!engine.exists("b").unwrap());
    assert!(engine.memory_usage() <= 200);
}

#[test]
fn test_collection_growth_enforces_memory_ceiling() {
    let engine = engine_with(EvictionPolicy::Lru, None, Some(400));
    engine.set("a", "x").unwrap();
    engine.set("b", "x").unwrap();

    for i in 0..50 {
        engine.list_push("l", format!("item-{}", i)).unwrap();
        assert!(engine.memory_usage() <= 400);
    }
    engine.set("a", "y".repeat(500)).unwrap();

    assert!(engine.memory_usage() <= 400);
    assert!(!engine.exists("b").unwrap());
    assert!(engine.stats().evicted >= 2);
}

#[test]
fn test_transaction_growth_enforces_memory_ceiling() {
    let engine = engine_with(EvictionPolicy::Lru, None, Some(200));
    engine.set("a", "x").unwrap();
    engine.set("b", "x").unwrap();

    let mut txn = engine.begin();
    engine.txn_read(&mut txn, "a").unwrap();
    engine.txn_write(&mut txn, "a", "y".repeat(120), None).unwrap();
    engine.commit(&mut txn).unwrap();

    assert!(engine.exists("a").unwrap());
    assert!(!engine.exists("b").unwrap());
    assert!(engine.memory_usage() <= 200);
}

#[test]
fn test_shrinking_write_does_not_evict() {
    let engine = engine_with(EvictionPolicy::Lru, None, Some(200));
    engine.set("a", "y".repeat(100)).unwrap();
    engine.set("b", "x").unwrap();

    engine.set("a", "short").unwrap();

    assert_eq!(engine.len(), 2);
    assert_eq!(engine.stats().evicted, 0);
}

#[test]
fn test_any_write_trigger_enforces_on_growth() {
    let config = Config::builder()
        .in_memory()
        .max_memory(200)
        .eviction_trigger(EvictionTrigger::AnyWrite)
        .build();
    let engine = Engine::open(config).unwrap();

    engine.set("a", "x").unwrap();
    engine.set("b", "x").unwrap();
    engine.set("a", "y".repeat(150)).unwrap();

    assert!(engine.exists("a").unwrap());
    assert!(!engine.exists("b").unwrap());
    assert!(engine.memory_usage() <= 200);
}

// =============================================================================
// Engine LFU Tests
// =============================================================================

#[test]
fn test_lfu_evicts_least_frequently_used_key() {
    let engine = engine_with(EvictionPolicy::Lfu, Some(3), None);

    engine.set("a", "1").unwrap();
    engine.set("b", "2").unwrap();
    engine.set("c", "3").unwrap();
    for _ in 0..3 {
        engine.get("a").unwrap();
    }
    engine.get("c").unwrap();

    engine.set("d", "4").unwrap();

    assert!(engine.exists("a").unwrap());
    assert!(!engine.exists("b").unwrap());
    assert!(engine.exists("c").unwrap());
    assert!(engine.exists("d").unwrap());
}

#[test]
fn test_lfu_ties_break_by_oldest() {
    let engine = engine_with(EvictionPolicy::Lfu, Some(2), None);

    engine.set("first", "1").unwrap();
    engine.set("second", "2").unwrap();
    engine.set("third", "3").unwrap();

    assert!(!engine.exists("first").unwrap());
    assert!(engine.exists("second").unwrap());
}

// =============================================================================
// Logging / Notification Tests
// =============================================================================

#[test]
fn test_eviction_emits_event_with_sequence() {
    let engine = engine_with(EvictionPolicy::Lru, Some(1), None);
    engine.set("old", "1").unwrap();

    let sub = engine.subscribe(None);
    engine.set("new", "2").unwrap();

    let events: Vec<_> = sub.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, ChangeKind::Set);
    assert_eq!(events[1].kind, ChangeKind::Evicted);
    assert_eq!(events[1].key, key("old"));
    assert!(events[1].sequence.unwrap() > events[0].sequence.unwrap());
}

#[test]
fn test_evictions_are_logged_and_replayed() {
    let temp = TempDir::new().unwrap();
    let config = || {
        Config::builder()
            .data_dir(temp.path())
            .max_keys(2)
            .sync_strategy(SyncStrategy::Always)
            .snapshot_policy(SnapshotPolicy::manual())
            .build()
    };

    {
        let engine = Engine::open(config()).unwrap();
        engine.set("a", "1").unwrap();
        engine.set("b", "2").unwrap();
        engine.set("c", "3").unwrap();
        assert_eq!(engine.len(), 2);
    }

    // Reopen without any ceiling: the logged delete still removes "a"
    let unbounded = Config::builder()
        .data_dir(temp.path())
        .snapshot_policy(SnapshotPolicy::manual())
        .build();
    let engine = Engine::open(unbounded).unwrap();
    assert_eq!(engine.len(), 2);
    assert!(!engine.exists("a").unwrap());
    assert_eq!(engine.recovery_report().records_replayed, 4);
}

#[test]
fn test_lower_ceiling_on_reopen_evicts_oldest() {
    let temp = TempDir::new().unwrap();

    {
        let engine = Engine::open(
            Config::builder()
                .data_dir(temp.path())
                .sync_strategy(SyncStrategy::Always)
                .build(),
        )
        .unwrap();
        for k in ["a", "b", "c", "d"] {
            engine.set(k, "v").unwrap();
        }
        engine.close().unwrap();
    }

    let engine = Engine::open(
        Config::builder()
            .data_dir(temp.path())
            .max_keys(2)
            .build(),
    )
    .unwrap();

    assert_eq!(engine.recovery_report().evicted_on_load, 2);
    assert_eq!(
        engine.keys("*").unwrap(),
        vec![key("c"), key("d")]
    );
}
