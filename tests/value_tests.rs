//! Tests for the value model and keyspace
//!
//! These tests verify:
//! - check() rejects type mismatches and detects no-ops without mutating
//! - apply() stamps versions with the record sequence
//! - Counter semantics (absent = 0, numeric strings, overflow)
//! - Collections disappear when emptied
//! - Replay evaluates expiry against record timestamps

use bytes::Bytes;
use quillkv::value::{Keyspace, KeyEffect, Reply};
use quillkv::wal::{LogRecord, Operation};
use quillkv::{QuillError, Value, ValueKind};

// =============================================================================
// Helper Functions
// =============================================================================

fn key(k: &str) -> Bytes {
    Bytes::copy_from_slice(k.as_bytes())
}

fn set(k: &str, value: impl Into<Value>, expires_at: Option<u64>) -> Operation {
    Operation::Set {
        key: key(k),
        value: value.into(),
        expires_at,
    }
}

/// check + apply, the way the engine runs a live write
fn run(ks: &mut Keyspace, op: Operation, sequence: u64, now: u64) -> Reply {
    match ks.check(&op, now).unwrap() {
        Some(reply) => reply,
        None => ks.apply(&op, sequence, now).unwrap().reply,
    }
}

// =============================================================================
// Version Tests
// =============================================================================

#[test]
fn test_apply_stamps_version_with_sequence() {
    let mut ks = Keyspace::new();
    ks.apply(&set("a", "1", None), 7, 0).unwrap();

    assert_eq!(ks.version_of(b"a", 0), 7);

    ks.apply(&set("a", "2", None), 9, 0).unwrap();
    assert_eq!(ks.version_of(b"a", 0), 9);
}

#[test]
fn test_absent_and_expired_keys_have_version_zero() {
    let mut ks = Keyspace::new();
    ks.apply(&set("temp", "v", Some(100)), 3, 0).unwrap();

    assert_eq!(ks.version_of(b"missing", 0), 0);
    assert_eq!(ks.version_of(b"temp", 99), 3);
    assert_eq!(ks.version_of(b"temp", 100), 0);
}

#[test]
fn test_apply_reports_created_then_updated() {
    let mut ks = Keyspace::new();

    let first = ks.apply(&set("a", "1", None), 1, 0).unwrap();
    assert!(matches!(first.effect, KeyEffect::Created { .. }));

    let second = ks.apply(&set("a", "22", None), 2, 0).unwrap();
    assert!(matches!(second.effect, KeyEffect::Updated { .. }));
}

// =============================================================================
// Check Tests
// =============================================================================

#[test]
fn test_check_detects_noops() {
    let mut ks = Keyspace::new();
    ks.apply(&set("s", "v", None), 1, 0).unwrap();

    let delete_missing = Operation::Delete { key: key("nope") };
    assert_eq!(ks.check(&delete_missing, 0).unwrap(), Some(Reply::Bool(false)));

    let persist_without_ttl = Operation::Expire {
        key: key("s"),
        expires_at: None,
    };
    assert_eq!(ks.check(&persist_without_ttl, 0).unwrap(), Some(Reply::Bool(false)));

    let pop_missing = Operation::ListPop {
        key: key("nope"),
        front: false,
    };
    assert_eq!(ks.check(&pop_missing, 0).unwrap(), Some(Reply::Popped(None)));

    assert_eq!(ks.version_of(b"s", 0), 1);
}

#[test]
fn test_check_rejects_wrong_type() {
    let mut ks = Keyspace::new();
    ks.apply(&set("s", "v", None), 1, 0).unwrap();

    let push = Operation::ListPush {
        key: key("s"),
        values: vec![key("x")],
        front: false,
    };
    let err = ks.check(&push, 0).unwrap_err();

    assert!(matches!(
        err,
        QuillError::TypeMismatch {
            expected: ValueKind::List,
            found: ValueKind::String
        }
    ));
    assert_eq!(ks.get(b"s").unwrap().value, Value::from("v"));
}

#[test]
fn test_check_flush_on_empty_is_noop() {
    let ks = Keyspace::new();
    assert_eq!(ks.check(&Operation::Flush, 0).unwrap(), Some(Reply::Length(0)));
}

// =============================================================================
// Counter Tests
// =============================================================================

#[test]
fn test_increment_absent_starts_at_zero() {
    let mut ks = Keyspace::new();
    let op = Operation::Increment { key: key("n"), delta: 5 };

    assert_eq!(run(&mut ks, op, 1, 0), Reply::Integer(5));
}

#[test]
fn test_increment_numeric_string() {
    let mut ks = Keyspace::new();
    ks.apply(&set("n", "10", None), 1, 0).unwrap();

    let reply = run(&mut ks, Operation::Increment { key: key("n"), delta: -3 }, 2, 0);

    assert_eq!(reply, Reply::Integer(7));
    assert_eq!(ks.get(b"n").unwrap().value, Value::Integer(7));
}

#[test]
fn test_increment_keeps_expiry() {
    let mut ks = Keyspace::new();
    ks.apply(&set("n", 1i64, Some(5_000)), 1, 0).unwrap();

    run(&mut ks, Operation::Increment { key: key("n"), delta: 1 }, 2, 0);

    assert_eq!(ks.get(b"n").unwrap().expires_at, Some(5_000));
}

#[test]
fn test_increment_errors() {
    let mut ks = Keyspace::new();
    ks.apply(&set("word", "abc", None), 1, 0).unwrap();
    ks.apply(&set("max", i64::MAX, None), 2, 0).unwrap();
    run(
        &mut ks,
        Operation::SetAdd {
            key: key("set"),
            members: vec![key("m")],
        },
        3,
        0,
    );

    let word = Operation::Increment { key: key("word"), delta: 1 };
    assert!(matches!(ks.check(&word, 0), Err(QuillError::NotAnInteger)));

    let max = Operation::Increment { key: key("max"), delta: 1 };
    assert!(matches!(ks.check(&max, 0), Err(QuillError::NotAnInteger)));

    let set_op = Operation::Increment { key: key("set"), delta: 1 };
    assert!(matches!(ks.check(&set_op, 0), Err(QuillError::TypeMismatch { .. })));
}

// =============================================================================
// Collection Tests
// =============================================================================

#[test]
fn test_list_push_both_ends() {
    let mut ks = Keyspace::new();
    run(
        &mut ks,
        Operation::ListPush {
            key: key("l"),
            values: vec![key("b"), key("c")],
            front: false,
        },
        1,
        0,
    );
    let reply = run(
        &mut ks,
        Operation::ListPush {
            key: key("l"),
            values: vec![key("a")],
            front: true,
        },
        2,
        0,
    );

    assert_eq!(reply, Reply::Length(3));
    match &ks.get(b"l").unwrap().value {
        Value::List(items) => {
            let items: Vec<&[u8]> = items.iter().map(|b| b.as_ref()).collect();
            assert_eq!(items, vec![&b"a"[..], b"b", b"c"]);
        }
        other => panic!("expected list, got {:?}", other),
    }
}

#[test]
fn test_popping_last_element_removes_key() {
    let mut ks = Keyspace::new();
    run(
        &mut ks,
        Operation::ListPush {
            key: key("l"),
            values: vec![key("only")],
            front: false,
        },
        1,
        0,
    );

    let reply = run(&mut ks, Operation::ListPop { key: key("l"), front: true }, 2, 0);

    assert_eq!(reply, Reply::Popped(Some(key("only"))));
    assert!(ks.get(b"l").is_none());
}

#[test]
fn test_set_remove_last_member_removes_key() {
    let mut ks = Keyspace::new();
    run(
        &mut ks,
        Operation::SetAdd {
            key: key("s"),
            members: vec![key("a"), key("b")],
        },
        1,
        0,
    );

    let reply = run(
        &mut ks,
        Operation::SetRemove {
            key: key("s"),
            members: vec![key("a"), key("b"), key("zzz")],
        },
        2,
        0,
    );

    assert_eq!(reply, Reply::Length(2));
    assert!(ks.get(b"s").is_none());
}

#[test]
fn test_hash_set_reports_new_fields() {
    let mut ks = Keyspace::new();
    let hset = |value: &str| Operation::HashSet {
        key: key("h"),
        field: key("f"),
        value: key(value),
    };

    assert_eq!(run(&mut ks, hset("1"), 1, 0), Reply::Bool(true));
    assert_eq!(run(&mut ks, hset("2"), 2, 0), Reply::Bool(false));

    let reply = run(
        &mut ks,
        Operation::HashDelete {
            key: key("h"),
            fields: vec![key("f")],
        },
        3,
        0,
    );
    assert_eq!(reply, Reply::Length(1));
    assert!(ks.get(b"h").is_none());
}

#[test]
fn test_size_estimate_tracks_growth() {
    let mut ks = Keyspace::new();
    run(
        &mut ks,
        Operation::SetAdd {
            key: key("s"),
            members: vec![key("a")],
        },
        1,
        0,
    );
    let small = ks.get(b"s").unwrap().size_estimate();

    run(
        &mut ks,
        Operation::SetAdd {
            key: key("s"),
            members: vec![key("a-much-longer-member")],
        },
        2,
        0,
    );
    let large = ks.get(b"s").unwrap().size_estimate();

    assert!(large > small);
    assert_eq!(ks.memory_estimate(), large);
}

// =============================================================================
// Replay Tests
// =============================================================================

#[test]
fn test_replay_uses_record_timestamp_for_expiry() {
    let mut ks = Keyspace::new();

    // Written at t=1000 with expiry t=2000, then overwritten at t=3000
    ks.replay(&LogRecord::with_timestamp(1, set("k", "old", Some(2_000)), 1_000))
        .unwrap();
    ks.replay(&LogRecord::with_timestamp(
        2,
        Operation::Increment { key: key("k2"), delta: 1 },
        1_500,
    ))
    .unwrap();
    ks.replay(&LogRecord::with_timestamp(
        3,
        Operation::ListPush {
            key: key("k"),
            values: vec![key("x")],
            front: false,
        },
        3_000,
    ))
    .unwrap();

    // The string had expired at t=3000, so the push created a fresh list
    let entry = ks.get(b"k").unwrap();
    assert_eq!(entry.value.kind(), ValueKind::List);
    assert_eq!(entry.version, 3);
}

#[test]
fn test_replay_batch_applies_all_with_one_sequence() {
    let mut ks = Keyspace::new();
    let batch = Operation::Batch {
        ops: vec![set("a", "1", None), set("b", "2", None)],
    };

    ks.replay(&LogRecord::with_timestamp(4, batch, 0)).unwrap();

    assert_eq!(ks.version_of(b"a", 0), 4);
    assert_eq!(ks.version_of(b"b", 0), 4);
}

#[test]
fn test_replay_twice_is_idempotent_for_state() {
    let records = vec![
        LogRecord::with_timestamp(1, set("a", "1", None), 0),
        LogRecord::with_timestamp(2, Operation::Delete { key: key("a") }, 0),
        LogRecord::with_timestamp(3, set("b", 2i64, None), 0),
    ];

    let mut once = Keyspace::new();
    let mut twice = Keyspace::new();
    for record in &records {
        once.replay(record).unwrap();
        twice.replay(record).unwrap();
    }
    for record in &records {
        twice.replay(record).unwrap();
    }

    assert_eq!(once.live_entries(0), twice.live_entries(0));
}
