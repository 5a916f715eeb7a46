//! Tests for the snapshot store
//!
//! These tests verify:
//! - Capture skips expired entries
//! - Encode/decode with checksum and header validation
//! - Atomic writes, retention, and leftover temp files
//! - Loading falls back to older snapshots when the newest is corrupt

use std::fs;

use bytes::Bytes;
use quillkv::snapshot::{Snapshot, SnapshotStore};
use quillkv::value::Keyspace;
use quillkv::wal::Operation;
use quillkv::{QuillError, Value};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn keyspace_with(count: usize) -> Keyspace {
    let mut ks = Keyspace::new();
    for i in 0..count {
        let op = Operation::Set {
            key: Bytes::from(format!("key{:03}", i)),
            value: Value::Integer(i as i64),
            expires_at: None,
        };
        ks.apply(&op, (i + 1) as u64, 0).unwrap();
    }
    ks
}

fn open_store(temp: &TempDir, retained: usize) -> SnapshotStore {
    SnapshotStore::open(&temp.path().join("snapshots"), retained).unwrap()
}

// =============================================================================
// Capture / Codec Tests
// =============================================================================

#[test]
fn test_capture_skips_expired_entries() {
    let mut ks = keyspace_with(2);
    let temp = Operation::Set {
        key: Bytes::from_static(b"temp"),
        value: Value::from("v"),
        expires_at: Some(50),
    };
    ks.apply(&temp, 3, 0).unwrap();

    let snapshot = Snapshot::capture(&ks, 3, 100);

    assert_eq!(snapshot.sequence, 3);
    assert_eq!(snapshot.entries.len(), 2);
    assert!(snapshot.entries.iter().all(|(k, _)| k.as_ref() != b"temp"));
}

#[test]
fn test_encode_decode_preserves_entries() {
    let ks = keyspace_with(5);
    let snapshot = Snapshot::capture(&ks, 5, 0);

    let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();

    assert_eq!(decoded.sequence, 5);
    assert_eq!(decoded.entries.len(), 5);
    for ((k1, e1), (k2, e2)) in snapshot.entries.iter().zip(decoded.entries.iter()) {
        assert_eq!(k1, k2);
        assert_eq!(e1.value, e2.value);
        assert_eq!(e1.version, e2.version);
    }

    // Sizes are rebuilt when the keyspace is restored
    let restored = decoded.into_keyspace();
    assert_eq!(restored.memory_estimate(), ks.memory_estimate());
}

#[test]
fn test_decode_rejects_flipped_byte() {
    let snapshot = Snapshot::capture(&keyspace_with(3), 3, 0);
    let mut bytes = snapshot.encode().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    assert!(matches!(Snapshot::decode(&bytes), Err(QuillError::Corruption(_))));
}

#[test]
fn test_decode_rejects_bad_magic_and_short_input() {
    let snapshot = Snapshot::capture(&keyspace_with(1), 1, 0);
    let mut bytes = snapshot.encode().unwrap();
    bytes[0] = b'X';

    assert!(matches!(Snapshot::decode(&bytes), Err(QuillError::Corruption(_))));
    assert!(matches!(Snapshot::decode(&[0u8; 10]), Err(QuillError::Corruption(_))));
}

// =============================================================================
// Store Tests
// =============================================================================

#[test]
fn test_store_empty_dir_has_no_snapshot() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp, 2);

    assert!(store.load_latest().unwrap().is_none());
    assert_eq!(store.latest_sequence().unwrap(), None);
}

#[test]
fn test_store_write_and_load_latest() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp, 3);

    store.checkpoint(&keyspace_with(2), 2, 0).unwrap();
    store.checkpoint(&keyspace_with(4), 4, 0).unwrap();

    let latest = store.load_latest().unwrap().unwrap();
    assert_eq!(latest.sequence, 4);
    assert_eq!(latest.entries.len(), 4);
}

#[test]
fn test_store_prunes_to_retained_count() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp, 2);

    for seq in 1..=5 {
        store.checkpoint(&keyspace_with(seq), seq as u64, 0).unwrap();
    }

    let sequences: Vec<u64> = store.list().unwrap().into_iter().map(|(s, _)| s).collect();
    assert_eq!(sequences, vec![4, 5]);
}

#[test]
fn test_store_falls_back_when_newest_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp, 3);

    store.checkpoint(&keyspace_with(2), 2, 0).unwrap();
    let newest = store.write(&Snapshot::capture(&keyspace_with(3), 3, 0)).unwrap();

    let mut bytes = fs::read(&newest).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    fs::write(&newest, bytes).unwrap();

    let loaded = store.load_latest().unwrap().unwrap();
    assert_eq!(loaded.sequence, 2);
}

#[test]
fn test_store_errors_when_every_snapshot_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp, 2);

    let path = store.write(&Snapshot::capture(&keyspace_with(1), 1, 0)).unwrap();
    fs::write(&path, b"garbage").unwrap();

    assert!(matches!(store.load_latest(), Err(QuillError::Corruption(_))));
}

#[test]
fn test_store_open_removes_leftover_temp_files() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("snapshots");
    fs::create_dir_all(&dir).unwrap();
    let leftover = dir.join("snapshot-00000000000000000009.snap.tmp");
    fs::write(&leftover, b"half written").unwrap();

    let store = SnapshotStore::open(&dir, 2).unwrap();

    assert!(!leftover.exists());
    assert!(store.load_latest().unwrap().is_none());
}
