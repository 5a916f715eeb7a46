//! Tests for the append log
//!
//! These tests verify:
//! - Sequence assignment and continuation across reopen
//! - Reading records back in order
//! - Recovery from torn tails and corrupted records
//! - Verify mode (report only, file untouched)

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use quillkv::config::SyncStrategy;
use quillkv::wal::{AppendLog, LogRecord, Operation, WalReader, WalRecovery, WalWriter, HEADER_SIZE};
use quillkv::QuillError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_log() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("append.log");
    (temp_dir, log_path)
}

fn set_op(key: &str, value: &str) -> Operation {
    Operation::Set {
        key: Bytes::copy_from_slice(key.as_bytes()),
        value: value.into(),
        expires_at: None,
    }
}

/// Write records using WalWriter (produces a well-formed log)
fn write_records_via_writer(path: &Path, count: usize) {
    let mut writer = WalWriter::open(path, SyncStrategy::Always).unwrap();
    for i in 0..count {
        writer
            .append(set_op(&format!("key{}", i), &format!("value{}", i)))
            .unwrap();
    }
}

/// Write raw serialized records directly to a file (for crafting corruption)
fn write_raw(path: &Path, chunks: &[Vec<u8>]) {
    let mut file = File::create(path).unwrap();
    for chunk in chunks {
        file.write_all(chunk).unwrap();
    }
    file.sync_all().unwrap();
}

fn encoded(sequence: u64, key: &str) -> Vec<u8> {
    LogRecord::with_timestamp(sequence, set_op(key, "v"), 1_000)
        .serialize()
        .unwrap()
}

// =============================================================================
// Writer Tests
// =============================================================================

#[test]
fn test_sequences_start_at_one_and_increase() {
    let (_temp, log_path) = setup_temp_log();
    let mut writer = WalWriter::open(&log_path, SyncStrategy::Always).unwrap();

    assert_eq!(writer.append(set_op("a", "1")).unwrap(), 1);
    assert_eq!(writer.append(set_op("b", "2")).unwrap(), 2);
    assert_eq!(
        writer
            .append(Operation::Delete { key: Bytes::from_static(b"a") })
            .unwrap(),
        3
    );
    assert_eq!(writer.current_sequence(), 4);
    assert_eq!(writer.last_sequence(), 3);
}

#[test]
fn test_sequence_continues_after_reopen() {
    let (_temp, log_path) = setup_temp_log();
    write_records_via_writer(&log_path, 5);

    let mut writer = WalWriter::open(&log_path, SyncStrategy::Always).unwrap();
    assert_eq!(writer.last_sequence(), 5);
    assert_eq!(writer.append(set_op("next", "v")).unwrap(), 6);
}

#[test]
fn test_open_after_floor_skips_ahead() {
    let (_temp, log_path) = setup_temp_log();

    let mut writer = WalWriter::open_after(&log_path, SyncStrategy::Always, 100).unwrap();
    assert_eq!(writer.append(set_op("a", "1")).unwrap(), 101);
}

#[test]
fn test_truncate_keeps_counting() {
    let (_temp, log_path) = setup_temp_log();
    let mut writer = WalWriter::open(&log_path, SyncStrategy::Always).unwrap();

    writer.append(set_op("a", "1")).unwrap();
    writer.append(set_op("b", "2")).unwrap();
    writer.truncate().unwrap();

    assert!(writer.is_empty());
    assert_eq!(std::fs::metadata(&log_path).unwrap().len(), 0);
    assert_eq!(writer.append(set_op("c", "3")).unwrap(), 3);
}

#[test]
fn test_never_strategy_leaves_records_unsynced() {
    let (_temp, log_path) = setup_temp_log();
    let mut writer = WalWriter::open(&log_path, SyncStrategy::Never).unwrap();

    writer.append(set_op("a", "1")).unwrap();
    writer.append(set_op("b", "2")).unwrap();
    assert_eq!(writer.uncommitted_count(), 2);
    assert!(!writer.sync_if_due().unwrap());

    writer.sync().unwrap();
    assert_eq!(writer.uncommitted_count(), 0);
}

#[test]
fn test_always_strategy_syncs_each_record() {
    let (_temp, log_path) = setup_temp_log();
    let mut writer = WalWriter::open(&log_path, SyncStrategy::Always).unwrap();

    writer.append(set_op("a", "1")).unwrap();
    assert_eq!(writer.uncommitted_count(), 0);
}

#[test]
fn test_open_cuts_torn_tail_before_appending() {
    let (_temp, log_path) = setup_temp_log();
    write_records_via_writer(&log_path, 2);
    let good_len = std::fs::metadata(&log_path).unwrap().len();

    let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
    file.write_all(&[0xAB; 7]).unwrap();
    drop(file);

    let mut writer = WalWriter::open(&log_path, SyncStrategy::Always).unwrap();
    assert_eq!(writer.len(), good_len);
    assert_eq!(writer.append(set_op("c", "3")).unwrap(), 3);
    drop(writer);

    let (records, result) = WalRecovery::recover(&log_path).unwrap();
    assert_eq!(records.len(), 3);
    assert!(!result.was_truncated);
}

// =============================================================================
// Reader Tests
// =============================================================================

#[test]
fn test_reader_returns_records_in_order() {
    let (_temp, log_path) = setup_temp_log();
    write_records_via_writer(&log_path, 10);

    let records: Vec<LogRecord> = WalReader::open(&log_path)
        .unwrap()
        .records()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(records.len(), 10);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.sequence, (i + 1) as u64);
        assert_eq!(record.operation, set_op(&format!("key{}", i), &format!("value{}", i)));
    }
}

#[test]
fn test_reader_replay_from_skips_covered_records() {
    let (_temp, log_path) = setup_temp_log();
    write_records_via_writer(&log_path, 6);

    let mut iter = WalReader::open(&log_path).unwrap().replay_from(4);
    let sequences: Vec<u64> = iter.by_ref().map(|r| r.unwrap().sequence).collect();

    assert_eq!(sequences, vec![5, 6]);
    assert_eq!(iter.skipped(), 4);
    assert!(!iter.hit_corruption());
}

#[test]
fn test_reader_empty_file() {
    let (_temp, log_path) = setup_temp_log();
    File::create(&log_path).unwrap();

    let mut reader = WalReader::open(&log_path).unwrap();
    assert!(reader.next_record().unwrap().is_none());
}

#[test]
fn test_reader_stops_after_first_error() {
    let (_temp, log_path) = setup_temp_log();
    let mut bad = encoded(2, "b");
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    write_raw(&log_path, &[encoded(1, "a"), bad, encoded(3, "c")]);

    let items: Vec<_> = WalReader::open(&log_path).unwrap().records().collect();

    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(items[1], Err(QuillError::Corruption(_))));
}

#[test]
fn test_reader_rejects_backwards_sequence() {
    let (_temp, log_path) = setup_temp_log();
    write_raw(&log_path, &[encoded(5, "a"), encoded(3, "b")]);

    let mut reader = WalReader::open(&log_path).unwrap();
    assert_eq!(reader.next_record().unwrap().unwrap().sequence, 5);
    assert!(matches!(reader.next_record(), Err(QuillError::Corruption(_))));
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recover_clean_log() {
    let (_temp, log_path) = setup_temp_log();
    write_records_via_writer(&log_path, 10);

    let (records, result) = WalRecovery::recover(&log_path).unwrap();

    assert_eq!(records.len(), 10);
    assert_eq!(result.records_recovered, 10);
    assert_eq!(result.records_corrupted, 0);
    assert_eq!(result.last_sequence, 10);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_partial_header_at_tail() {
    let (_temp, log_path) = setup_temp_log();
    write_raw(&log_path, &[encoded(1, "k"), vec![0u8; HEADER_SIZE / 2]]);

    let (records, result) = WalRecovery::recover(&log_path).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(result.last_sequence, 1);
    assert!(result.was_truncated);
    assert_eq!(result.dropped_bytes, (HEADER_SIZE / 2) as u64);

    // The tail is cut off on disk
    let len = std::fs::metadata(&log_path).unwrap().len();
    assert_eq!(len, encoded(1, "k").len() as u64);
}

#[test]
fn test_recover_partial_payload_at_tail() {
    let (_temp, log_path) = setup_temp_log();
    let mut torn = encoded(2, "k2");
    torn.truncate(HEADER_SIZE + 4);
    write_raw(&log_path, &[encoded(1, "k1"), torn]);

    let (records, result) = WalRecovery::recover(&log_path).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(result.records_corrupted, 1);
    assert!(result.was_truncated);
}

#[test]
fn test_recover_corrupt_middle_record_drops_rest() {
    let (_temp, log_path) = setup_temp_log();
    let mut bad = encoded(2, "k2");
    bad[HEADER_SIZE + 2] ^= 0xFF;
    write_raw(&log_path, &[encoded(1, "k1"), bad, encoded(3, "k3")]);

    let (records, result) = WalRecovery::recover(&log_path).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(result.last_sequence, 1);
    assert_eq!(result.records_corrupted, 1);
    assert!(result.corruption.is_some());
}

#[test]
fn test_recover_corruption_at_first_record() {
    let (_temp, log_path) = setup_temp_log();
    let mut bytes = encoded(1, "k");
    bytes[HEADER_SIZE + 1] ^= 0xFF;
    write_raw(&log_path, &[bytes]);

    let (records, result) = WalRecovery::recover(&log_path).unwrap();

    assert!(records.is_empty());
    assert_eq!(result.last_sequence, 0);
    assert!(result.was_truncated);
    assert_eq!(std::fs::metadata(&log_path).unwrap().len(), 0);
}

#[test]
fn test_replay_from_reports_skipped() {
    let (_temp, log_path) = setup_temp_log();
    write_records_via_writer(&log_path, 5);

    let mut seen = Vec::new();
    let result = WalRecovery::replay(&log_path, 3, |record| {
        seen.push(record.sequence);
        Ok(())
    })
    .unwrap();

    assert_eq!(seen, vec![4, 5]);
    assert_eq!(result.records_skipped, 3);
    assert_eq!(result.last_sequence, 5);
}

#[test]
fn test_replay_callback_error_propagates() {
    let (_temp, log_path) = setup_temp_log();
    write_records_via_writer(&log_path, 3);

    let result = WalRecovery::replay(&log_path, 0, |record| {
        if record.sequence == 2 {
            Err(QuillError::Corruption("refused".to_string()))
        } else {
            Ok(())
        }
    });

    assert!(matches!(result, Err(QuillError::Corruption(_))));
}

#[test]
fn test_verify_leaves_file_untouched() {
    let (_temp, log_path) = setup_temp_log();
    write_raw(&log_path, &[encoded(1, "k"), vec![0u8; 5]]);
    let before = std::fs::metadata(&log_path).unwrap().len();

    let result = WalRecovery::verify(&log_path).unwrap();

    assert_eq!(result.records_recovered, 1);
    assert!(result.was_truncated);
    assert_eq!(std::fs::metadata(&log_path).unwrap().len(), before);
}

#[test]
fn test_recover_and_verify_agree() {
    let (_temp, log_path) = setup_temp_log();
    write_records_via_writer(&log_path, 20);

    let verify_result = WalRecovery::verify(&log_path).unwrap();
    let (records, recover_result) = WalRecovery::recover(&log_path).unwrap();

    assert_eq!(records.len() as u64, recover_result.records_recovered);
    assert_eq!(recover_result.records_recovered, verify_result.records_recovered);
    assert_eq!(recover_result.last_sequence, verify_result.last_sequence);
    assert_eq!(recover_result.was_truncated, verify_result.was_truncated);
}

// =============================================================================
// AppendLog Tests
// =============================================================================

#[test]
fn test_volatile_log_assigns_sequences_only() {
    let mut log = AppendLog::volatile();

    assert_eq!(log.append(&set_op("a", "1"), 0).unwrap(), 1);
    assert_eq!(log.append(&set_op("b", "2"), 0).unwrap(), 2);
    assert_eq!(log.last_sequence(), 2);
    assert!(!log.is_durable());
    assert_eq!(log.replay(0).unwrap().count(), 0);
}

#[test]
fn test_durable_log_replays_its_records() {
    let (_temp, log_path) = setup_temp_log();
    let mut log = AppendLog::durable(&log_path, SyncStrategy::Always, 0).unwrap();

    log.append(&set_op("a", "1"), 10).unwrap();
    log.append(&set_op("b", "2"), 20).unwrap();

    let timestamps: Vec<u64> = log.replay(0).unwrap().map(|r| r.unwrap().timestamp).collect();
    assert_eq!(timestamps, vec![10, 20]);
}
