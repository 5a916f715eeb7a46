//! Engine Module
//!
//! The facade that composes the value model, append log, snapshots,
//! eviction, transactions and change notification.
//!
//! ## Responsibilities
//! - Route typed operations to the key space
//! - Log every mutation before it is applied
//! - Lazy expiry on access, inline eviction after inserts
//! - Crash recovery on startup, automatic checkpoints
//! - Emit one change event per committed mutation, in commit order

mod flusher;
mod txn;
mod typed;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};

use crate::config::{Backend, Config, SyncStrategy};
use crate::error::{QuillError, Result};
use crate::eviction::EvictionManager;
use crate::notify::{ChangeEvent, ChangeKind, HookId, Notifier, Subscription};
use crate::pattern::GlobPattern;
use crate::snapshot::SnapshotStore;
use crate::value::{unix_millis, Applied, Entry, KeyEffect, Keyspace, Reply, Value};
use crate::wal::{AppendLog, Operation, RecoveryResult, WalRecovery};

use flusher::Flusher;

/// The main storage engine
///
/// ## Concurrency Model: one commit region
///
/// - Every operation, read or write, runs under the `state` mutex. Reads
///   need it too: lazy expiry and LRU/LFU bookkeeping mutate state.
/// - Writes go: state lock → log lock → key space. Sequence assignment
///   happens under both, so log order equals apply order.
/// - Transaction commits validate and apply under the same lock, so no
///   commit can observe another one half-applied.
/// - The background flusher only takes the log lock.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Key space, eviction tracking and listeners (the commit region)
    state: Mutex<EngineState>,

    /// Append log (shared with the flusher thread)
    log: Arc<Mutex<AppendLog>>,

    /// Snapshot files (file backend only)
    snapshots: Option<SnapshotStore>,

    /// Set after a failed durable write; writes are refused while set
    degraded: Arc<AtomicBool>,

    counters: Counters,

    next_txn_id: AtomicU64,

    /// What happened during `open`
    recovery: RecoveryReport,

    /// Periodic log sync for `SyncStrategy::EverySecond`
    flusher: Option<Flusher>,
}

/// State guarded by the commit region
struct EngineState {
    keyspace: Keyspace,
    eviction: EvictionManager,
    notifier: Notifier,

    /// Sequence covered by the newest snapshot
    snapshot_sequence: u64,

    /// Records appended since the newest snapshot
    records_since_snapshot: u64,

    last_checkpoint: Instant,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
    aborts: AtomicU64,
    checkpoint_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Live keys
    pub keys: usize,

    /// Estimated bytes used by stored entries
    pub memory_usage: usize,

    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evicted: u64,
    pub commits: u64,
    pub conflicts: u64,
    pub aborts: u64,

    /// Automatic checkpoints that failed to write a snapshot
    pub checkpoint_failures: u64,

    /// Sequence of the newest log record
    pub last_sequence: u64,

    /// Sequence covered by the newest snapshot
    pub snapshot_sequence: u64,

    /// Records not yet fsynced
    pub unsynced_records: usize,

    pub degraded: bool,

    /// Registered hooks plus live subscriptions
    pub listeners: usize,
}

/// Summary of crash recovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Sequence of the snapshot that was loaded
    pub snapshot_sequence: Option<u64>,

    /// Keys restored from the snapshot
    pub snapshot_keys: usize,

    /// Log records applied on top of the snapshot
    pub records_replayed: u64,

    /// Log records already covered by the snapshot
    pub records_skipped: u64,

    /// Unreadable records dropped from the log tail
    pub records_dropped: u64,

    /// Bytes cut from the log tail
    pub dropped_bytes: u64,

    /// Records missing between the snapshot and the first log record
    pub missing_records: u64,

    /// Sequence the engine resumed from
    pub last_sequence: u64,

    /// Keys found already expired after recovery
    pub expired_on_load: usize,

    /// Keys evicted to fit the configured ceilings after recovery
    pub evicted_on_load: usize,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LOG_FILENAME: &'static str = "append.log";
    const SNAPSHOT_DIR: &'static str = "snapshots";

    /// Open or create an engine with the given config
    ///
    /// On startup (file backend):
    /// 1. Load the newest readable snapshot
    /// 2. Replay log records after its sequence, dropping a torn tail
    /// 3. Drop keys that expired while the engine was down
    /// 4. Rebuild eviction tracking and enforce the ceilings
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let (keyspace, log, snapshots, recovery) = match &config.backend {
            Backend::InMemory => (
                Keyspace::new(),
                AppendLog::volatile(),
                None,
                RecoveryReport::default(),
            ),
            Backend::File { data_dir } => Self::recover(&config, data_dir)?,
        };

        let mut state = EngineState {
            keyspace,
            eviction: EvictionManager::from_config(&config),
            notifier: Notifier::new(),
            snapshot_sequence: recovery.snapshot_sequence.unwrap_or(0),
            records_since_snapshot: recovery.records_replayed,
            last_checkpoint: Instant::now(),
        };

        let now = unix_millis();
        let mut recovery = recovery;

        // Expired keys are dropped without a log record; replay reaches the
        // same state by comparing expiry with record timestamps.
        for key in state.keyspace.expired_keys(now) {
            state.keyspace.remove(&key);
            recovery.expired_on_load += 1;
        }

        // Oldest version first approximates the recency order before the crash
        let mut seeded: Vec<(Bytes, u64, usize)> = state
            .keyspace
            .iter()
            .map(|(key, entry)| (key.clone(), entry.version, entry.size_estimate()))
            .collect();
        seeded.sort_by_key(|(_, version, _)| *version);
        for (key, _, size) in seeded {
            state.eviction.on_insert(&key, size);
        }

        let is_durable = log.is_durable();
        let mut engine = Self {
            state: Mutex::new(state),
            log: Arc::new(Mutex::new(log)),
            snapshots,
            degraded: Arc::new(AtomicBool::new(false)),
            counters: Counters::default(),
            next_txn_id: AtomicU64::new(1),
            recovery,
            flusher: None,
            config,
        };

        let evicted = {
            let mut state = engine.state.lock();
            engine.evict_until_within(&mut state, now)?
        };
        engine.recovery.evicted_on_load = evicted;

        if is_durable && engine.config.sync_strategy == SyncStrategy::EverySecond {
            engine.flusher = Some(Flusher::start(
                Arc::clone(&engine.log),
                Arc::clone(&engine.degraded),
                Duration::from_secs(1),
            )?);
        }

        tracing::info!(
            "Engine open: {} keys, last sequence {}, backend {}",
            engine.state.lock().keyspace.len(),
            engine.log.lock().last_sequence(),
            if is_durable { "file" } else { "in-memory" }
        );

        Ok(engine)
    }

    /// Open a file-backed engine in `path` with default settings
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Open a volatile engine with default settings
    pub fn in_memory() -> Result<Self> {
        Self::open(Config::in_memory())
    }

    /// Final checkpoint and sync, then shut down
    pub fn close(mut self) -> Result<()> {
        if let Some(mut flusher) = self.flusher.take() {
            flusher.stop();
        }

        {
            let mut state = self.state.lock();
            self.checkpoint_locked(&mut state)?;
        }
        self.log.lock().sync()?;

        tracing::info!("Engine closed");
        Ok(())
    }

    fn recover(
        config: &Config,
        data_dir: &Path,
    ) -> Result<(Keyspace, AppendLog, Option<SnapshotStore>, RecoveryReport)> {
        fs::create_dir_all(data_dir)?;

        let store = SnapshotStore::open(
            &data_dir.join(Self::SNAPSHOT_DIR),
            config.snapshots_retained,
        )?;

        let mut report = RecoveryReport::default();
        let mut keyspace = match store.load_latest()? {
            Some(snapshot) => {
                tracing::info!(
                    "Loaded snapshot at sequence {} ({} keys)",
                    snapshot.sequence,
                    snapshot.entries.len()
                );
                report.snapshot_sequence = Some(snapshot.sequence);
                report.snapshot_keys = snapshot.entries.len();
                snapshot.into_keyspace()
            }
            None => Keyspace::new(),
        };
        let snapshot_sequence = report.snapshot_sequence.unwrap_or(0);

        let log_path = data_dir.join(Self::LOG_FILENAME);
        let mut first_replayed = None;
        let result = if log_path.exists() {
            WalRecovery::replay(&log_path, snapshot_sequence, |record| {
                first_replayed.get_or_insert(record.sequence);
                keyspace.replay(&record).map_err(|e| {
                    QuillError::Corruption(format!(
                        "record {} ({}) cannot be applied: {}",
                        record.sequence,
                        record.operation.kind(),
                        e
                    ))
                })
            })?
        } else {
            RecoveryResult::default()
        };

        if let Some(first) = first_replayed {
            if first > snapshot_sequence + 1 {
                report.missing_records = first - snapshot_sequence - 1;
                tracing::warn!(
                    "Log resumes at sequence {} but snapshot covers only {}: {} records missing",
                    first,
                    snapshot_sequence,
                    report.missing_records
                );
            }
        }

        report.records_replayed = result.records_recovered;
        report.records_skipped = result.records_skipped;
        report.records_dropped = result.records_corrupted;
        report.dropped_bytes = result.dropped_bytes;
        report.last_sequence = snapshot_sequence.max(result.last_sequence);

        tracing::info!(
            "Recovery: snapshot {:?}, {} records replayed, {} skipped, {} dropped",
            report.snapshot_sequence,
            report.records_replayed,
            report.records_skipped,
            report.records_dropped
        );

        let log = AppendLog::durable(&log_path, config.sync_strategy, report.last_sequence)?;
        Ok((keyspace, log, Some(store), report))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a key's value (None if absent or expired)
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Value>> {
        Ok(self.read(key.as_ref(), |entry| entry.value.clone()))
    }

    /// Get a key's full entry; `NotFound` if absent or expired
    pub fn get_entry(&self, key: impl AsRef<[u8]>) -> Result<Entry> {
        self.read(key.as_ref(), Entry::clone)
            .ok_or(QuillError::NotFound)
    }

    /// True if the key exists and has not expired
    pub fn exists(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.read(key.as_ref(), |_| ()).is_some())
    }

    /// Remaining time to live; `None` when the key never expires.
    /// `NotFound` if the key is absent.
    pub fn ttl(&self, key: impl AsRef<[u8]>) -> Result<Option<Duration>> {
        let now = unix_millis();
        self.read(key.as_ref(), |entry| entry.ttl_at(now))
            .ok_or(QuillError::NotFound)
    }

    /// Current version of a key (0 if absent or expired)
    pub fn version(&self, key: impl AsRef<[u8]>) -> Result<u64> {
        Ok(self.read(key.as_ref(), |entry| entry.version).unwrap_or(0))
    }

    /// Live keys matching a glob pattern, sorted
    pub fn keys(&self, pattern: &str) -> Result<Vec<Bytes>> {
        let pattern = GlobPattern::new(pattern);
        let state = self.state.lock();
        let now = unix_millis();
        let mut keys: Vec<Bytes> = state
            .keyspace
            .iter()
            .filter(|(key, entry)| !entry.is_expired_at(now) && pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        let now = unix_millis();
        state
            .keyspace
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated bytes used by stored entries
    pub fn memory_usage(&self) -> usize {
        self.state.lock().eviction.memory_usage()
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Register a hook called synchronously after every committed mutation.
    ///
    /// Hooks run inside the commit region and must not call the engine.
    pub fn on_change<F>(&self, hook: F) -> HookId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.state.lock().notifier.add_hook(Box::new(hook))
    }

    /// Remove a hook. Returns true if it was registered.
    pub fn remove_hook(&self, id: HookId) -> bool {
        self.state.lock().notifier.remove_hook(id)
    }

    /// Subscribe to change events, optionally only for keys matching `pattern`
    pub fn subscribe(&self, pattern: Option<&str>) -> Subscription {
        self.state
            .lock()
            .notifier
            .subscribe(pattern.map(GlobPattern::new))
    }

    /// Cancel a subscription. Returns true if it was active.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.state.lock().notifier.unsubscribe(subscription.id())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Write a snapshot of the current state and truncate the log.
    ///
    /// Returns the snapshot's sequence, or `None` for the in-memory backend.
    pub fn checkpoint(&self) -> Result<Option<u64>> {
        let mut state = self.state.lock();
        self.checkpoint_locked(&mut state)
    }

    /// Force the append log to disk
    pub fn sync(&self) -> Result<()> {
        let result = self.log.lock().sync();
        if let Err(e) = &result {
            self.enter_degraded(e);
        }
        result
    }

    /// Remove every expired key now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.state.lock();
        let now = unix_millis();
        let expired = state.keyspace.expired_keys(now);
        let mut removed = 0;
        for key in expired {
            if self.expire_key(&mut state, &key, now) {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!("Purged {} expired keys", removed);
        }
        removed
    }

    /// True after a failed durable write, until `resume_writes` succeeds
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Re-sync the log and accept writes again if that works
    pub fn resume_writes(&self) -> Result<()> {
        let _state = self.state.lock();
        self.log.lock().sync()?;
        if self.degraded.swap(false, Ordering::AcqRel) {
            tracing::warn!("Append log healthy again; accepting writes");
        }
        Ok(())
    }

    /// Current statistics
    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        let log = self.log.lock();
        let now = unix_millis();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        EngineStats {
            keys: state
                .keyspace
                .iter()
                .filter(|(_, entry)| !entry.is_expired_at(now))
                .count(),
            memory_usage: state.eviction.memory_usage(),
            hits: load(&self.counters.hits),
            misses: load(&self.counters.misses),
            expired: load(&self.counters.expired),
            evicted: load(&self.counters.evicted),
            commits: load(&self.counters.commits),
            conflicts: load(&self.counters.conflicts),
            aborts: load(&self.counters.aborts),
            checkpoint_failures: load(&self.counters.checkpoint_failures),
            last_sequence: log.last_sequence(),
            snapshot_sequence: state.snapshot_sequence,
            unsynced_records: log.unsynced_count(),
            degraded: self.is_degraded(),
            listeners: state.notifier.listener_count(),
        }
    }

    /// What happened during `open`
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path of the append log (file backend only)
    pub fn log_path(&self) -> Option<PathBuf> {
        self.config
            .data_dir()
            .map(|dir| dir.join(Self::LOG_FILENAME))
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Take the commit region, refusing if the engine is degraded
    fn lock_writable(&self) -> Result<MutexGuard<'_, EngineState>> {
        let state = self.state.lock();
        if self.is_degraded() {
            return Err(QuillError::Degraded);
        }
        Ok(state)
    }

    /// Run one operation: check, append, apply, track, evict, maybe checkpoint.
    ///
    /// Returns the reply and the record's sequence (`None` for a no-op).
    fn execute(&self, op: Operation, now: u64) -> Result<(Reply, Option<u64>)> {
        let mut state = self.lock_writable()?;

        if let Some(key) = op.key() {
            self.expire_key(&mut state, key, now);
        }

        if let Some(reply) = state.keyspace.check(&op, now)? {
            return Ok((reply, None));
        }

        let sequence = self.append(&mut state, &op, now)?;
        let applied = state.keyspace.apply(&op, sequence, now)?;
        let grew = self.record_applied(&mut state, &op, &applied, sequence);

        self.enforce_limits(&mut state, grew, now);
        self.maybe_checkpoint(&mut state);
        Ok((applied.reply, Some(sequence)))
    }

    /// Log already-checked operations as one record and apply them.
    ///
    /// Returns the record's sequence, or `None` when `ops` is empty.
    fn apply_batch(
        &self,
        state: &mut EngineState,
        mut ops: Vec<Operation>,
        now: u64,
    ) -> Result<Option<u64>> {
        let record = match ops.len() {
            0 => return Ok(None),
            1 => ops.remove(0),
            _ => Operation::Batch { ops },
        };

        let sequence = self.append(state, &record, now)?;
        let applied_ops = match &record {
            Operation::Batch { ops } => ops.as_slice(),
            single => std::slice::from_ref(single),
        };

        let mut grew = false;
        for op in applied_ops {
            let applied = state.keyspace.apply(op, sequence, now)?;
            grew |= self.record_applied(state, op, &applied, sequence);
        }

        self.enforce_limits(state, grew, now);
        self.maybe_checkpoint(state);
        Ok(Some(sequence))
    }

    /// Append one record; a persistence failure puts the engine in degraded mode
    fn append(&self, state: &mut EngineState, op: &Operation, now: u64) -> Result<u64> {
        let result = self.log.lock().append(op, now);
        match result {
            Ok(sequence) => {
                state.records_since_snapshot += 1;
                Ok(sequence)
            }
            Err(e) => {
                if matches!(e, QuillError::Persistence(_)) {
                    self.enter_degraded(&e);
                }
                Err(e)
            }
        }
    }

    fn enter_degraded(&self, cause: &QuillError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::error!(
                "Durable write failed, refusing writes until resume_writes(): {}",
                cause
            );
        }
    }

    /// Update eviction tracking and notify listeners. Returns true if a key
    /// was created or grew.
    fn record_applied(
        &self,
        state: &mut EngineState,
        op: &Operation,
        applied: &Applied,
        sequence: u64,
    ) -> bool {
        let key = op.key();
        let grew = match (applied.effect, key) {
            (KeyEffect::Created { size }, Some(key)) => {
                state.eviction.on_insert(key, size);
                true
            }
            (KeyEffect::Updated { size }, Some(key)) => state.eviction.on_update(key, size),
            (KeyEffect::Removed, Some(key)) => {
                state.eviction.on_remove(key);
                false
            }
            (KeyEffect::Flushed { .. }, _) => {
                state.eviction.clear();
                false
            }
            _ => false,
        };

        if applied.effect != KeyEffect::Unchanged {
            if let Some(kind) = ChangeKind::for_operation(op) {
                let key = key.cloned().unwrap_or_default();
                state
                    .notifier
                    .emit(ChangeEvent::new(key, kind, Some(sequence)));
            }
        }

        grew
    }

    /// Physically remove `key` if it expired. Not logged.
    fn expire_key(&self, state: &mut EngineState, key: &[u8], now: u64) -> bool {
        if !state.keyspace.expire_if_due(key, now) {
            return false;
        }
        state.eviction.on_remove(key);
        Counters::bump(&self.counters.expired);
        state.notifier.emit(ChangeEvent::new(
            Bytes::copy_from_slice(key),
            ChangeKind::Expired,
            None,
        ));
        true
    }

    /// Evict after a write whose record is already logged and applied.
    ///
    /// A failed eviction append leaves the write in place; the engine is
    /// already degraded by then, so the error is only logged.
    fn enforce_limits(&self, state: &mut EngineState, grew: bool, now: u64) {
        if !state.eviction.should_enforce(grew) {
            return;
        }
        if let Err(e) = self.evict_until_within(state, now) {
            tracing::error!("Eviction failed, keeping the logged write: {}", e);
        }
    }

    /// Evict victims until both ceilings hold. Each eviction is logged as a
    /// delete; victims that already expired are dropped without a record.
    fn evict_until_within(&self, state: &mut EngineState, now: u64) -> Result<usize> {
        let mut evicted = 0;

        while state.eviction.over_limit() {
            let Some(victim) = state.eviction.select_victim() else {
                break;
            };

            let expired = state
                .keyspace
                .get(&victim)
                .map(|entry| entry.is_expired_at(now))
                .unwrap_or(true);
            if expired {
                if !self.expire_key(state, &victim, now) {
                    state.eviction.on_remove(&victim);
                }
                continue;
            }

            let op = Operation::Delete {
                key: victim.clone(),
            };
            let sequence = self.append(state, &op, now)?;
            state.keyspace.remove(&victim);
            state.eviction.on_remove(&victim);
            Counters::bump(&self.counters.evicted);
            evicted += 1;

            tracing::debug!(
                "Evicted '{}' ({:?} policy, {} bytes in use)",
                String::from_utf8_lossy(&victim),
                state.eviction.policy(),
                state.eviction.memory_usage()
            );
            state
                .notifier
                .emit(ChangeEvent::new(victim, ChangeKind::Evicted, Some(sequence)));
        }

        Ok(evicted)
    }

    fn maybe_checkpoint(&self, state: &mut EngineState) {
        if self.snapshots.is_none() {
            return;
        }

        let policy = self.config.snapshot_policy;
        let by_records = policy
            .every_records
            .map(|every| state.records_since_snapshot >= every)
            .unwrap_or(false);
        let by_time = policy
            .interval
            .map(|interval| {
                state.records_since_snapshot > 0 && state.last_checkpoint.elapsed() >= interval
            })
            .unwrap_or(false);

        if by_records || by_time {
            if let Err(e) = self.checkpoint_locked(state) {
                Counters::bump(&self.counters.checkpoint_failures);
                tracing::warn!("Automatic checkpoint failed: {}", e);
            }
        }
    }

    fn checkpoint_locked(&self, state: &mut EngineState) -> Result<Option<u64>> {
        let Some(store) = &self.snapshots else {
            return Ok(None);
        };

        let mut log = self.log.lock();
        let sequence = log.last_sequence();

        if sequence == state.snapshot_sequence && state.records_since_snapshot == 0 {
            return Ok(Some(sequence));
        }

        let now = unix_millis();
        store.checkpoint(&state.keyspace, sequence, now)?;

        // Records up to `sequence` are covered; replay skips them even if
        // the truncate below does not happen.
        if let Err(e) = log.truncate() {
            tracing::warn!(
                "Snapshot at {} written but log truncate failed: {}",
                sequence,
                e
            );
        }

        state.snapshot_sequence = sequence;
        state.records_since_snapshot = 0;
        state.last_checkpoint = Instant::now();

        tracing::info!(
            "Checkpoint at sequence {} ({} keys)",
            sequence,
            state.keyspace.len()
        );
        Ok(Some(sequence))
    }

    // =========================================================================
    // Read Helpers
    // =========================================================================

    /// Look up a live entry, expiring it first if due, and map it
    fn read<T>(&self, key: &[u8], f: impl FnOnce(&Entry) -> T) -> Option<T> {
        let mut state = self.state.lock();
        let now = unix_millis();
        self.expire_key(&mut state, key, now);

        let result = state.keyspace.get(key).map(f);
        if result.is_some() {
            Counters::bump(&self.counters.hits);
            state.eviction.on_access(key);
        } else {
            Counters::bump(&self.counters.misses);
        }
        result
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(mut flusher) = self.flusher.take() {
            flusher.stop();
        }
        if let Err(e) = self.log.lock().sync() {
            tracing::warn!("Final log sync failed: {}", e);
        }
    }
}
