//! Configuration for QuillKV
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{QuillError, Result};

/// Main configuration for a QuillKV engine
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Backend Configuration
    // -------------------------------------------------------------------------
    /// Where the engine keeps its state
    pub backend: Backend,

    // -------------------------------------------------------------------------
    // Eviction Configuration
    // -------------------------------------------------------------------------
    /// Ceiling on the estimated memory used by live entries (bytes)
    pub max_memory: Option<usize>,

    /// Ceiling on the number of live keys
    pub max_keys: Option<usize>,

    /// Victim selection policy, fixed for the engine's lifetime
    pub eviction_policy: EvictionPolicy,

    /// Which writes re-check the ceilings
    pub eviction_trigger: EvictionTrigger,

    // -------------------------------------------------------------------------
    // Append Log Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the append log
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Snapshot Configuration
    // -------------------------------------------------------------------------
    /// When to take automatic checkpoints
    pub snapshot_policy: SnapshotPolicy,

    /// Number of snapshot files kept on disk (newest first)
    pub snapshots_retained: usize,
}

/// Storage backend selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Volatile: nothing is written to disk, state is lost on close
    InMemory,

    /// Durable: append log + snapshots under `data_dir`
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── append.log                 (append log)
    ///     └── snapshots/
    ///           └── snapshot-{seq}.snap  (checkpoints)
    File { data_dir: PathBuf },
}

/// Append log sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every record (nothing acknowledged is lost)
    Always,

    /// fsync at most once per second (up to one second of records lost)
    EverySecond,

    /// leave flushing to the OS (loss window unbounded)
    Never,
}

impl SyncStrategy {
    /// Upper bound on how long an acknowledged record may stay unsynced.
    ///
    /// `None` means the window is unbounded (OS-controlled).
    pub fn loss_window(&self) -> Option<Duration> {
        match self {
            SyncStrategy::Always => Some(Duration::ZERO),
            SyncStrategy::EverySecond => Some(Duration::from_secs(1)),
            SyncStrategy::Never => None,
        }
    }
}

/// Eviction victim selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Least recently used
    Lru,

    /// Least frequently used, ties broken by oldest insertion
    Lfu,
}

/// Which writes cause the ceilings to be enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionTrigger {
    /// Writes that create a key or grow an existing one
    Insert,

    /// Every write, including ones that shrink a value or only touch expiry
    AnyWrite,
}

/// Automatic checkpoint policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Checkpoint once this many records were appended since the last one
    pub every_records: Option<u64>,

    /// Checkpoint once this much time passed since the last one
    pub interval: Option<Duration>,
}

impl SnapshotPolicy {
    /// Never checkpoint automatically (explicit `checkpoint()` / `close()` only)
    pub fn manual() -> Self {
        Self {
            every_records: None,
            interval: None,
        }
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            every_records: Some(10_000),
            interval: Some(Duration::from_secs(300)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::File {
                data_dir: PathBuf::from("./quillkv_data"),
            },
            max_memory: None,
            max_keys: None,
            eviction_policy: EvictionPolicy::Lru,
            eviction_trigger: EvictionTrigger::Insert,
            sync_strategy: SyncStrategy::EverySecond,
            snapshot_policy: SnapshotPolicy::default(),
            snapshots_retained: 2,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Config for a volatile engine
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::InMemory,
            ..Self::default()
        }
    }

    /// Data directory, if the backend is file based
    pub fn data_dir(&self) -> Option<&PathBuf> {
        match &self.backend {
            Backend::File { data_dir } => Some(data_dir),
            Backend::InMemory => None,
        }
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.max_keys == Some(0) {
            return Err(QuillError::Config("max_keys must be at least 1".to_string()));
        }
        if self.max_memory == Some(0) {
            return Err(QuillError::Config("max_memory must be non-zero".to_string()));
        }
        if self.snapshots_retained == 0 {
            return Err(QuillError::Config(
                "snapshots_retained must be at least 1".to_string(),
            ));
        }
        if self.snapshot_policy.every_records == Some(0) {
            return Err(QuillError::Config(
                "snapshot every_records must be non-zero".to_string(),
            ));
        }
        if let Backend::File { data_dir } = &self.backend {
            if data_dir.as_os_str().is_empty() {
                return Err(QuillError::Config("data_dir is empty".to_string()));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Use a file backend rooted at `path`
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backend = Backend::File {
            data_dir: path.into(),
        };
        self
    }

    /// Use the volatile in-memory backend
    pub fn in_memory(mut self) -> Self {
        self.config.backend = Backend::InMemory;
        self
    }

    /// Set the backend explicitly
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the memory ceiling (in bytes)
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.config.max_memory = Some(bytes);
        self
    }

    /// Set the key-count ceiling
    pub fn max_keys(mut self, count: usize) -> Self {
        self.config.max_keys = Some(count);
        self
    }

    /// Set the eviction policy
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.config.eviction_policy = policy;
        self
    }

    /// Set which writes enforce the ceilings
    pub fn eviction_trigger(mut self, trigger: EvictionTrigger) -> Self {
        self.config.eviction_trigger = trigger;
        self
    }

    /// Set the append log sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the automatic checkpoint policy
    pub fn snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.config.snapshot_policy = policy;
        self
    }

    /// Set how many snapshot files to keep
    pub fn snapshots_retained(mut self, count: usize) -> Self {
        self.config.snapshots_retained = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// String Parsing (CLI / external config loaders)
// =============================================================================

impl FromStr for SyncStrategy {
    type Err = QuillError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(SyncStrategy::Always),
            "every_second" | "everysec" => Ok(SyncStrategy::EverySecond),
            "never" | "no" => Ok(SyncStrategy::Never),
            other => Err(QuillError::Config(format!("unknown sync strategy: {}", other))),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = QuillError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            other => Err(QuillError::Config(format!("unknown eviction policy: {}", other))),
        }
    }
}

impl FromStr for EvictionTrigger {
    type Err = QuillError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(EvictionTrigger::Insert),
            "any_write" | "anywrite" => Ok(EvictionTrigger::AnyWrite),
            other => Err(QuillError::Config(format!("unknown eviction trigger: {}", other))),
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStrategy::Always => "always",
            SyncStrategy::EverySecond => "every_second",
            SyncStrategy::Never => "never",
        };
        f.write_str(name)
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Lru => f.write_str("lru"),
            EvictionPolicy::Lfu => f.write_str("lfu"),
        }
    }
}

/// Parse a human readable memory size ("100mb", "512kb", "1gb", "4096")
pub fn parse_memory_size(input: &str) -> Result<usize> {
    let s = input.trim().to_ascii_lowercase();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let amount: usize = digits
        .parse()
        .map_err(|_| QuillError::Config(format!("invalid memory size: {}", input)))?;

    let multiplier: usize = match unit.trim() {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        other => {
            return Err(QuillError::Config(format!(
                "invalid memory unit '{}' in {}",
                other, input
            )))
        }
    };

    amount
        .checked_mul(multiplier)
        .ok_or_else(|| QuillError::Config(format!("memory size overflows: {}", input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_size() {
        assert_eq!(parse_memory_size("4096").unwrap(), 4096);
        assert_eq!(parse_memory_size("512kb").unwrap(), 512 * 1024);
        assert_eq!(parse_memory_size("100MB").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_memory_size(" 1gb ").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_memory_size("mb").is_err());
        assert!(parse_memory_size("10tb").is_err());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("lfu".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lfu);
        assert_eq!(
            "every_second".parse::<SyncStrategy>().unwrap(),
            SyncStrategy::EverySecond
        );
        assert_eq!(
            "any_write".parse::<EvictionTrigger>().unwrap(),
            EvictionTrigger::AnyWrite
        );
        assert!("random".parse::<EvictionPolicy>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ceilings() {
        let config = Config::builder().in_memory().max_keys(0).build();
        assert!(config.validate().is_err());

        let config = Config::builder().in_memory().max_keys(10).build();
        assert!(config.validate().is_ok());
    }
}
