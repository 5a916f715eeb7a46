//! QuillKV CLI
//!
//! Opens a data directory directly and runs one command against it.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use quillkv::config::parse_memory_size;
use quillkv::wal::WalRecovery;
use quillkv::{Config, Engine, EvictionPolicy, SyncStrategy, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// QuillKV CLI
#[derive(Parser, Debug)]
#[command(name = "quillkv-cli")]
#[command(about = "Inspect and edit a QuillKV data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./quillkv_data")]
    data_dir: PathBuf,

    /// Sync strategy (always, every_second, never)
    #[arg(long, default_value = "always")]
    sync: SyncStrategy,

    /// Memory ceiling, e.g. "64mb"
    #[arg(long)]
    max_memory: Option<String>,

    /// Key-count ceiling
    #[arg(long)]
    max_keys: Option<usize>,

    /// Eviction policy (lru, lfu)
    #[arg(long, default_value = "lru")]
    policy: EvictionPolicy,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get { key: String },

    /// Set a string value
    Set {
        key: String,
        value: String,

        /// Expire after this many seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Delete a key
    Del { key: String },

    /// Add to a counter
    Incr {
        key: String,
        #[arg(default_value = "1", allow_hyphen_values = true)]
        delta: i64,
    },

    /// Append values to a list
    Lpush { key: String, values: Vec<String> },

    /// Print a list range (negative indices count from the end)
    Lrange {
        key: String,
        #[arg(default_value = "0", allow_hyphen_values = true)]
        start: i64,
        #[arg(default_value = "-1", allow_hyphen_values = true)]
        end: i64,
    },

    /// Add members to a set
    Sadd { key: String, members: Vec<String> },

    /// Print set members
    Smembers { key: String },

    /// Set a hash field
    Hset { key: String, field: String, value: String },

    /// Get a hash field
    Hget { key: String, field: String },

    /// List keys matching a glob pattern
    Keys {
        #[arg(default_value = "*")]
        pattern: String,
    },

    /// Remaining time to live of a key
    Ttl { key: String },

    /// Write a snapshot and truncate the log
    Checkpoint,

    /// Print engine statistics
    Stats,

    /// Check the append log without opening the engine
    VerifyLog,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,quillkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> quillkv::Result<()> {
    match args.command {
        Commands::VerifyLog => verify_log(&args.data_dir.join("append.log")),
        _ => {
            let engine = open_engine(&args)?;
            execute(&engine, args.command)?;
            engine.close()
        }
    }
}

/// Check an append log file and print what recovery would find
fn verify_log(path: &Path) -> quillkv::Result<()> {
    let result = WalRecovery::verify(path)?;
    println!("records:        {}", result.records_recovered);
    println!("last sequence:  {}", result.last_sequence);
    println!("valid bytes:    {}", result.valid_len);
    println!("trailing bytes: {}", result.dropped_bytes);
    if let Some(corruption) = result.corruption {
        println!("corruption:     {}", corruption);
    }
    Ok(())
}

fn open_engine(args: &Args) -> quillkv::Result<Engine> {
    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .sync_strategy(args.sync)
        .eviction_policy(args.policy);
    if let Some(size) = &args.max_memory {
        builder = builder.max_memory(parse_memory_size(size)?);
    }
    if let Some(count) = args.max_keys {
        builder = builder.max_keys(count);
    }

    Engine::open(builder.build())
}

fn execute(engine: &Engine, command: Commands) -> quillkv::Result<()> {
    match command {
        Commands::Get { key } => match engine.get(&key)? {
            Some(value) => println!("{}", render(&value)),
            None => println!("(nil)"),
        },
        Commands::Set { key, value, ttl } => {
            let version = engine.put(&key, value, ttl.map(Duration::from_secs))?;
            println!("OK (version {})", version);
        }
        Commands::Del { key } => println!("{}", u8::from(engine.delete(&key)?)),
        Commands::Incr { key, delta } => println!("{}", engine.increment(&key, delta)?),
        Commands::Lpush { key, values } => {
            println!("{}", engine.list_push_all(&key, values, false)?)
        }
        Commands::Lrange { key, start, end } => {
            for item in engine.list_range(&key, start, end)? {
                println!("{}", lossy(&item));
            }
        }
        Commands::Sadd { key, members } => println!("{}", engine.set_add(&key, members)?),
        Commands::Smembers { key } => {
            for member in engine.set_members(&key)? {
                println!("{}", lossy(&member));
            }
        }
        Commands::Hset { key, field, value } => {
            println!("{}", u8::from(engine.hash_set(&key, field, value)?))
        }
        Commands::Hget { key, field } => match engine.hash_get(&key, &field)? {
            Some(value) => println!("{}", lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Keys { pattern } => {
            for key in engine.keys(&pattern)? {
                println!("{}", lossy(&key));
            }
        }
        Commands::Ttl { key } => match engine.ttl(&key)? {
            Some(ttl) => println!("{:.3}s", ttl.as_secs_f64()),
            None => println!("no expiry"),
        },
        Commands::Checkpoint => match engine.checkpoint()? {
            Some(sequence) => println!("snapshot at sequence {}", sequence),
            None => println!("nothing to checkpoint"),
        },
        Commands::Stats => {
            let stats = engine.stats();
            println!("keys:              {}", stats.keys);
            println!("memory usage:      {}", stats.memory_usage);
            println!("last sequence:     {}", stats.last_sequence);
            println!("snapshot sequence: {}", stats.snapshot_sequence);
            println!("unsynced records:  {}", stats.unsynced_records);
            println!("degraded:          {}", stats.degraded);
            println!("checkpoint fails:  {}", stats.checkpoint_failures);
            let report = engine.recovery_report();
            println!("replayed on open:  {}", report.records_replayed);
            println!("dropped on open:   {}", report.records_dropped);
        }
        Commands::VerifyLog => {
            if let Some(path) = engine.log_path() {
                verify_log(&path)?;
            }
        }
    }
    Ok(())
}

fn lossy(bytes: &Bytes) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => lossy(s),
        Value::Integer(n) => n.to_string(),
        Value::List(items) => join(items.iter()),
        Value::Set(members) => join(members.iter()),
        Value::Hash(fields) => fields
            .iter()
            .map(|(f, v)| format!("{}={}", lossy(f), lossy(v)))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn join<'a>(items: impl Iterator<Item = &'a Bytes>) -> String {
    items.map(lossy).collect::<Vec<_>>().join(" ")
}
