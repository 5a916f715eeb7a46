//! Append Log Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append a record for every mutation before it is applied
//! - CRC32 checksums for corruption detection
//! - Global sequence numbers for ordering (and key versions)
//! - Crash recovery and replay, dropping a torn tail
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Record 1                                     │
//! │ ┌─────────┬─────────┬─────────┬────────────┐ │
//! │ │ Seq (8) │ CRC (4) │ Len (4) │ Payload    │ │
//! │ └─────────┴─────────┴─────────┴────────────┘ │
//! ├──────────────────────────────────────────────┤
//! │ Record 2                                     │
//! │ ┌─────────┬─────────┬─────────┬────────────┐ │
//! │ │ Seq (8) │ CRC (4) │ Len (4) │ Payload    │ │
//! │ └─────────┴─────────┴─────────┴────────────┘ │
//! └──────────────────────────────────────────────┘
//! ```
//! Payload is bincode of `{ timestamp, operation }`. The CRC covers the
//! sequence, length and payload bytes. All integers are little-endian.

mod entry;
mod log;
mod reader;
mod recovery;
mod writer;

pub use entry::{LogRecord, OpKind, Operation, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use log::AppendLog;
pub use reader::{WalIterator, WalReader};
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;
