//! Error types for QuillKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::txn::TransactionStatus;
use crate::value::ValueKind;

/// Result type alias using QuillError
pub type Result<T> = std::result::Result<T, QuillError>;

/// Unified error type for QuillKV operations
#[derive(Debug, Error)]
pub enum QuillError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Value Model Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    NotFound,

    #[error("Type mismatch: operation expects {expected}, key holds {found}")]
    TypeMismatch { expected: ValueKind, found: ValueKind },

    #[error("Value is not an integer or is out of range")]
    NotAnInteger,

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("Transaction conflict on key '{key}'")]
    Conflict { key: String },

    #[error("Transaction {id} is not active ({status:?})")]
    TransactionClosed { id: u64, status: TransactionStatus },

    // -------------------------------------------------------------------------
    // Persistence Errors
    // -------------------------------------------------------------------------
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Engine is degraded: writes are refused until persistence recovers")]
    Degraded,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration / Argument Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl QuillError {
    /// Build a conflict error for a (possibly non-UTF-8) key
    pub fn conflict(key: &[u8]) -> Self {
        QuillError::Conflict {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// True when the caller may simply retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, QuillError::Conflict { .. })
    }
}

impl From<bincode::Error> for QuillError {
    fn from(err: bincode::Error) -> Self {
        QuillError::Serialization(err.to_string())
    }
}
