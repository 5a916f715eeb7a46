//! Log record definitions
//!
//! Defines the structure of individual append log records.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{QuillError, Result};
use crate::value::{unix_millis, Value};

/// Record header: Sequence (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single record payload; larger lengths are treated as garbage
pub const MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

/// A single record in the append log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Sequence number - global, gap-free, equal to apply order
    pub sequence: u64,

    /// The mutation to apply
    pub operation: Operation,

    /// Timestamp (unix millis) when the record was created.
    ///
    /// Replay evaluates expiry against this timestamp, not the wall clock.
    pub timestamp: u64,
}

/// Mutations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Replace a key's value and expiry
    Set {
        key: Bytes,
        value: Value,
        expires_at: Option<u64>,
    },

    /// Remove a key (also used for evictions)
    Delete { key: Bytes },

    /// Set (Some) or clear (None) a key's expiry
    Expire { key: Bytes, expires_at: Option<u64> },

    /// Add `delta` to a counter
    Increment { key: Bytes, delta: i64 },

    /// Push values onto a list
    ListPush {
        key: Bytes,
        values: Vec<Bytes>,
        front: bool,
    },

    /// Pop one value from a list
    ListPop { key: Bytes, front: bool },

    /// Add members to a set
    SetAdd { key: Bytes, members: Vec<Bytes> },

    /// Remove members from a set
    SetRemove { key: Bytes, members: Vec<Bytes> },

    /// Set one hash field
    HashSet {
        key: Bytes,
        field: Bytes,
        value: Bytes,
    },

    /// Remove hash fields
    HashDelete { key: Bytes, fields: Vec<Bytes> },

    /// Remove every key
    Flush,

    /// A committed transaction or batch: applied as one unit
    Batch { ops: Vec<Operation> },
}

/// Operation kind, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Set,
    Delete,
    Expire,
    Increment,
    ListPush,
    ListPop,
    SetAdd,
    SetRemove,
    HashSet,
    HashDelete,
    Flush,
    Batch,
}

impl Operation {
    /// The key this operation touches (None for Flush / Batch)
    pub fn key(&self) -> Option<&Bytes> {
        match self {
            Operation::Set { key, .. }
            | Operation::Delete { key }
            | Operation::Expire { key, .. }
            | Operation::Increment { key, .. }
            | Operation::ListPush { key, .. }
            | Operation::ListPop { key, .. }
            | Operation::SetAdd { key, .. }
            | Operation::SetRemove { key, .. }
            | Operation::HashSet { key, .. }
            | Operation::HashDelete { key, .. } => Some(key),
            Operation::Flush | Operation::Batch { .. } => None,
        }
    }

    /// Kind of this operation
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Set { .. } => OpKind::Set,
            Operation::Delete { .. } => OpKind::Delete,
            Operation::Expire { .. } => OpKind::Expire,
            Operation::Increment { .. } => OpKind::Increment,
            Operation::ListPush { .. } => OpKind::ListPush,
            Operation::ListPop { .. } => OpKind::ListPop,
            Operation::SetAdd { .. } => OpKind::SetAdd,
            Operation::SetRemove { .. } => OpKind::SetRemove,
            Operation::HashSet { .. } => OpKind::HashSet,
            Operation::HashDelete { .. } => OpKind::HashDelete,
            Operation::Flush => OpKind::Flush,
            Operation::Batch { .. } => OpKind::Batch,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Set => "set",
            OpKind::Delete => "delete",
            OpKind::Expire => "expire",
            OpKind::Increment => "increment",
            OpKind::ListPush => "list_push",
            OpKind::ListPop => "list_pop",
            OpKind::SetAdd => "set_add",
            OpKind::SetRemove => "set_remove",
            OpKind::HashSet => "hash_set",
            OpKind::HashDelete => "hash_delete",
            OpKind::Flush => "flush",
            OpKind::Batch => "batch",
        };
        f.write_str(name)
    }
}

/// Payload part of a record (everything but the sequence)
#[derive(Deserialize)]
struct RecordBody {
    timestamp: u64,
    operation: Operation,
}

/// Borrowed twin of `RecordBody`; identical bincode layout
#[derive(Serialize)]
struct RecordBodyRef<'a> {
    timestamp: u64,
    operation: &'a Operation,
}

/// Encode a record without taking ownership of the operation
pub(crate) fn encode_record(sequence: u64, timestamp: u64, operation: &Operation) -> Result<Vec<u8>> {
    let payload = bincode::serialize(&RecordBodyRef {
        timestamp,
        operation,
    })?;

    if payload.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(QuillError::InvalidArgument(format!(
            "record payload of {} bytes exceeds limit",
            payload.len()
        )));
    }

    let len = payload.len() as u32;
    let crc = compute_crc(sequence, len, &payload);

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

impl LogRecord {
    /// Create a record stamped with the current time
    pub fn new(sequence: u64, operation: Operation) -> Self {
        Self::with_timestamp(sequence, operation, unix_millis())
    }

    /// Create a record with an explicit timestamp
    pub fn with_timestamp(sequence: u64, operation: Operation, timestamp: u64) -> Self {
        Self {
            sequence,
            operation,
            timestamp,
        }
    }

    /// Encode as `[sequence(8)][crc(4)][len(4)][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_record(self.sequence, self.timestamp, &self.operation)
    }

    /// Decode one record from the start of `bytes`
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(QuillError::Corruption(format!(
                "record header truncated: {} of {} bytes",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let header = RecordHeader::parse(&bytes[..HEADER_SIZE]);
        let end = HEADER_SIZE + header.len as usize;
        if header.len > MAX_PAYLOAD_SIZE || bytes.len() < end {
            return Err(QuillError::Corruption(format!(
                "record {} truncated: payload needs {} bytes, {} available",
                header.sequence,
                header.len,
                bytes.len() - HEADER_SIZE
            )));
        }

        Self::from_parts(&header, &bytes[HEADER_SIZE..end])
    }

    /// Verify the checksum and decode the payload
    pub(crate) fn from_parts(header: &RecordHeader, payload: &[u8]) -> Result<Self> {
        let actual = compute_crc(header.sequence, header.len, payload);
        if actual != header.crc {
            return Err(QuillError::Corruption(format!(
                "CRC mismatch in record {}: expected {:08x}, got {:08x}",
                header.sequence, header.crc, actual
            )));
        }

        let body: RecordBody = bincode::deserialize(payload).map_err(|e| {
            QuillError::Corruption(format!(
                "record {} payload unreadable: {}",
                header.sequence, e
            ))
        })?;

        Ok(Self {
            sequence: header.sequence,
            operation: body.operation,
            timestamp: body.timestamp,
        })
    }

    /// Total encoded length of a record with this payload length
    pub fn encoded_len(payload_len: u32) -> u64 {
        HEADER_SIZE as u64 + payload_len as u64
    }
}

/// Fixed-size record header
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub sequence: u64,
    pub crc: u32,
    pub len: u32,
}

impl RecordHeader {
    /// Parse from exactly HEADER_SIZE bytes
    pub(crate) fn parse(bytes: &[u8]) -> Self {
        let mut seq = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        seq.copy_from_slice(&bytes[0..8]);
        crc.copy_from_slice(&bytes[8..12]);
        len.copy_from_slice(&bytes[12..16]);
        Self {
            sequence: u64::from_le_bytes(seq),
            crc: u32::from_le_bytes(crc),
            len: u32::from_le_bytes(len),
        }
    }
}

/// CRC over sequence, length and payload
fn compute_crc(sequence: u64, len: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&sequence.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
