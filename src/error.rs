//! Error types for vbucketd
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::partition::PartitionState;

/// Result type alias using BucketError
pub type Result<T> = std::result::Result<T, BucketError>;

/// Unified error type for vbucketd operations
#[derive(Debug, Error)]
pub enum BucketError {
    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("invalid bucket name {name:?}: must match ^[A-Za-z0-9_-]+$")]
    InvalidName { name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("partition {id} out of range: bucket has {num_partitions} partitions")]
    PartitionOutOfRange { id: u16, num_partitions: u16 },

    // -------------------------------------------------------------------------
    // Partition Errors
    // -------------------------------------------------------------------------
    #[error("partition {id} is {state}, operation not allowed")]
    NotMyPartition { id: u16, state: PartitionState },

    #[error("cas mismatch: expected {expected}, found {actual}")]
    CasMismatch { expected: u64, actual: u64 },

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compaction failed for bucket {bucket}: {source}")]
    Compaction {
        bucket: String,
        #[source]
        source: Box<BucketError>,
    },

    #[error("bucket log corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("stale configuration: expected revision {expected}, current is {actual}")]
    StaleConfiguration { expected: u64, actual: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BucketError {
    pub fn bucket_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "bucket",
            name: name.to_string(),
        }
    }

    pub fn partition_not_found(id: u16) -> Self {
        Self::NotFound {
            kind: "partition",
            name: id.to_string(),
        }
    }

    pub fn key_not_found(key: &[u8]) -> Self {
        Self::NotFound {
            kind: "key",
            name: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// True when the error reports a missing item rather than a missing container
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::NotFound { kind: "key", .. })
    }
}

impl From<bincode::Error> for BucketError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
