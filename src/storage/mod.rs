//! Storage Module
//!
//! Pluggable persistence behind a bucket.
//!
//! ## Responsibilities
//! - Make flushed changes durable before `append` returns
//! - Reclaim space on `compact` without losing data on failure
//! - Replay persisted state when a bucket is reopened
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── default-bucket/
//!   │     └── bucket.log
//!   └── {name}-bucket/
//!         └── bucket.log
//! ```
//!
//! ## Log Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2 ...                            │
//! └─────────────────────────────────────────┘
//! ```
//! `Data` is a bincode-encoded [`Record`]; the CRC covers `Data` only.

mod file_store;
mod memory;
mod record;

use std::path::{Path, PathBuf};

use crate::bucket::BucketSettings;
use crate::error::Result;

pub use file_store::FileStore;
pub use memory::MemoryStore;
pub use record::{
    encode_record, Record, RecordReader, StoredBucket, StoredPartition, HEADER_SIZE,
    MAX_RECORD_SIZE,
};

/// Suffix marking a bucket directory inside the data directory
pub const BUCKET_DIR_SUFFIX: &str = "-bucket";

/// Persistence backend of a single bucket
pub trait BucketStore: Send + Sync {
    /// Replay everything persisted so far
    fn load(&self) -> Result<StoredBucket>;

    /// Durably append records; on success all of them survive a crash
    fn append(&self, records: &[Record]) -> Result<()>;

    /// Reclaim space held by superseded records
    fn compact(&self) -> Result<()>;

    /// Directory backing this store, if any
    fn location(&self) -> Option<&Path>;
}

/// Directory holding a bucket's files
pub fn bucket_dir(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(format!("{name}{BUCKET_DIR_SUFFIX}"))
}

/// Bucket name encoded in a bucket directory path
/// "default-bucket" → Some("default")
pub fn bucket_name_from_dir(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let bucket = name.strip_suffix(BUCKET_DIR_SUFFIX)?;
    (!bucket.is_empty()).then(|| bucket.to_string())
}

/// Pick the store matching a bucket's persistence level
pub fn open_store(
    data_dir: &Path,
    name: &str,
    settings: &BucketSettings,
) -> Result<Box<dyn BucketStore>> {
    if settings.persists_metadata() {
        Ok(Box::new(FileStore::open(&bucket_dir(data_dir, name))?))
    } else {
        Ok(Box::new(MemoryStore::new()))
    }
}
