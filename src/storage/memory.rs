//! Memory-only bucket store
//!
//! Used for buckets that persist nothing. Flushes and compactions succeed
//! trivially and nothing is ever reloaded.

use std::path::Path;

use crate::error::Result;

use super::record::{Record, StoredBucket};
use super::BucketStore;

#[derive(Debug, Default)]
pub struct MemoryStore;

impl MemoryStore {
    pub fn new() -> Self {
        Self
    }
}

impl BucketStore for MemoryStore {
    fn load(&self) -> Result<StoredBucket> {
        Ok(StoredBucket::default())
    }

    fn append(&self, _records: &[Record]) -> Result<()> {
        Ok(())
    }

    fn compact(&self) -> Result<()> {
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        None
    }
}
