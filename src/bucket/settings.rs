//! Bucket settings
//!
//! Copied into every bucket at creation and persisted with it (unless the
//! bucket is fully memory-only).

use serde::{Deserialize, Serialize};

use crate::error::{BucketError, Result};
use crate::partition::MAX_PARTITIONS;

/// Items and metadata are persisted
pub const MEMORY_ONLY_NONE: u8 = 0;
/// Only metadata (settings, partition states) is persisted
pub const MEMORY_ONLY_META: u8 = 1;
/// Nothing is persisted and the bucket has no directory
pub const MEMORY_ONLY_ALL: u8 = 2;

/// Per-bucket configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSettings {
    /// Soft memory quota reported to clients (bytes)
    pub quota_bytes: u64,

    /// Persistence level, see `MEMORY_ONLY_*`
    pub memory_only: u8,

    /// Never exposed through `safe_view`
    pub password_hash: String,

    /// Number of addressable partitions, 1..=1024
    pub num_partitions: u16,
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            quota_bytes: 100 * 1024 * 1024, // 100 MB
            memory_only: MEMORY_ONLY_NONE,
            password_hash: String::new(),
            num_partitions: MAX_PARTITIONS,
        }
    }
}

/// Externally visible settings (password removed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSettingsView {
    pub quota_bytes: u64,
    pub memory_only: u8,
    pub num_partitions: u16,
}

/// Per-bucket overrides applied on top of the process defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub quota_bytes: Option<u64>,
    pub memory_only: Option<u8>,
    pub password_hash: Option<String>,
}

impl BucketSettings {
    pub fn safe_view(&self) -> BucketSettingsView {
        BucketSettingsView {
            quota_bytes: self.quota_bytes,
            memory_only: self.memory_only,
            num_partitions: self.num_partitions,
        }
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<()> {
        if self.num_partitions == 0 || self.num_partitions > MAX_PARTITIONS {
            return Err(BucketError::Config(format!(
                "numPartitions must be within 1..={}, got {}",
                MAX_PARTITIONS, self.num_partitions
            )));
        }
        if self.memory_only > MEMORY_ONLY_ALL {
            return Err(BucketError::Config(format!(
                "memoryOnly must be within 0..={}, got {}",
                MEMORY_ONLY_ALL, self.memory_only
            )));
        }
        Ok(())
    }

    /// Copy of these settings with the given overrides applied
    pub fn with_overrides(&self, overrides: &SettingsOverrides) -> Self {
        let mut settings = self.clone();
        if let Some(quota) = overrides.quota_bytes {
            settings.quota_bytes = quota;
        }
        if let Some(level) = overrides.memory_only {
            settings.memory_only = level;
        }
        if let Some(hash) = &overrides.password_hash {
            settings.password_hash = hash.clone();
        }
        settings
    }

    /// Whether settings and partition states reach the store
    pub fn persists_metadata(&self) -> bool {
        self.memory_only < MEMORY_ONLY_ALL
    }

    /// Whether items reach the store
    pub fn persists_items(&self) -> bool {
        self.memory_only == MEMORY_ONLY_NONE
    }
}

/// Check a bucket name against `^[A-Za-z0-9_-]+$`
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(BucketError::InvalidName {
            name: name.to_string(),
        })
    }
}

