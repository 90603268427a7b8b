//! Registry Module
//!
//! The process-wide directory of open buckets.
//!
//! ## Responsibilities
//! - Create, open and close buckets by name
//! - Discover buckets persisted under the data directory
//! - Hand the configured observer sinks to every bucket it opens
//!
//! ## Locking
//! ```text
//!   create / close / load / shutdown ──▶ lifecycle (Mutex, submission order)
//!   get / names ──────────────────────▶ buckets (RwLock, never held across I/O)
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::bucket::{
    validate_bucket_name, Bucket, BucketSettings, SettingsOverrides, MEMORY_ONLY_NONE,
};
use crate::config::ServerConfig;
use crate::error::{BucketError, Result};
use crate::hub::SinkRef;
use crate::storage::{bucket_name_from_dir, open_store, BucketStore, FileStore};

/// Outcome of a directory scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Buckets opened because their directory appeared
    pub added: Vec<String>,
    /// Buckets closed because their directory vanished
    pub dropped: Vec<String>,
}

/// Name → bucket directory over one data directory
pub struct Registry {
    data_dir: PathBuf,
    defaults: BucketSettings,
    hub_capacity: usize,
    observers: Vec<SinkRef>,
    buckets: RwLock<BTreeMap<String, Arc<Bucket>>>,
    lifecycle: Mutex<()>,
}

impl Registry {
    /// Open the registry and every bucket already under the data directory
    pub fn open(config: &ServerConfig, observers: Vec<SinkRef>) -> Result<Self> {
        config.bucket_settings.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let registry = Self {
            data_dir: config.data_dir.clone(),
            defaults: config.bucket_settings.clone(),
            hub_capacity: config.hub_capacity,
            observers,
            buckets: RwLock::new(BTreeMap::new()),
            lifecycle: Mutex::new(()),
        };
        let report = registry.load(false)?;

        tracing::info!(
            data_dir = %registry.data_dir.display(),
            buckets = report.added.len(),
            "registry opened"
        );
        Ok(registry)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a bucket with explicit settings
    ///
    /// If a directory for `name` already exists its contents are reused.
    pub fn create(&self, name: &str, settings: BucketSettings) -> Result<Arc<Bucket>> {
        validate_bucket_name(name)?;
        settings.validate()?;

        let _lifecycle = self.lifecycle.lock();
        if self.buckets.read().contains_key(name) {
            return Err(BucketError::AlreadyExists {
                kind: "bucket",
                name: name.to_string(),
            });
        }

        let store = open_store(&self.data_dir, name, &settings)?;
        let bucket = Bucket::open(name, settings, store, &self.observers, self.hub_capacity)?;

        // Persist settings and partition 0 right away so a rescan finds them
        if let Err(e) = bucket.flush() {
            let _ = bucket.close(false);
            return Err(e);
        }

        self.buckets
            .write()
            .insert(name.to_string(), Arc::clone(&bucket));
        tracing::info!(bucket = %name, "bucket created");
        Ok(bucket)
    }

    /// Create a bucket from the process defaults plus `overrides`
    pub fn create_with(&self, name: &str, overrides: &SettingsOverrides) -> Result<Arc<Bucket>> {
        self.create(name, self.defaults.with_overrides(overrides))
    }

    /// Close a bucket and forget it
    ///
    /// Returns `Ok(false)` if no such bucket is open. The bucket is removed
    /// even when its final flush fails; that failure is returned.
    pub fn close(&self, name: &str, flush: bool) -> Result<bool> {
        let _lifecycle = self.lifecycle.lock();
        let Some(bucket) = self.buckets.write().remove(name) else {
            return Ok(false);
        };
        bucket.close(flush)?;
        Ok(true)
    }

    /// Close every bucket with a flush, returning the first failure
    pub fn shutdown(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let buckets = std::mem::take(&mut *self.buckets.write());

        let mut first_error = None;
        for (name, bucket) in buckets {
            if let Err(e) = bucket.close(true) {
                tracing::warn!(bucket = %name, "flush on shutdown failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        tracing::info!("registry shut down");
        first_error.map_or(Ok(()), Err)
    }

    /// Scan the data directory for bucket directories
    ///
    /// Newly discovered buckets are opened. With `rescan`, open file-backed
    /// buckets whose directory disappeared are closed without a flush.
    pub fn load(&self, rescan: bool) -> Result<LoadReport> {
        let _lifecycle = self.lifecycle.lock();
        let found = self.scan_dir()?;
        let mut report = LoadReport::default();

        for (name, dir) in &found {
            if self.buckets.read().contains_key(name) {
                continue;
            }
            match self.open_existing(name, dir) {
                Ok(bucket) => {
                    self.buckets.write().insert(name.clone(), bucket);
                    report.added.push(name.clone());
                }
                Err(e) => {
                    tracing::warn!(bucket = %name, dir = %dir.display(), "failed to load bucket: {}", e);
                }
            }
        }

        if rescan {
            let vanished: Vec<String> = self
                .buckets
                .read()
                .iter()
                .filter(|(name, bucket)| {
                    bucket.store_location().is_some() && !found.contains_key(name.as_str())
                })
                .map(|(name, _)| name.clone())
                .collect();

            for name in vanished {
                let Some(bucket) = self.buckets.write().remove(&name) else {
                    continue;
                };
                if let Err(e) = bucket.close(false) {
                    tracing::warn!(bucket = %name, "close of vanished bucket failed: {}", e);
                }
                report.dropped.push(name);
            }
        }

        if !report.added.is_empty() || !report.dropped.is_empty() {
            tracing::info!(
                added = ?report.added,
                dropped = ?report.dropped,
                rescan,
                "bucket directory scanned"
            );
        }
        Ok(report)
    }

    fn scan_dir(&self) -> Result<BTreeMap<String, PathBuf>> {
        let mut found = BTreeMap::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = bucket_name_from_dir(&path) else {
                continue;
            };
            if validate_bucket_name(&name).is_ok() {
                found.insert(name, path);
            }
        }
        Ok(found)
    }

    fn open_existing(&self, name: &str, dir: &Path) -> Result<Arc<Bucket>> {
        let store: Box<dyn BucketStore> = Box::new(FileStore::open(dir)?);

        // A directory on disk implies at least metadata persistence
        let mut settings = self.defaults.clone();
        if !settings.persists_metadata() {
            settings.memory_only = MEMORY_ONLY_NONE;
        }
        Bucket::open(name, settings, store, &self.observers, self.hub_capacity)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn get(&self, name: &str) -> Result<Arc<Bucket>> {
        self.buckets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BucketError::bucket_not_found(name))
    }

    /// Sorted names of the open buckets
    pub fn names(&self) -> Vec<String> {
        self.buckets.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buckets.read().contains_key(name)
    }

    /// Settings new buckets start from
    pub fn default_settings(&self) -> &BucketSettings {
        &self.defaults
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let buckets = std::mem::take(&mut *self.buckets.write());
        for (name, bucket) in buckets {
            if let Err(e) = bucket.close(false) {
                tracing::warn!(bucket = %name, "close on drop failed: {}", e);
            }
        }
    }
}

