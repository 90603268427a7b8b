//! Admin Module
//!
//! Framework-free control plane. Every operation returns an HTTP-shaped
//! [`AdminResponse`]; any router can mount these without the core knowing
//! about it.
//!
//! ## Routes
//! ```text
//!   GET    /settings                  settings()
//!   GET    /buckets                   list_buckets()
//!   POST   /buckets                   create_bucket(form)   303 → /buckets/{name}
//!   POST   /bucketsRescan             rescan_buckets()      303 → /buckets
//!   GET    /buckets/{name}            get_bucket(name)
//!   DELETE /buckets/{name}            delete_bucket(name)
//!   POST   /buckets/{name}/compact    compact_bucket(name)
//!   POST   /buckets/{name}/flushDirty flush_bucket(name)
//!   GET    /buckets/{name}/stats      bucket_stats(name)
//!   GET    /runtime                   runtime()
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::bucket::{validate_bucket_name, Bucket, SettingsOverrides};
use crate::config::ServerConfig;
use crate::error::BucketError;
use crate::registry::Registry;

pub const STATUS_OK: u16 = 200;
pub const STATUS_SEE_OTHER: u16 = 303;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// HTTP-shaped result of an admin operation
#[derive(Debug, Clone, PartialEq)]
pub struct AdminResponse {
    pub status: u16,
    /// Redirect target for 303 responses
    pub location: Option<String>,
    pub body: Value,
}

impl AdminResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: STATUS_OK,
            location: None,
            body,
        }
    }

    pub fn see_other(location: impl Into<String>) -> Self {
        Self {
            status: STATUS_SEE_OTHER,
            location: Some(location.into()),
            body: Value::Null,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            location: None,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Raw form fields of a create request
///
/// Numeric fields arrive as text; values that do not parse fall back to the
/// process defaults.
#[derive(Debug, Clone, Default)]
pub struct CreateBucketForm {
    pub name: Option<String>,
    pub password: Option<String>,
    pub quota_bytes: Option<String>,
    pub memory_only: Option<String>,
}

impl CreateBucketForm {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            quota_bytes: self
                .quota_bytes
                .as_deref()
                .and_then(|v| v.trim().parse().ok()),
            memory_only: self
                .memory_only
                .as_deref()
                .and_then(|v| v.trim().parse().ok()),
            password_hash: self.password.clone().filter(|p| !p.is_empty()),
        }
    }
}

/// Control plane over a registry
pub struct AdminApi {
    registry: Arc<Registry>,
    config: ServerConfig,
    started: SystemTime,
}

impl AdminApi {
    pub fn new(registry: Arc<Registry>, config: ServerConfig) -> Self {
        Self {
            registry,
            config,
            started: SystemTime::now(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    // =========================================================================
    // Process
    // =========================================================================

    /// Server configuration with secrets removed
    pub fn settings(&self) -> AdminResponse {
        to_response(&self.config.settings_view())
    }

    pub fn runtime(&self) -> AdminResponse {
        let start_millis = self
            .started
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let uptime_secs = self.started.elapsed().map(|d| d.as_secs()).unwrap_or(0);
        let num_cpu = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        AdminResponse::ok(json!({
            "startTime": start_millis,
            "uptimeSecs": uptime_secs,
            "version": crate::VERSION,
            "arch": std::env::consts::ARCH,
            "os": std::env::consts::OS,
            "numCPU": num_cpu,
            "buckets": self.registry.len(),
        }))
    }

    // =========================================================================
    // Buckets
    // =========================================================================

    pub fn list_buckets(&self) -> AdminResponse {
        AdminResponse::ok(json!(self.registry.names()))
    }

    pub fn create_bucket(&self, form: &CreateBucketForm) -> AdminResponse {
        // Validated as sent; padding is not stripped
        let name = match form.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => {
                return AdminResponse::error(
                    STATUS_BAD_REQUEST,
                    "bucket name is too short or is missing",
                )
            }
        };
        if let Err(e) = validate_bucket_name(name) {
            return AdminResponse::error(STATUS_BAD_REQUEST, e.to_string());
        }

        match self.registry.create_with(name, &form.overrides()) {
            Ok(_) => AdminResponse::see_other(format!("/buckets/{name}")),
            Err(e) => AdminResponse::error(
                STATUS_INTERNAL_ERROR,
                format!("create bucket error; name: {name}, err: {e}"),
            ),
        }
    }

    /// Close and reopen buckets to match the data directory
    pub fn rescan_buckets(&self) -> AdminResponse {
        match self.registry.load(true) {
            Ok(_) => AdminResponse::see_other("/buckets"),
            Err(e) => AdminResponse::error(
                STATUS_INTERNAL_ERROR,
                format!("rescanning/reloading buckets directory err: {e}"),
            ),
        }
    }

    pub fn get_bucket(&self, name: &str) -> AdminResponse {
        match self.lookup(name) {
            Ok(bucket) => to_response(&bucket.detail()),
            Err(response) => response,
        }
    }

    /// Close a bucket with a final flush; its files stay on disk
    pub fn delete_bucket(&self, name: &str) -> AdminResponse {
        match self.registry.close(name, true) {
            Ok(true) => AdminResponse::ok(Value::Null),
            Ok(false) => not_found(name),
            Err(e) => AdminResponse::error(
                STATUS_INTERNAL_ERROR,
                format!("error closing bucket: {name}, err: {e}"),
            ),
        }
    }

    pub fn compact_bucket(&self, name: &str) -> AdminResponse {
        let bucket = match self.lookup(name) {
            Ok(bucket) => bucket,
            Err(response) => return response,
        };
        match bucket.compact() {
            Ok(()) => AdminResponse::ok(Value::Null),
            Err(e) => AdminResponse::error(
                STATUS_INTERNAL_ERROR,
                format!("error compacting bucket: {name}, err: {e}"),
            ),
        }
    }

    pub fn flush_bucket(&self, name: &str) -> AdminResponse {
        let bucket = match self.lookup(name) {
            Ok(bucket) => bucket,
            Err(response) => return response,
        };
        match bucket.flush() {
            Ok(items) => AdminResponse::ok(json!({ "itemsFlushed": items })),
            Err(e) => AdminResponse::error(
                STATUS_INTERNAL_ERROR,
                format!("error flushing bucket: {name}, err: {e}"),
            ),
        }
    }

    /// Flat stats map, refreshed first if the snapshot is stale
    ///
    /// A stale read starts the sampler and waits out the grace period so the
    /// first sample can land.
    pub fn bucket_stats(&self, name: &str) -> AdminResponse {
        let bucket = match self.lookup(name) {
            Ok(bucket) => bucket,
            Err(response) => return response,
        };

        let stats = &self.config.stats;
        let mut snapshot = bucket.snapshot_stats();
        if snapshot.is_stale(stats.staleness) {
            if let Err(e) = bucket.start_stats(stats.sample_interval) {
                return AdminResponse::error(
                    STATUS_INTERNAL_ERROR,
                    format!("error starting stats for bucket: {name}, err: {e}"),
                );
            }
            thread::sleep(stats.refresh_grace);
            snapshot = bucket.snapshot_stats();
        }
        AdminResponse::ok(json!(snapshot.to_map()))
    }

    fn lookup(&self, name: &str) -> Result<Arc<Bucket>, AdminResponse> {
        self.registry.get(name).map_err(|e| match e {
            BucketError::NotFound { .. } => not_found(name),
            other => AdminResponse::error(STATUS_INTERNAL_ERROR, other.to_string()),
        })
    }
}

fn not_found(name: &str) -> AdminResponse {
    AdminResponse::error(STATUS_NOT_FOUND, format!("no bucket: {name}"))
}

fn to_response<T: serde::Serialize>(value: &T) -> AdminResponse {
    match serde_json::to_value(value) {
        Ok(body) => AdminResponse::ok(body),
        Err(e) => AdminResponse::error(STATUS_INTERNAL_ERROR, e.to_string()),
    }
}
