//! Configuration for vbucketd
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::bucket::{BucketSettings, BucketSettingsView};
use crate::hub::DEFAULT_MAILBOX_CAPACITY;

/// Main configuration for a vbucketd server process
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory holding one directory per bucket
    /// Internal structure:
    ///   {data_dir}/
    ///     └── {name}-bucket/
    ///           └── bucket.log
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Bucket Configuration
    // -------------------------------------------------------------------------
    /// Bucket every connection starts on
    pub default_bucket_name: String,

    /// Settings copied into every newly created bucket
    pub bucket_settings: BucketSettings,

    /// Mailbox size of every hub sink
    pub hub_capacity: usize,

    /// Stats sampling and staleness
    pub stats: StatsConfig,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address for the binary protocol
    pub bind_addr: String,

    /// Directory of static admin assets, if any
    pub static_path: Option<PathBuf>,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------
    pub verbose: bool,
}

/// Stats snapshot timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsConfig {
    /// Snapshots older than this trigger a refresh on read
    pub staleness: Duration,

    /// Period of the sampler once started
    pub sample_interval: Duration,

    /// How long a reader waits for a freshly started sampler
    pub refresh_grace: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(30),
            sample_interval: Duration::from_secs(1),
            refresh_grace: Duration::from_millis(2100),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            default_bucket_name: "default".to_string(),
            bucket_settings: BucketSettings::default(),
            hub_capacity: DEFAULT_MAILBOX_CAPACITY,
            stats: StatsConfig::default(),
            bind_addr: "0.0.0.0:11211".to_string(),
            static_path: None,
            max_connections: 1024,
            read_timeout_ms: 0, // no timeout; memcached clients idle freely
            write_timeout_ms: 5000,
            verbose: false,
        }
    }
}

/// Externally visible configuration (bucket password removed)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub addr: String,
    pub data: String,
    pub static_path: Option<String>,
    pub default_bucket_name: String,
    pub bucket_settings: BucketSettingsView,
    pub verbose: bool,
}

impl ServerConfig {
    /// Create a new config builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn settings_view(&self) -> SettingsView {
        SettingsView {
            addr: self.bind_addr.clone(),
            data: self.data_dir.display().to_string(),
            static_path: self
                .static_path
                .as_ref()
                .map(|p| p.display().to_string()),
            default_bucket_name: self.default_bucket_name.clone(),
            bucket_settings: self.bucket_settings.safe_view(),
            verbose: self.verbose,
        }
    }

    /// `None` when the read timeout is disabled
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the data directory (root for all buckets)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn default_bucket_name(mut self, name: impl Into<String>) -> Self {
        self.config.default_bucket_name = name.into();
        self
    }

    /// Set the settings new buckets start from
    pub fn bucket_settings(mut self, settings: BucketSettings) -> Self {
        self.config.bucket_settings = settings;
        self
    }

    /// Set the mailbox capacity of every hub sink
    pub fn hub_capacity(mut self, capacity: usize) -> Self {
        self.config.hub_capacity = capacity;
        self
    }

    pub fn stats(mut self, stats: StatsConfig) -> Self {
        self.config.stats = stats;
        self
    }

    /// Set the TCP listen address
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    pub fn static_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.static_path = Some(path.into());
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds, 0 disables it)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds, 0 disables it)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
