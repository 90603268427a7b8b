//! vbucketd Server Binary
//!
//! Opens the bucket registry and serves the binary protocol.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use vbucketd::bucket::BucketSettings;
use vbucketd::hub::{MutationLogger, SinkRef};
use vbucketd::network::Server;
use vbucketd::{Registry, ServerConfig};

/// vbucketd Server
#[derive(Parser, Debug)]
#[command(name = "vbucketd-server")]
#[command(about = "Partitioned multi-bucket key-value server")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "0.0.0.0:11211")]
    bind: String,

    /// Data directory
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// Directory of static admin assets
    #[arg(long)]
    static_path: Option<PathBuf>,

    /// Bucket connections start on
    #[arg(long, default_value = "default")]
    default_bucket_name: String,

    /// Quota of newly created buckets in bytes
    #[arg(long, default_value = "104857600")]
    default_quota_bytes: u64,

    /// Persistence of new buckets: 0 everything, 1 metadata only, 2 nothing
    #[arg(long, default_value = "0")]
    default_memory_only: u8,

    /// Partitions per new bucket (1..=1024)
    #[arg(long, default_value = "1024")]
    default_num_partitions: u16,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize tracing/logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vbucketd=debug"))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("vbucketd Server v{}", vbucketd::VERSION);
    tracing::info!("Data directory: {}", args.data.display());
    tracing::info!("Listen address: {}", args.bind);

    // Build config from args
    let mut builder = ServerConfig::builder()
        .bind_addr(&args.bind)
        .data_dir(&args.data)
        .default_bucket_name(&args.default_bucket_name)
        .bucket_settings(BucketSettings {
            quota_bytes: args.default_quota_bytes,
            memory_only: args.default_memory_only,
            password_hash: String::new(),
            num_partitions: args.default_num_partitions,
        })
        .max_connections(args.max_connections)
        .verbose(args.verbose);
    if let Some(path) = &args.static_path {
        builder = builder.static_path(path);
    }
    let config = builder.build();

    // Open registry with the mutation log attached to every bucket
    let logger: SinkRef = MutationLogger::new();
    let registry = match Registry::open(&config, vec![logger]) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!("Failed to open registry: {}", e);
            std::process::exit(1);
        }
    };

    if !registry.contains(&config.default_bucket_name) {
        if let Err(e) = registry.create(&config.default_bucket_name, config.bucket_settings.clone()) {
            tracing::error!("Failed to create default bucket: {}", e);
            std::process::exit(1);
        }
    }

    tracing::info!(buckets = ?registry.names(), "Registry initialized successfully");

    let mut server = Server::new(config, Arc::clone(&registry));

    // Set up Ctrl+C handler
    let shutdown = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, initiating shutdown...");
        shutdown.shutdown();
    }) {
        tracing::warn!("Failed to install Ctrl+C handler: {}", e);
    }

    // Start server
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        let _ = registry.shutdown();
        std::process::exit(1);
    }

    if let Err(e) = registry.shutdown() {
        tracing::error!("Flush on shutdown failed: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
