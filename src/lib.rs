//! # vbucketd
//!
//! A single-node, partitioned, multi-bucket key-value server with:
//! - Named buckets, each split into up to 1024 partitions (vbuckets)
//! - A caller-driven partition state machine (dead / active / replica / pending)
//! - Per-scope notification hubs carrying mutations and state changes
//! - Lazily started stats sampling with lock-free snapshot reads
//! - A memcached binary protocol front end and a JSON-shaped admin plane
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │          TCP Server          │   │          Admin API           │
//! │   (memcached binary, vbid)   │   │  (buckets, stats, runtime)   │
//! └──────────────┬───────────────┘   └──────────────┬───────────────┘
//!                └────────────────┬─────────────────┘
//!                                 ▼
//!                  ┌─────────────────────────────┐
//!                  │          Registry           │
//!                  │   name → Arc<Bucket> map    │
//!                  └──────────────┬──────────────┘
//!                                 ▼
//!   ┌────────────┐   ┌─────────────────────────────┐   ┌────────────┐
//!   │   Stats    │◀──│           Bucket            │──▶│   Store    │
//!   │ Collector  │   │  hub ◀── BucketChange       │   │ (log/mem)  │
//!   └────────────┘   └──────────────┬──────────────┘   └────────────┘
//!                                   ▼
//!                  ┌─────────────────────────────┐
//!                  │   Partition 0 .. n-1        │
//!                  │   items + hub ◀── Mutation  │
//!                  └─────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod admin;
pub mod bucket;
pub mod hub;
pub mod network;
pub mod partition;
pub mod protocol;
pub mod registry;
pub mod stats;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use bucket::{Bucket, BucketSettings};
pub use config::{ServerConfig, StatsConfig};
pub use error::{BucketError, Result};
pub use hub::{Event, EventSink, Hub};
pub use partition::{partition_for_key, Item, PartitionState};
pub use registry::Registry;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of vbucketd
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
