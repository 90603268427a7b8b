//! Partition Module
//!
//! A partition (vbucket) is an independently-stateful shard of a bucket's
//! keyspace.
//!
//! ## State Machine
//! ```text
//!            set_state(..)            set_state(..)
//!   dead ──────────────────▶ any ──────────────────▶ any
//! ```
//! Transitions are caller-driven only. Every transition emits a
//! `BucketChange` on the bucket hub; entering `active` also bridges every
//! bucket-hub sink onto the partition hub.
//!
//! | State   | client reads/writes | replicated writes |
//! |---------|---------------------|-------------------|
//! | dead    | no                  | no                |
//! | active  | yes                 | no                |
//! | replica | no                  | yes               |
//! | pending | no                  | yes               |

mod items;
mod vbucket;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BucketError;

pub use items::{DirtyChange, Item};
pub use vbucket::{DirtyPartition, Partition};

/// Maximum number of partitions a bucket can hold
pub const MAX_PARTITIONS: u16 = 1024;

/// Partition state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionState {
    #[default]
    Dead,
    Active,
    Replica,
    Pending,
}

impl PartitionState {
    pub const ALL: [PartitionState; 4] = [
        PartitionState::Dead,
        PartitionState::Active,
        PartitionState::Replica,
        PartitionState::Pending,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PartitionState::Dead => "dead",
            PartitionState::Active => "active",
            PartitionState::Replica => "replica",
            PartitionState::Pending => "pending",
        }
    }

    /// Whether client reads and writes are served
    pub fn serves_clients(self) -> bool {
        self == PartitionState::Active
    }

    /// Whether replicated mutations are accepted
    pub fn accepts_replication(self) -> bool {
        matches!(self, PartitionState::Replica | PartitionState::Pending)
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PartitionState {
    type Err = BucketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PartitionState::ALL
            .into_iter()
            .find(|state| state.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| BucketError::Config(format!("unknown partition state: {s}")))
    }
}

/// External view of a partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMeta {
    pub id: u16,
    pub state: PartitionState,
    pub last_cas: u64,
    pub item_count: usize,
    pub item_bytes: usize,
}

/// Map a key to its partition
///
/// Uses the memcached vbucket hash: the middle 15 bits of the key's CRC32,
/// reduced modulo the partition count.
pub fn partition_for_key(key: &[u8], num_partitions: u16) -> u16 {
    let n = u32::from(num_partitions.max(1));
    let hash = (crc32fast::hash(key) >> 16) & 0x7fff;
    (hash % n) as u16
}
