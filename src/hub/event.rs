//! Hub event definitions
//!
//! The event set is closed: every consumer matches exhaustively, so adding a
//! variant breaks the build of every dispatcher that does not handle it.

use bytes::Bytes;

use crate::partition::PartitionState;

use super::broadcaster::{Hub, WeakHub};

/// An event flowing through a notification hub
#[derive(Debug, Clone)]
pub enum Event {
    /// An item was stored or deleted on a partition
    Mutation(Mutation),

    /// A partition changed state
    BucketChange(BucketChange),
}

/// A committed item mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Name of the owning bucket
    pub bucket: String,

    /// Partition the key lives on
    pub partition: u16,

    /// The mutated key
    pub key: Bytes,

    /// CAS assigned by the commit
    pub cas: u64,

    /// True for deletions
    pub deleted: bool,
}

/// A partition state transition
#[derive(Debug, Clone)]
pub struct BucketChange {
    /// Name of the owning bucket
    pub bucket: String,

    /// Partition that transitioned
    pub partition: u16,

    /// State before the transition
    pub old_state: PartitionState,

    /// State after the transition
    pub new_state: PartitionState,

    /// The partition's own hub (does not keep the partition alive)
    pub(crate) partition_hub: WeakHub,
}

impl BucketChange {
    pub(crate) fn new(
        bucket: &str,
        partition: u16,
        old_state: PartitionState,
        new_state: PartitionState,
        partition_hub: &Hub,
    ) -> Self {
        Self {
            bucket: bucket.to_string(),
            partition,
            old_state,
            new_state,
            partition_hub: partition_hub.downgrade(),
        }
    }

    /// The hub of the partition that changed, if the partition still exists
    pub fn partition_hub(&self) -> Option<Hub> {
        self.partition_hub.upgrade()
    }
}
