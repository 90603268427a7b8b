//! Mutation log subscriber
//!
//! Logs every event it receives. When a partition becomes active it also
//! subscribes itself to that partition's hub so mutations there get logged.

use std::sync::{Arc, Weak};

use crate::partition::PartitionState;

use super::{Event, EventSink};

/// Event sink that writes mutations and state changes to the tracing log
pub struct MutationLogger {
    me: Weak<MutationLogger>,
}

impl MutationLogger {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self { me: me.clone() })
    }
}

impl EventSink for MutationLogger {
    fn deliver(&self, event: Event) {
        match event {
            Event::Mutation(m) => {
                tracing::debug!(
                    bucket = %m.bucket,
                    partition = m.partition,
                    key = %String::from_utf8_lossy(&m.key),
                    cas = m.cas,
                    deleted = m.deleted,
                    "mutation"
                );
            }
            Event::BucketChange(change) => {
                tracing::info!(
                    bucket = %change.bucket,
                    partition = change.partition,
                    old_state = %change.old_state,
                    new_state = %change.new_state,
                    "bucket change"
                );
                if change.new_state != PartitionState::Active {
                    return;
                }
                let (Some(hub), Some(me)) = (change.partition_hub(), self.me.upgrade()) else {
                    return;
                };
                if let Err(e) = hub.register(me) {
                    tracing::warn!(
                        bucket = %change.bucket,
                        partition = change.partition,
                        "failed to watch partition: {}",
                        e
                    );
                }
            }
        }
    }

    fn name(&self) -> &str {
        "mutation-log"
    }
}
