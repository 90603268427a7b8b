//! Partition implementation
//!
//! ## Locking
//! - `state`: RwLock. Mutations hold it shared for their whole commit, so a
//!   transition waits for in-flight mutations and no mutation straddles one.
//! - `items`: RwLock, always taken after `state`. Mutations emit their event
//!   while holding it exclusively, which keeps hub order equal to commit order.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{BucketError, Result};
use crate::hub::{BucketChange, Event, Hub, Mutation};
use crate::stats::{Counter, Counters};

use super::items::{DirtyChange, Item, ItemTable};
use super::{PartitionMeta, PartitionState};

/// Changes drained from a partition for a flush
#[derive(Debug, Default)]
pub struct DirtyPartition {
    pub id: u16,
    /// Set when the state changed since the last flush
    pub state: Option<PartitionState>,
    pub changes: Vec<DirtyChange>,
}

impl DirtyPartition {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.changes.is_empty()
    }
}

/// A shard of a bucket's keyspace
pub struct Partition {
    id: u16,
    bucket: String,
    state: RwLock<PartitionState>,
    items: RwLock<ItemTable>,
    hub: Hub,
    last_cas: AtomicU64,
    state_dirty: AtomicBool,

    /// Bucket-wide resident byte counter shared by all partitions
    item_bytes: Arc<AtomicI64>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl Partition {
    pub(crate) fn new(
        bucket: &str,
        id: u16,
        hub_capacity: usize,
        item_bytes: Arc<AtomicI64>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            id,
            bucket: bucket.to_string(),
            state: RwLock::new(PartitionState::Dead),
            items: RwLock::new(ItemTable::default()),
            hub: Hub::new(format!("{bucket}/{id}"), hub_capacity),
            last_cas: AtomicU64::new(0),
            state_dirty: AtomicBool::new(false),
            item_bytes,
            counters,
        }
    }

    // =========================================================================
    // Item Operations
    // =========================================================================

    /// Read an item (active partitions only)
    pub fn get(&self, key: &[u8]) -> Result<Item> {
        let state = self.state.read();
        self.check_state(*state, false)?;

        let items = self.items.read();
        match items.get(key) {
            Some(item) => {
                self.counters.incr(Counter::Gets);
                Ok(item.clone())
            }
            None => {
                self.counters.incr(Counter::GetMisses);
                Err(BucketError::key_not_found(key))
            }
        }
    }

    /// Store an item from a client; `cas` of 0 means unconditional
    ///
    /// Returns the CAS assigned to the stored item.
    pub fn set(&self, item: Item, cas: u64) -> Result<u64> {
        self.store(item, cas, false)
    }

    /// Store an item arriving from a replication stream
    pub fn set_replicated(&self, item: Item) -> Result<u64> {
        self.store(item, 0, true)
    }

    /// Delete an item from a client; `cas` of 0 means unconditional
    pub fn delete(&self, key: &[u8], cas: u64) -> Result<u64> {
        self.remove(key, cas, false)
    }

    /// Delete an item arriving from a replication stream
    pub fn delete_replicated(&self, key: &[u8]) -> Result<u64> {
        self.remove(key, 0, true)
    }

    fn store(&self, mut item: Item, cas: u64, replicated: bool) -> Result<u64> {
        let state = self.state.read();
        self.check_state(*state, replicated)?;

        let mut items = self.items.write();
        if cas != 0 {
            self.check_cas(items.get(&item.key), &item.key, cas)?;
        }

        let new_cas = self.next_cas();
        item.cas = new_cas;
        let key = item.key.clone();
        let new_size = item.size() as i64;
        let old_size = items.insert(item).map_or(0, |old| old.size() as i64);

        self.item_bytes
            .fetch_add(new_size - old_size, Ordering::AcqRel);
        self.counters.incr(Counter::Sets);
        self.emit_mutation(key, new_cas, false);
        Ok(new_cas)
    }

    fn remove(&self, key: &[u8], cas: u64, replicated: bool) -> Result<u64> {
        let state = self.state.read();
        self.check_state(*state, replicated)?;

        let mut items = self.items.write();
        if cas != 0 {
            self.check_cas(items.get(key), key, cas)?;
        }

        let Some(old) = items.remove(key) else {
            self.counters.incr(Counter::DeleteMisses);
            return Err(BucketError::key_not_found(key));
        };

        let new_cas = self.next_cas();
        self.item_bytes
            .fetch_sub(old.size() as i64, Ordering::AcqRel);
        self.counters.incr(Counter::Deletes);
        self.emit_mutation(old.key, new_cas, true);
        Ok(new_cas)
    }

    fn check_state(&self, state: PartitionState, replicated: bool) -> Result<()> {
        let allowed = if replicated {
            state.accepts_replication()
        } else {
            state.serves_clients()
        };
        if allowed {
            return Ok(());
        }
        self.counters.incr(Counter::NotMyPartition);
        Err(BucketError::NotMyPartition { id: self.id, state })
    }

    fn check_cas(&self, existing: Option<&Item>, key: &[u8], cas: u64) -> Result<()> {
        match existing {
            None => Err(BucketError::key_not_found(key)),
            Some(existing) if existing.cas != cas => {
                self.counters.incr(Counter::CasMismatches);
                Err(BucketError::CasMismatch {
                    expected: cas,
                    actual: existing.cas,
                })
            }
            Some(_) => Ok(()),
        }
    }

    fn next_cas(&self) -> u64 {
        self.last_cas.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn emit_mutation(&self, key: Bytes, cas: u64, deleted: bool) {
        self.hub.emit(Event::Mutation(Mutation {
            bucket: self.bucket.clone(),
            partition: self.id,
            key,
            cas,
            deleted,
        }));
    }

    // =========================================================================
    // State Machine
    // =========================================================================

    /// Transition to `new_state`, returning the previous state
    ///
    /// Entering `active` registers every sink currently on `bucket_hub` onto
    /// this partition's hub before the state is committed. The `BucketChange`
    /// is emitted on `bucket_hub` with the state lock still held.
    pub(crate) fn set_state(
        &self,
        new_state: PartitionState,
        bucket_hub: &Hub,
    ) -> Result<PartitionState> {
        let mut state = self.state.write();

        if new_state == PartitionState::Active {
            for sink in bucket_hub.sinks() {
                self.hub.register(sink)?;
            }
        }

        let old_state = *state;
        *state = new_state;
        self.state_dirty.store(true, Ordering::Release);

        bucket_hub.emit(Event::BucketChange(BucketChange::new(
            &self.bucket,
            self.id,
            old_state,
            new_state,
            &self.hub,
        )));
        Ok(old_state)
    }

    // =========================================================================
    // Persistence Support
    // =========================================================================

    /// Load items replayed from the bucket store
    pub(crate) fn restore_items(&self, restored: impl IntoIterator<Item = Item>) {
        let mut items = self.items.write();
        for item in restored {
            self.last_cas.fetch_max(item.cas, Ordering::AcqRel);
            let new_size = item.size() as i64;
            let old_size = items.restore(item).map_or(0, |old| old.size() as i64);
            self.item_bytes
                .fetch_add(new_size - old_size, Ordering::AcqRel);
        }
    }

    /// Drain the state flag and dirty items for a flush
    pub(crate) fn take_dirty(&self) -> DirtyPartition {
        let state = self.state.read();
        let changes = self.items.write().take_dirty();
        let state_changed = self.state_dirty.swap(false, Ordering::AcqRel);
        DirtyPartition {
            id: self.id,
            state: state_changed.then_some(*state),
            changes,
        }
    }

    /// Put back changes that failed to reach the store
    pub(crate) fn restore_dirty(&self, dirty: DirtyPartition) {
        if dirty.state.is_some() {
            self.state_dirty.store(true, Ordering::Release);
        }
        let keys = dirty.changes.into_iter().map(|change| match change {
            DirtyChange::Stored(item) => item.key,
            DirtyChange::Deleted(key) => key,
        });
        self.items.write().mark_dirty(keys);
    }

    /// Persist the current state on the next flush without transitioning
    pub(crate) fn mark_state_dirty(&self) {
        self.state_dirty.store(true, Ordering::Release);
    }

    /// Stop event delivery for this partition, waiting for sinks until `deadline`
    pub(crate) fn close(&self, deadline: Instant) {
        self.hub.close_by(deadline);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    pub fn state(&self) -> PartitionState {
        *self.state.read()
    }

    /// The partition-scope hub carrying this partition's mutations
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn last_cas(&self) -> u64 {
        self.last_cas.load(Ordering::Acquire)
    }

    pub fn item_count(&self) -> usize {
        self.items.read().len()
    }

    /// Bytes resident in this partition alone
    pub fn resident_bytes(&self) -> usize {
        self.items.read().bytes()
    }

    pub fn dirty_count(&self) -> usize {
        self.items.read().dirty_count()
    }

    pub fn meta(&self) -> PartitionMeta {
        let state = self.state();
        let items = self.items.read();
        PartitionMeta {
            id: self.id,
            state,
            last_cas: self.last_cas(),
            item_count: items.len(),
            item_bytes: items.bytes(),
        }
    }
}
