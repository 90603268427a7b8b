//! Bucket Module
//!
//! A bucket is a named keyspace split into up to 1024 partitions.
//!
//! ## Responsibilities
//! - Provision, look up, transition and destroy partitions
//! - Route partition-addressed item operations
//! - Track resident item bytes across all partitions
//! - Flush dirty state to its store and compact the store
//! - Own the bucket-scope hub and the stats collector
//!
//! ## Structure
//! ```text
//!   Bucket ──── hub (bucket scope: BucketChange + bridged sinks)
//!     │
//!     ├── partitions[0..n] ── Partition ── hub (partition scope: Mutation)
//!     ├── item_bytes (shared with every partition)
//!     ├── stats: StatsCollector ── sampler ──weak──▶ Bucket
//!     └── store: Box<dyn BucketStore>
//! ```

mod settings;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::{BucketError, Result};
use crate::hub::{Hub, SinkRef, CLOSE_TIMEOUT};
use crate::partition::{
    DirtyChange, DirtyPartition, Item, Partition, PartitionMeta, PartitionState,
};
use crate::stats::{Counter, Counters, StatsCollector, StatsSnapshot, StatsSource};
use crate::storage::{BucketStore, Record};

pub use settings::{
    validate_bucket_name, BucketSettings, BucketSettingsView, SettingsOverrides,
    MEMORY_ONLY_ALL, MEMORY_ONLY_META, MEMORY_ONLY_NONE,
};

/// Settings plus the revision used for optimistic updates
struct VersionedSettings {
    settings: BucketSettings,
    revision: u64,
    dirty: bool,
}

/// External view of a bucket
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDetail {
    pub name: String,
    pub item_bytes: i64,
    pub settings: BucketSettingsView,
    pub partitions: BTreeMap<String, PartitionMeta>,
}

/// A named, independently configured keyspace
pub struct Bucket {
    name: String,
    settings: RwLock<VersionedSettings>,
    partitions: RwLock<Vec<Option<Arc<Partition>>>>,

    /// Resident bytes across all partitions
    item_bytes: Arc<AtomicI64>,
    counters: Arc<Counters>,
    hub: Hub,
    hub_capacity: usize,
    stats: StatsCollector,

    store: Box<dyn BucketStore>,
    /// Serializes flush and compaction
    io_lock: Mutex<()>,
    /// Partitions destroyed since the last flush
    dropped: Mutex<Vec<u16>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Bucket {
    /// Open a bucket over `store`, replaying whatever it holds
    ///
    /// Persisted settings win over `settings`. Every `observer` is registered
    /// on the bucket hub before any partition is restored, so observers see
    /// the restore transitions. Partition 0 is provisioned `active` when the
    /// store does not know it.
    pub fn open(
        name: &str,
        settings: BucketSettings,
        store: Box<dyn BucketStore>,
        observers: &[SinkRef],
        hub_capacity: usize,
    ) -> Result<Arc<Bucket>> {
        validate_bucket_name(name)?;

        let stored = store.load()?;
        let settings_dirty = stored.settings.is_none();
        let settings = stored.settings.clone().unwrap_or(settings);
        settings.validate()?;

        let num_partitions = settings.num_partitions;
        let persists_items = settings.persists_items();

        let bucket = Arc::new(Bucket {
            name: name.to_string(),
            settings: RwLock::new(VersionedSettings {
                settings,
                revision: 1,
                dirty: settings_dirty,
            }),
            partitions: RwLock::new(vec![None; num_partitions as usize]),
            item_bytes: Arc::new(AtomicI64::new(0)),
            counters: Arc::new(Counters::default()),
            hub: Hub::new(name, hub_capacity),
            hub_capacity,
            stats: StatsCollector::new(name),
            store,
            io_lock: Mutex::new(()),
            dropped: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        for sink in observers {
            bucket.hub.register(Arc::clone(sink))?;
        }

        let mut restored = 0;
        for (id, partition) in stored.partitions {
            if id >= num_partitions {
                tracing::warn!(
                    bucket = %name,
                    partition = id,
                    num_partitions,
                    "ignoring persisted partition outside the bucket's range"
                );
                continue;
            }
            let created = bucket.create_partition(id)?;
            if persists_items {
                created.restore_items(partition.items.into_values());
            }
            bucket.set_partition_state(id, partition.state)?;
            restored += 1;
        }

        if bucket.partition(0).is_none() {
            bucket.create_partition(0)?;
            bucket.set_partition_state(0, PartitionState::Active)?;
        }

        tracing::info!(
            bucket = %name,
            restored,
            num_partitions,
            item_bytes = bucket.get_item_bytes(),
            "bucket opened"
        );
        Ok(bucket)
    }

    // =========================================================================
    // Partition Management
    // =========================================================================

    /// Provision partition `id` in the `dead` state
    pub fn create_partition(&self, id: u16) -> Result<Arc<Partition>> {
        self.ensure_open()?;
        self.check_range(id)?;

        let mut partitions = self.partitions.write();
        let slot = &mut partitions[id as usize];
        if slot.is_some() {
            return Err(BucketError::AlreadyExists {
                kind: "partition",
                name: id.to_string(),
            });
        }

        let partition = Arc::new(Partition::new(
            &self.name,
            id,
            self.hub_capacity,
            Arc::clone(&self.item_bytes),
            Arc::clone(&self.counters),
        ));
        partition.mark_state_dirty();
        *slot = Some(Arc::clone(&partition));
        Ok(partition)
    }

    /// Look up a provisioned partition
    pub fn get_partition(&self, id: u16) -> Result<Arc<Partition>> {
        self.ensure_open()?;
        self.check_range(id)?;
        self.partition(id)
            .ok_or_else(|| BucketError::partition_not_found(id))
    }

    /// Look up a partition without range or lifecycle errors
    pub fn partition(&self, id: u16) -> Option<Arc<Partition>> {
        self.partitions.read().get(id as usize).cloned().flatten()
    }

    /// Transition a partition, returning its previous state
    pub fn set_partition_state(&self, id: u16, state: PartitionState) -> Result<PartitionState> {
        let partition = self.get_partition(id)?;
        let old = partition.set_state(state, &self.hub)?;
        self.counters.incr(Counter::StateChanges);
        tracing::debug!(
            bucket = %self.name,
            partition = id,
            old_state = %old,
            new_state = %state,
            "partition state changed"
        );
        Ok(old)
    }

    /// Remove a partition and release its items
    ///
    /// The partition is moved to `dead` first, which waits for in-flight
    /// mutations, so the bytes released are exact.
    pub fn destroy_partition(&self, id: u16) -> Result<()> {
        self.ensure_open()?;
        self.check_range(id)?;

        let partition = self.partitions.write()[id as usize]
            .take()
            .ok_or_else(|| BucketError::partition_not_found(id))?;

        partition.set_state(PartitionState::Dead, &self.hub)?;
        self.counters.incr(Counter::StateChanges);
        self.item_bytes
            .fetch_sub(partition.resident_bytes() as i64, Ordering::AcqRel);
        partition.close(Instant::now() + CLOSE_TIMEOUT);
        self.dropped.lock().push(id);

        tracing::info!(bucket = %self.name, partition = id, "partition destroyed");
        Ok(())
    }

    /// Metadata of every provisioned partition, by id
    pub fn partition_metas(&self) -> Vec<PartitionMeta> {
        self.partition_list().iter().map(|p| p.meta()).collect()
    }

    fn partition_list(&self) -> Vec<Arc<Partition>> {
        self.partitions.read().iter().flatten().cloned().collect()
    }

    fn check_range(&self, id: u16) -> Result<()> {
        let num_partitions = self.num_partitions();
        if id >= num_partitions {
            return Err(BucketError::PartitionOutOfRange { id, num_partitions });
        }
        Ok(())
    }

    // =========================================================================
    // Item Operations
    // =========================================================================

    pub fn get(&self, partition: u16, key: &[u8]) -> Result<Item> {
        self.get_partition(partition)?.get(key)
    }

    /// Store an item on a partition; `cas` of 0 means unconditional
    pub fn set(&self, partition: u16, item: Item, cas: u64) -> Result<u64> {
        self.get_partition(partition)?.set(item, cas)
    }

    /// Delete a key from a partition; `cas` of 0 means unconditional
    pub fn delete(&self, partition: u16, key: &[u8], cas: u64) -> Result<u64> {
        self.get_partition(partition)?.delete(key, cas)
    }

    /// Resident bytes across all partitions; never blocks
    pub fn get_item_bytes(&self) -> i64 {
        self.item_bytes.load(Ordering::Acquire)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn settings(&self) -> BucketSettings {
        self.settings.read().settings.clone()
    }

    pub fn settings_revision(&self) -> u64 {
        self.settings.read().revision
    }

    pub fn num_partitions(&self) -> u16 {
        self.settings.read().settings.num_partitions
    }

    /// Replace the settings if nobody changed them since `revision`
    ///
    /// Returns the new revision. The partition count and persistence level
    /// are fixed at creation.
    pub fn update_settings(&self, revision: u64, settings: BucketSettings) -> Result<u64> {
        self.ensure_open()?;
        settings.validate()?;

        let mut current = self.settings.write();
        if current.revision != revision {
            return Err(BucketError::StaleConfiguration {
                expected: revision,
                actual: current.revision,
            });
        }
        if settings.num_partitions != current.settings.num_partitions {
            return Err(BucketError::Config(
                "numPartitions cannot change after creation".to_string(),
            ));
        }
        if settings.memory_only != current.settings.memory_only {
            return Err(BucketError::Config(
                "memoryOnly cannot change after creation".to_string(),
            ));
        }

        current.settings = settings;
        current.revision += 1;
        current.dirty = true;
        Ok(current.revision)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write every dirty change to the store and sync it
    ///
    /// Returns the number of item changes taken. On failure the changes are
    /// marked dirty again and the store error is returned.
    pub fn flush(&self) -> Result<usize> {
        self.ensure_open()?;
        self.flush_dirty()
    }

    fn flush_dirty(&self) -> Result<usize> {
        let _io = self.io_lock.lock();

        let (settings, settings_dirty) = {
            let mut current = self.settings.write();
            let dirty = std::mem::replace(&mut current.dirty, false);
            (current.settings.clone(), dirty)
        };
        let dropped = std::mem::take(&mut *self.dropped.lock());
        let dirty: Vec<(Arc<Partition>, DirtyPartition)> = self
            .partition_list()
            .into_iter()
            .map(|p| {
                let changes = p.take_dirty();
                (p, changes)
            })
            .filter(|(_, changes)| !changes.is_empty())
            .collect();

        let mut records = Vec::new();
        let mut items_flushed = 0;
        if settings.persists_metadata() {
            if settings_dirty {
                records.push(Record::Settings(settings.clone()));
            }
            records.extend(
                dropped
                    .iter()
                    .map(|&partition| Record::DropPartition { partition }),
            );
        }
        for (_, changes) in &dirty {
            if settings.persists_metadata() {
                if let Some(state) = changes.state {
                    records.push(Record::PartitionState {
                        partition: changes.id,
                        state,
                    });
                }
            }
            if settings.persists_items() {
                records.extend(changes.changes.iter().map(|change| match change {
                    DirtyChange::Stored(item) => Record::item(changes.id, item),
                    DirtyChange::Deleted(key) => Record::Delete {
                        partition: changes.id,
                        key: key.to_vec(),
                    },
                }));
            }
            items_flushed += changes.changes.len();
        }

        match self.store.append(&records) {
            Ok(()) => {
                self.counters.incr(Counter::Flushes);
                self.counters.add(Counter::ItemsFlushed, items_flushed as u64);
                tracing::debug!(
                    bucket = %self.name,
                    records = records.len(),
                    items_flushed,
                    "bucket flushed"
                );
                Ok(items_flushed)
            }
            Err(e) => {
                self.counters.incr(Counter::FlushErrors);
                if settings_dirty {
                    self.settings.write().dirty = true;
                }
                {
                    let mut pending = self.dropped.lock();
                    let later = std::mem::replace(&mut *pending, dropped);
                    pending.extend(later);
                }
                for (partition, changes) in dirty {
                    partition.restore_dirty(changes);
                }
                tracing::warn!(bucket = %self.name, "flush failed: {}", e);
                Err(e)
            }
        }
    }

    /// Reclaim store space held by superseded records
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        let _io = self.io_lock.lock();

        match self.store.compact() {
            Ok(()) => {
                self.counters.incr(Counter::Compactions);
                Ok(())
            }
            Err(e) => {
                self.counters.incr(Counter::CompactionErrors);
                Err(BucketError::Compaction {
                    bucket: self.name.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Directory of the backing store, `None` for memory-only buckets
    pub fn store_location(&self) -> Option<&Path> {
        self.store.location()
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Latest stats snapshot; never blocks
    pub fn snapshot_stats(&self) -> Arc<StatsSnapshot> {
        self.stats.snapshot()
    }

    /// Start the periodic sampler unless it already runs
    pub fn start_stats(self: &Arc<Self>, interval: Duration) -> Result<bool> {
        self.ensure_open()?;
        let bucket: Weak<Bucket> = Arc::downgrade(self);
        let source: Weak<dyn StatsSource> = bucket;
        let started = self.stats.start(interval, source)?;
        if !started {
            // A close may have slipped in after the check above
            self.ensure_open()?;
        }
        Ok(started)
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the bucket, optionally flushing first
    ///
    /// Partitions and hubs are released even when the flush fails; the flush
    /// error is still returned. All hubs share one [`CLOSE_TIMEOUT`] deadline,
    /// so a stalled sink delays the close by at most that long.
    pub(crate) fn close(&self, flush: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.stats.close();
        let flushed = if flush { self.flush_dirty().map(|_| ()) } else { Ok(()) };

        let partitions: Vec<Arc<Partition>> =
            self.partitions.write().iter_mut().filter_map(Option::take).collect();
        self.item_bytes.store(0, Ordering::Release);

        let deadline = Instant::now() + CLOSE_TIMEOUT;
        for partition in &partitions {
            partition.close(deadline);
        }
        self.hub.close_by(deadline);

        tracing::info!(
            bucket = %self.name,
            flush,
            partitions = partitions.len(),
            "bucket closed"
        );
        flushed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BucketError::bucket_not_found(&self.name));
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bucket-scope hub carrying partition state changes
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn detail(&self) -> BucketDetail {
        BucketDetail {
            name: self.name.clone(),
            item_bytes: self.get_item_bytes(),
            settings: self.settings.read().settings.safe_view(),
            partitions: self
                .partition_metas()
                .into_iter()
                .map(|meta| (meta.id.to_string(), meta))
                .collect(),
        }
    }
}

impl StatsSource for Bucket {
    fn sample(&self) -> BTreeMap<String, u64> {
        let mut map = self.counters.to_map();
        let partitions = self.partition_list();

        let mut item_count = 0;
        let mut dirty_items = 0;
        let mut dropped_events = self.hub.dropped_events();
        for state in PartitionState::ALL {
            map.insert(format!("partitions.{}", state.name()), 0);
        }
        for partition in &partitions {
            item_count += partition.item_count() as u64;
            dirty_items += partition.dirty_count() as u64;
            dropped_events += partition.hub().dropped_events();
            let key = format!("partitions.{}", partition.state().name());
            *map.entry(key).or_insert(0) += 1;
        }

        map.insert("itemBytes".to_string(), self.get_item_bytes().max(0) as u64);
        map.insert("itemCount".to_string(), item_count);
        map.insert("dirtyItems".to_string(), dirty_items);
        map.insert("droppedEvents".to_string(), dropped_events);
        map.insert("partitions".to_string(), partitions.len() as u64);
        map
    }
}
