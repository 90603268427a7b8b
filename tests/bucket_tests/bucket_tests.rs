//! Bucket Tests
//!
//! These tests verify:
//! - Settings validation, overrides and the password-free view
//! - Flush and reopen restore items, partition states and settings
//! - Metadata-only buckets restore states but no items
//! - Optimistic settings updates
//! - Failed flushes keep changes dirty
//! - Failed compactions are reported with the bucket name

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use vbucketd::bucket::{
    validate_bucket_name, Bucket, BucketSettings, SettingsOverrides, MEMORY_ONLY_ALL,
    MEMORY_ONLY_META, MEMORY_ONLY_NONE,
};
use vbucketd::stats::Counter;
use vbucketd::storage::{BucketStore, FileStore, MemoryStore, Record, StoredBucket};
use vbucketd::{BucketError, Item, PartitionState};

// =============================================================================
// Helper Functions
// =============================================================================

fn settings(num_partitions: u16, memory_only: u8) -> BucketSettings {
    BucketSettings {
        num_partitions,
        memory_only,
        ..BucketSettings::default()
    }
}

fn open_file_bucket(dir: &Path, settings: BucketSettings) -> Arc<Bucket> {
    let store = FileStore::open(dir).unwrap();
    Bucket::open("test", settings, Box::new(store), &[], 256).unwrap()
}

fn item(key: &str, value: &str) -> Item {
    Item::new(key.as_bytes().to_vec(), value.as_bytes().to_vec())
}

/// Store whose appends and compactions fail while `failing` is set
#[derive(Default)]
struct FailingStore {
    failing: Arc<AtomicBool>,
}

impl FailingStore {
    fn io_error() -> BucketError {
        BucketError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "injected failure",
        ))
    }
}

impl BucketStore for FailingStore {
    fn load(&self) -> vbucketd::Result<StoredBucket> {
        Ok(StoredBucket::default())
    }

    fn append(&self, _records: &[Record]) -> vbucketd::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::io_error());
        }
        Ok(())
    }

    fn compact(&self) -> vbucketd::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::io_error());
        }
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        None
    }
}

fn failing_bucket() -> (Arc<Bucket>, Arc<AtomicBool>) {
    let failing = Arc::new(AtomicBool::new(false));
    let store = FailingStore {
        failing: Arc::clone(&failing),
    };
    let bucket = Bucket::open("flaky", settings(4, MEMORY_ONLY_NONE), Box::new(store), &[], 64).unwrap();
    (bucket, failing)
}

// =============================================================================
// Settings Tests
// =============================================================================

#[test]
fn test_default_settings() {
    let defaults = BucketSettings::default();
    assert_eq!(defaults.num_partitions, 1024);
    assert_eq!(defaults.memory_only, MEMORY_ONLY_NONE);
    assert!(defaults.password_hash.is_empty());
    assert!(defaults.validate().is_ok());
    assert!(defaults.persists_items());
    assert!(defaults.persists_metadata());
}

#[test]
fn test_settings_validation() {
    assert!(settings(0, MEMORY_ONLY_NONE).validate().is_err());
    assert!(settings(1025, MEMORY_ONLY_NONE).validate().is_err());
    assert!(settings(1, MEMORY_ONLY_NONE).validate().is_ok());
    assert!(matches!(
        settings(8, 3).validate().unwrap_err(),
        BucketError::Config(_)
    ));

    let meta = settings(8, MEMORY_ONLY_META);
    assert!(meta.persists_metadata());
    assert!(!meta.persists_items());

    let none = settings(8, MEMORY_ONLY_ALL);
    assert!(!none.persists_metadata());
    assert!(!none.persists_items());
}

#[test]
fn test_settings_overrides() {
    let defaults = BucketSettings::default();
    let overrides = SettingsOverrides {
        quota_bytes: Some(4096),
        memory_only: None,
        password_hash: Some("secret".to_string()),
    };
    let merged = defaults.with_overrides(&overrides);
    assert_eq!(merged.quota_bytes, 4096);
    assert_eq!(merged.memory_only, defaults.memory_only);
    assert_eq!(merged.password_hash, "secret");
    assert_eq!(merged.num_partitions, defaults.num_partitions);

    // Defaults are never modified
    assert_eq!(defaults, BucketSettings::default());
}

#[test]
fn test_safe_view_hides_password() {
    let mut s = BucketSettings::default();
    s.password_hash = "hunter2".to_string();
    let json = serde_json::to_value(s.safe_view()).unwrap();
    assert!(json.get("passwordHash").is_none());
    assert_eq!(json["quotaBytes"], 100 * 1024 * 1024);
    assert_eq!(json["numPartitions"], 1024);
}

#[test]
fn test_bucket_name_validation() {
    for name in ["default", "a", "my_bucket-2", "ABC123"] {
        assert!(validate_bucket_name(name).is_ok(), "{name} should be valid");
    }
    for name in ["", "has space", "dot.name", "slash/name", "ünï"] {
        assert!(matches!(
            validate_bucket_name(name).unwrap_err(),
            BucketError::InvalidName { .. }
        ));
    }
}

#[test]
fn test_open_rejects_invalid_name() {
    let result = Bucket::open(
        "bad name",
        BucketSettings::default(),
        Box::new(MemoryStore::new()),
        &[],
        16,
    );
    assert!(matches!(result, Err(BucketError::InvalidName { .. })));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_flush_and_reopen_restores_everything() {
    let temp = TempDir::new().unwrap();

    {
        let bucket = open_file_bucket(temp.path(), settings(16, MEMORY_ONLY_NONE));
        bucket.create_partition(3).unwrap();
        bucket.set_partition_state(3, PartitionState::Active).unwrap();
        bucket.create_partition(7).unwrap();
        bucket.set_partition_state(7, PartitionState::Replica).unwrap();

        bucket.set(0, item("a", "apple").with_flags(9), 0).unwrap();
        bucket.set(3, item("b", "banana"), 0).unwrap();
        bucket.set(3, item("c", "cherry"), 0).unwrap();
        bucket.delete(3, b"c", 0).unwrap();

        let flushed = bucket.flush().unwrap();
        assert_eq!(flushed, 3);
        assert_eq!(bucket.counters().get(Counter::Flushes), 1);
    }

    let bucket = open_file_bucket(temp.path(), settings(4, MEMORY_ONLY_META));
    // Persisted settings win over the ones passed in
    assert_eq!(bucket.num_partitions(), 16);
    assert_eq!(bucket.settings().memory_only, MEMORY_ONLY_NONE);

    assert_eq!(bucket.get_partition(3).unwrap().state(), PartitionState::Active);
    assert_eq!(bucket.get_partition(7).unwrap().state(), PartitionState::Replica);
    assert!(bucket.partition(5).is_none());

    let a = bucket.get(0, b"a").unwrap();
    assert_eq!(&a.value[..], b"apple");
    assert_eq!(a.flags, 9);
    assert_eq!(&bucket.get(3, b"b").unwrap().value[..], b"banana");
    assert!(bucket.get(3, b"c").unwrap_err().is_key_not_found());
    assert_eq!(bucket.get_item_bytes(), 6 + 7);

    // New writes get CAS values above anything restored
    let restored_cas = bucket.get(3, b"b").unwrap().cas;
    let cas = bucket.set(3, item("d", "date"), 0).unwrap();
    assert!(cas > restored_cas);
}

#[test]
fn test_metadata_only_restores_states_not_items() {
    let temp = TempDir::new().unwrap();

    {
        let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_META));
        bucket.create_partition(2).unwrap();
        bucket.set_partition_state(2, PartitionState::Pending).unwrap();
        bucket.set(0, item("k", "v"), 0).unwrap();
        bucket.flush().unwrap();
    }

    let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_META));
    assert_eq!(bucket.get_partition(2).unwrap().state(), PartitionState::Pending);
    assert_eq!(bucket.get_partition(0).unwrap().state(), PartitionState::Active);
    assert!(bucket.get(0, b"k").unwrap_err().is_key_not_found());
    assert_eq!(bucket.get_item_bytes(), 0);
}

#[test]
fn test_destroyed_partition_stays_gone_after_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_NONE));
        bucket.create_partition(4).unwrap();
        bucket.set_partition_state(4, PartitionState::Active).unwrap();
        bucket.set(4, item("k", "v"), 0).unwrap();
        bucket.flush().unwrap();

        bucket.destroy_partition(4).unwrap();
        bucket.flush().unwrap();
    }

    let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_NONE));
    assert!(bucket.partition(4).is_none());
    assert_eq!(bucket.get_item_bytes(), 0);
}

#[test]
fn test_unflushed_changes_are_lost() {
    let temp = TempDir::new().unwrap();

    {
        let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_NONE));
        bucket.set(0, item("kept", "1"), 0).unwrap();
        bucket.flush().unwrap();
        bucket.set(0, item("lost", "2"), 0).unwrap();
    }

    let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_NONE));
    assert!(bucket.get(0, b"kept").is_ok());
    assert!(bucket.get(0, b"lost").unwrap_err().is_key_not_found());
}

#[test]
fn test_flush_with_nothing_dirty() {
    let temp = TempDir::new().unwrap();
    let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_NONE));
    bucket.flush().unwrap();
    assert_eq!(bucket.flush().unwrap(), 0);
}

#[test]
fn test_store_location() {
    let temp = TempDir::new().unwrap();
    let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_NONE));
    assert_eq!(bucket.store_location(), Some(temp.path()));

    let memory = Bucket::open(
        "mem",
        settings(8, MEMORY_ONLY_ALL),
        Box::new(MemoryStore::new()),
        &[],
        16,
    )
    .unwrap();
    assert_eq!(memory.store_location(), None);
}

// =============================================================================
// Settings Update Tests
// =============================================================================

#[test]
fn test_update_settings_revisions() {
    let bucket = Bucket::open(
        "cfg",
        settings(8, MEMORY_ONLY_ALL),
        Box::new(MemoryStore::new()),
        &[],
        16,
    )
    .unwrap();
    let rev = bucket.settings_revision();

    let mut next = bucket.settings();
    next.quota_bytes = 1234;
    let new_rev = bucket.update_settings(rev, next.clone()).unwrap();
    assert_eq!(new_rev, rev + 1);
    assert_eq!(bucket.settings().quota_bytes, 1234);

    // A writer holding the old revision loses
    let err = bucket.update_settings(rev, next.clone()).unwrap_err();
    assert!(matches!(
        err,
        BucketError::StaleConfiguration { expected, actual } if expected == rev && actual == new_rev
    ));

    let mut resized = next.clone();
    resized.num_partitions = 16;
    assert!(matches!(
        bucket.update_settings(new_rev, resized).unwrap_err(),
        BucketError::Config(_)
    ));

    let mut relevel = next;
    relevel.memory_only = MEMORY_ONLY_NONE;
    assert!(matches!(
        bucket.update_settings(new_rev, relevel).unwrap_err(),
        BucketError::Config(_)
    ));
    assert_eq!(bucket.settings_revision(), new_rev);
}

#[test]
fn test_updated_settings_persist() {
    let temp = TempDir::new().unwrap();

    {
        let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_NONE));
        let mut next = bucket.settings();
        next.quota_bytes = 777;
        bucket.update_settings(bucket.settings_revision(), next).unwrap();
        bucket.flush().unwrap();
    }

    let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_NONE));
    assert_eq!(bucket.settings().quota_bytes, 777);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_failed_flush_keeps_changes_dirty() {
    let (bucket, failing) = failing_bucket();
    bucket.set(0, item("a", "1"), 0).unwrap();
    bucket.set(0, item("b", "2"), 0).unwrap();
    assert_eq!(bucket.get_partition(0).unwrap().dirty_count(), 2);

    failing.store(true, Ordering::SeqCst);
    assert!(matches!(bucket.flush().unwrap_err(), BucketError::Io(_)));
    assert_eq!(bucket.counters().get(Counter::FlushErrors), 1);
    assert_eq!(bucket.get_partition(0).unwrap().dirty_count(), 2);

    failing.store(false, Ordering::SeqCst);
    assert_eq!(bucket.flush().unwrap(), 2);
    assert_eq!(bucket.get_partition(0).unwrap().dirty_count(), 0);
    assert_eq!(bucket.counters().get(Counter::ItemsFlushed), 2);
}

#[test]
fn test_failed_compaction_names_bucket() {
    let (bucket, failing) = failing_bucket();
    bucket.compact().unwrap();
    assert_eq!(bucket.counters().get(Counter::Compactions), 1);

    failing.store(true, Ordering::SeqCst);
    match bucket.compact().unwrap_err() {
        BucketError::Compaction { bucket: name, source } => {
            assert_eq!(name, "flaky");
            assert!(matches!(*source, BucketError::Io(_)));
        }
        other => panic!("Expected compaction error, got {other:?}"),
    }
    assert_eq!(bucket.counters().get(Counter::CompactionErrors), 1);
}

#[test]
fn test_compaction_preserves_contents() {
    let temp = TempDir::new().unwrap();

    {
        let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_NONE));
        for round in 0..10 {
            bucket.set(0, item("hot", &format!("v{round}")), 0).unwrap();
            bucket.flush().unwrap();
        }
        bucket.compact().unwrap();
        bucket.set(0, item("after", "x"), 0).unwrap();
        bucket.flush().unwrap();
    }

    let bucket = open_file_bucket(temp.path(), settings(8, MEMORY_ONLY_NONE));
    assert_eq!(&bucket.get(0, b"hot").unwrap().value[..], b"v9");
    assert_eq!(&bucket.get(0, b"after").unwrap().value[..], b"x");
}

// =============================================================================
// Detail Tests
// =============================================================================

#[test]
fn test_detail_shape() {
    let mut s = settings(8, MEMORY_ONLY_ALL);
    s.password_hash = "secret".to_string();
    let bucket = Bucket::open("shown", s, Box::new(MemoryStore::new()), &[], 16).unwrap();
    bucket.set(0, item("k", "vv"), 0).unwrap();

    let json = serde_json::to_value(bucket.detail()).unwrap();
    assert_eq!(json["name"], "shown");
    assert_eq!(json["itemBytes"], 3);
    assert!(json["settings"].get("passwordHash").is_none());
    assert_eq!(json["partitions"]["0"]["state"], "active");
    assert_eq!(json["partitions"]["0"]["itemCount"], 1);
}
