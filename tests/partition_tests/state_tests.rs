//! Partition Tests
//!
//! These tests verify:
//! - Which states serve clients and which accept replicated mutations
//! - CAS semantics for sets and deletes
//! - Provisioning and lookup errors
//! - Bridging of bucket-scope sinks onto partitions entering `active`
//! - Ordering of state-change events
//! - Exact item byte accounting, including under concurrency

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::Receiver;
use vbucketd::bucket::{Bucket, BucketSettings, MEMORY_ONLY_ALL};
use vbucketd::hub::{ChannelSink, Event, SinkRef};
use vbucketd::storage::MemoryStore;
use vbucketd::{partition_for_key, BucketError, Item, PartitionState};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Helper Functions
// =============================================================================

fn open_bucket(num_partitions: u16, observers: &[SinkRef]) -> Arc<Bucket> {
    let settings = BucketSettings {
        num_partitions,
        memory_only: MEMORY_ONLY_ALL,
        ..BucketSettings::default()
    };
    Bucket::open(
        "test",
        settings,
        Box::new(MemoryStore::new()),
        observers,
        4096,
    )
    .unwrap()
}

fn observed_bucket(num_partitions: u16) -> (Arc<Bucket>, Receiver<Event>) {
    let (sink, rx) = ChannelSink::bounded("observer", 4096);
    let sink: SinkRef = sink;
    let bucket = open_bucket(num_partitions, &[sink]);
    (bucket, rx)
}

fn item(key: &str, value: &str) -> Item {
    Item::new(key.as_bytes().to_vec(), value.as_bytes().to_vec())
}

/// Collect events until `count` mutations for `partition` have arrived
fn mutations_for(rx: &Receiver<Event>, partition: u16, count: usize) -> Vec<(String, u64)> {
    let mut seen = Vec::new();
    while seen.len() < count {
        match rx.recv_timeout(WAIT).unwrap() {
            Event::Mutation(m) if m.partition == partition => {
                seen.push((String::from_utf8_lossy(&m.key).into_owned(), m.cas));
            }
            _ => {}
        }
    }
    seen
}

// =============================================================================
// State Rules Tests
// =============================================================================

#[test]
fn test_partition_zero_starts_active() {
    let bucket = open_bucket(8, &[]);
    assert_eq!(
        bucket.get_partition(0).unwrap().state(),
        PartitionState::Active
    );
    assert_eq!(bucket.partition_metas().len(), 1);
}

#[test]
fn test_new_partition_is_dead_and_rejects_clients() {
    let bucket = open_bucket(8, &[]);
    let partition = bucket.create_partition(3).unwrap();
    assert_eq!(partition.state(), PartitionState::Dead);

    let err = bucket.set(3, item("k", "v"), 0).unwrap_err();
    assert!(matches!(
        err,
        BucketError::NotMyPartition {
            id: 3,
            state: PartitionState::Dead
        }
    ));
    assert!(matches!(
        bucket.get(3, b"k").unwrap_err(),
        BucketError::NotMyPartition { .. }
    ));
    assert!(matches!(
        partition.set_replicated(item("k", "v")).unwrap_err(),
        BucketError::NotMyPartition { .. }
    ));
}

#[test]
fn test_replica_and_pending_accept_only_replication() {
    let bucket = open_bucket(8, &[]);
    for (id, state) in [(1, PartitionState::Replica), (2, PartitionState::Pending)] {
        let partition = bucket.create_partition(id).unwrap();
        bucket.set_partition_state(id, state).unwrap();

        assert!(matches!(
            bucket.set(id, item("k", "v"), 0).unwrap_err(),
            BucketError::NotMyPartition { .. }
        ));
        let cas = partition.set_replicated(item("k", "v")).unwrap();
        assert!(cas > 0);
        assert_eq!(partition.item_count(), 1);
        partition.delete_replicated(b"k").unwrap();
        assert_eq!(partition.item_count(), 0);
    }
}

#[test]
fn test_active_rejects_replication() {
    let bucket = open_bucket(8, &[]);
    let partition = bucket.get_partition(0).unwrap();
    assert!(matches!(
        partition.set_replicated(item("k", "v")).unwrap_err(),
        BucketError::NotMyPartition {
            id: 0,
            state: PartitionState::Active
        }
    ));
}

#[test]
fn test_state_names_round_trip() {
    for state in PartitionState::ALL {
        let parsed: PartitionState = state.to_string().parse().unwrap();
        assert_eq!(parsed, state);
    }
    assert_eq!("ACTIVE".parse::<PartitionState>().unwrap(), PartitionState::Active);
    assert!("limbo".parse::<PartitionState>().is_err());
}

// =============================================================================
// Item Operation Tests
// =============================================================================

#[test]
fn test_set_get_delete() {
    let bucket = open_bucket(8, &[]);

    let cas1 = bucket.set(0, item("alpha", "one").with_flags(7), 0).unwrap();
    let got = bucket.get(0, b"alpha").unwrap();
    assert_eq!(&got.value[..], b"one");
    assert_eq!(got.flags, 7);
    assert_eq!(got.cas, cas1);

    let cas2 = bucket.set(0, item("alpha", "two"), 0).unwrap();
    assert!(cas2 > cas1);

    let cas3 = bucket.delete(0, b"alpha", 0).unwrap();
    assert!(cas3 > cas2);
    assert!(bucket.get(0, b"alpha").unwrap_err().is_key_not_found());
    assert!(bucket.delete(0, b"alpha", 0).unwrap_err().is_key_not_found());
}

#[test]
fn test_cas_rules() {
    let bucket = open_bucket(8, &[]);
    let cas = bucket.set(0, item("k", "v1"), 0).unwrap();

    let err = bucket.set(0, item("k", "v2"), cas + 100).unwrap_err();
    assert!(matches!(err, BucketError::CasMismatch { actual, .. } if actual == cas));
    assert_eq!(&bucket.get(0, b"k").unwrap().value[..], b"v1");

    let new_cas = bucket.set(0, item("k", "v2"), cas).unwrap();
    assert!(matches!(
        bucket.delete(0, b"k", cas).unwrap_err(),
        BucketError::CasMismatch { .. }
    ));
    bucket.delete(0, b"k", new_cas).unwrap();

    // Non-zero CAS on a missing key
    assert!(bucket
        .set(0, item("missing", "v"), 42)
        .unwrap_err()
        .is_key_not_found());
}

// =============================================================================
// Provisioning Tests
// =============================================================================

#[test]
fn test_lookup_errors() {
    let bucket = open_bucket(8, &[]);

    assert!(matches!(
        bucket.get_partition(5).unwrap_err(),
        BucketError::NotFound {
            kind: "partition",
            ..
        }
    ));
    assert!(matches!(
        bucket.get_partition(8).unwrap_err(),
        BucketError::PartitionOutOfRange {
            id: 8,
            num_partitions: 8
        }
    ));
    assert!(matches!(
        bucket.create_partition(8).unwrap_err(),
        BucketError::PartitionOutOfRange { .. }
    ));
    assert!(matches!(
        bucket.create_partition(0).unwrap_err(),
        BucketError::AlreadyExists {
            kind: "partition",
            ..
        }
    ));

    // Lookups never provision
    assert!(bucket.partition(5).is_none());
}

#[test]
fn test_destroy_partition() {
    let bucket = open_bucket(8, &[]);
    bucket.create_partition(2).unwrap();
    bucket.set_partition_state(2, PartitionState::Active).unwrap();
    bucket.set(2, item("k", "value"), 0).unwrap();
    assert_eq!(bucket.get_item_bytes(), 6);

    bucket.destroy_partition(2).unwrap();
    assert_eq!(bucket.get_item_bytes(), 0);
    assert!(bucket.partition(2).is_none());
    assert!(bucket.destroy_partition(2).is_err());

    // Ids can be reused after destruction
    let again = bucket.create_partition(2).unwrap();
    assert_eq!(again.item_count(), 0);
}

// =============================================================================
// Notification Tests
// =============================================================================

#[test]
fn test_bucket_sinks_see_mutations_after_activation() {
    let (bucket, rx) = observed_bucket(8);
    bucket.create_partition(3).unwrap();
    bucket.set_partition_state(3, PartitionState::Active).unwrap();

    let mut expected = Vec::new();
    for i in 0..20 {
        let key = format!("key{:02}", i);
        let cas = bucket.set(3, item(&key, "v"), 0).unwrap();
        expected.push((key, cas));
    }

    assert_eq!(mutations_for(&rx, 3, 20), expected);
}

#[test]
fn test_bridging_only_on_entry_to_active() {
    let (bucket, _rx) = observed_bucket(8);

    for (id, state) in [
        (1, PartitionState::Replica),
        (2, PartitionState::Pending),
        (3, PartitionState::Dead),
    ] {
        let partition = bucket.create_partition(id).unwrap();
        bucket.set_partition_state(id, state).unwrap();
        assert_eq!(partition.hub().subscriber_count(), 0);
    }

    bucket.set_partition_state(1, PartitionState::Active).unwrap();
    assert_eq!(bucket.get_partition(1).unwrap().hub().subscriber_count(), 1);

    // Re-entering active does not duplicate the registration
    bucket.set_partition_state(1, PartitionState::Replica).unwrap();
    bucket.set_partition_state(1, PartitionState::Active).unwrap();
    assert_eq!(bucket.get_partition(1).unwrap().hub().subscriber_count(), 1);
}

#[test]
fn test_state_changes_are_ordered() {
    let (bucket, rx) = observed_bucket(8);
    bucket.create_partition(4).unwrap();

    let path = [
        PartitionState::Replica,
        PartitionState::Pending,
        PartitionState::Active,
        PartitionState::Dead,
    ];
    for state in path {
        bucket.set_partition_state(4, state).unwrap();
    }

    let mut transitions = Vec::new();
    while transitions.len() < path.len() {
        if let Event::BucketChange(change) = rx.recv_timeout(WAIT).unwrap() {
            if change.partition == 4 {
                transitions.push((change.old_state, change.new_state));
            }
        }
    }
    assert_eq!(
        transitions,
        vec![
            (PartitionState::Dead, PartitionState::Replica),
            (PartitionState::Replica, PartitionState::Pending),
            (PartitionState::Pending, PartitionState::Active),
            (PartitionState::Active, PartitionState::Dead),
        ]
    );
}

#[test]
fn test_bucket_change_carries_partition_hub() {
    let (bucket, rx) = observed_bucket(8);
    bucket.create_partition(6).unwrap();
    bucket.set_partition_state(6, PartitionState::Active).unwrap();

    loop {
        if let Event::BucketChange(change) = rx.recv_timeout(WAIT).unwrap() {
            if change.partition == 6 {
                assert_eq!(change.bucket, "test");
                let hub = change.partition_hub().unwrap();
                assert_eq!(hub.scope(), "test/6");
                break;
            }
        }
    }
}

// =============================================================================
// Accounting Tests
// =============================================================================

#[test]
fn test_item_bytes_tracks_sizes() {
    let bucket = open_bucket(8, &[]);

    bucket.set(0, item("ab", "1234"), 0).unwrap();
    assert_eq!(bucket.get_item_bytes(), 6);

    bucket.set(0, item("ab", "12"), 0).unwrap();
    assert_eq!(bucket.get_item_bytes(), 4);

    bucket.set(0, item("xyz", ""), 0).unwrap();
    assert_eq!(bucket.get_item_bytes(), 7);

    bucket.delete(0, b"ab", 0).unwrap();
    assert_eq!(bucket.get_item_bytes(), 3);
}

#[test]
fn test_concurrent_mutations_keep_exact_bytes() {
    let bucket = open_bucket(16, &[]);
    for id in 1..16 {
        bucket.create_partition(id).unwrap();
        bucket.set_partition_state(id, PartitionState::Active).unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let bucket = Arc::clone(&bucket);
            thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("t{}-k{}", t, i % 50);
                    let value = "x".repeat(i % 17);
                    let vb = partition_for_key(key.as_bytes(), 16);
                    bucket.set(vb, item(&key, &value), 0).unwrap();
                    if i % 7 == 0 {
                        let _ = bucket.delete(vb, key.as_bytes(), 0);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let summed: usize = bucket.partition_metas().iter().map(|m| m.item_bytes).sum();
    assert_eq!(bucket.get_item_bytes(), summed as i64);
}

#[test]
fn test_partition_for_key() {
    let mut spread = BTreeMap::new();
    for i in 0..1000 {
        let key = format!("key{}", i);
        let vb = partition_for_key(key.as_bytes(), 64);
        assert!(vb < 64);
        assert_eq!(vb, partition_for_key(key.as_bytes(), 64));
        *spread.entry(vb).or_insert(0) += 1;
    }
    assert!(spread.len() > 32);
    assert_eq!(partition_for_key(b"anything", 1), 0);
}
