//! Stats Module
//!
//! Live counters plus a lazily started sampler that publishes snapshots.
//!
//! ## Responsibilities
//! - Lock-free counters bumped on the request path
//! - One sampler thread per bucket, started on demand, stopped on close
//! - A single current snapshot per bucket, swapped atomically
//!
//! ## Read Path
//! ```text
//!   request path ──incr──▶ Counters ◀──sample── sampler (tick)
//!                                                   │ store
//!   snapshot() ◀──load── ArcSwap<StatsSnapshot> ◀───┘
//! ```

mod collector;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use collector::StatsCollector;

// =============================================================================
// Counters
// =============================================================================

/// Named bucket counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Gets,
    GetMisses,
    Sets,
    Deletes,
    DeleteMisses,
    CasMismatches,
    NotMyPartition,
    StateChanges,
    Flushes,
    FlushErrors,
    ItemsFlushed,
    Compactions,
    CompactionErrors,
}

impl Counter {
    pub const COUNT: usize = 13;

    pub const ALL: [Counter; Counter::COUNT] = [
        Counter::Gets,
        Counter::GetMisses,
        Counter::Sets,
        Counter::Deletes,
        Counter::DeleteMisses,
        Counter::CasMismatches,
        Counter::NotMyPartition,
        Counter::StateChanges,
        Counter::Flushes,
        Counter::FlushErrors,
        Counter::ItemsFlushed,
        Counter::Compactions,
        Counter::CompactionErrors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::Gets => "gets",
            Counter::GetMisses => "getMisses",
            Counter::Sets => "sets",
            Counter::Deletes => "deletes",
            Counter::DeleteMisses => "deleteMisses",
            Counter::CasMismatches => "casMismatches",
            Counter::NotMyPartition => "notMyPartition",
            Counter::StateChanges => "stateChanges",
            Counter::Flushes => "flushes",
            Counter::FlushErrors => "flushErrors",
            Counter::ItemsFlushed => "itemsFlushed",
            Counter::Compactions => "compactions",
            Counter::CompactionErrors => "compactionErrors",
        }
    }
}

/// Atomic counter set shared by a bucket and its partitions
#[derive(Debug)]
pub struct Counters {
    values: [AtomicU64; Counter::COUNT],
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            values: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl Counters {
    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.values[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter as usize].load(Ordering::Relaxed)
    }

    /// Current values keyed by counter name
    pub fn to_map(&self) -> BTreeMap<String, u64> {
        Counter::ALL
            .into_iter()
            .map(|c| (c.name().to_string(), self.get(c)))
            .collect()
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Something the sampler can read counters from
pub trait StatsSource: Send + Sync {
    fn sample(&self) -> BTreeMap<String, u64>;
}

/// Point-in-time aggregate of bucket counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    counters: BTreeMap<String, u64>,
    latest_update: SystemTime,
}

impl StatsSnapshot {
    /// Snapshot that has never been sampled (always stale)
    pub fn empty() -> Self {
        Self {
            counters: BTreeMap::new(),
            latest_update: UNIX_EPOCH,
        }
    }

    pub fn new(counters: BTreeMap<String, u64>, latest_update: SystemTime) -> Self {
        Self {
            counters,
            latest_update,
        }
    }

    pub fn latest_update_time(&self) -> SystemTime {
        self.latest_update
    }

    /// Time since the snapshot was taken (zero if the clock went backwards)
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.latest_update)
            .unwrap_or_default()
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() > threshold
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    pub fn counters(&self) -> &BTreeMap<String, u64> {
        &self.counters
    }

    /// Flat key/value view, including `latestUpdateTime` in unix millis
    pub fn to_map(&self) -> BTreeMap<String, u64> {
        let mut map = self.counters.clone();
        let millis = self
            .latest_update
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        map.insert("latestUpdateTime".to_string(), millis);
        map
    }
}
