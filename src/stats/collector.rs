//! Stats collector
//!
//! Owns the current snapshot and at most one sampler thread. Once closed, a
//! collector never starts another sampler.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use crossbeam::channel::{self, select, Sender};
use parking_lot::Mutex;

use crate::error::Result;

use super::{StatsSnapshot, StatsSource};

struct Sampler {
    stop: Sender<()>,
    worker: JoinHandle<()>,
}

/// Sampler slot; `closed` shares its lock so start and close cannot interleave
#[derive(Default)]
struct SamplerSlot {
    sampler: Option<Sampler>,
    closed: bool,
}

/// Decrements the live-sampler count when a sampler thread exits
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-bucket stats snapshot engine
pub struct StatsCollector {
    scope: String,
    latest: Arc<ArcSwap<StatsSnapshot>>,
    sampler: Mutex<SamplerSlot>,
    running: Arc<AtomicUsize>,
    samples: Arc<AtomicU64>,
}

impl StatsCollector {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            latest: Arc::new(ArcSwap::from_pointee(StatsSnapshot::empty())),
            sampler: Mutex::new(SamplerSlot::default()),
            running: Arc::new(AtomicUsize::new(0)),
            samples: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Latest published snapshot; never waits on the sampler
    pub fn snapshot(&self) -> Arc<StatsSnapshot> {
        self.latest.load_full()
    }

    /// Start sampling `source` every `interval`
    ///
    /// Returns `Ok(false)` without spawning anything if a sampler is already
    /// running or the collector is closed. Returns as soon as the sampler
    /// thread exists; the first snapshot lands one interval later.
    pub fn start(&self, interval: Duration, source: Weak<dyn StatsSource>) -> Result<bool> {
        let mut slot = self.sampler.lock();
        if slot.closed {
            return Ok(false);
        }
        if let Some(existing) = slot.sampler.as_ref() {
            if !existing.worker.is_finished() {
                return Ok(false);
            }
        }
        if let Some(finished) = slot.sampler.take() {
            let _ = finished.worker.join();
        }

        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);
        let latest = Arc::clone(&self.latest);
        let samples = Arc::clone(&self.samples);
        let scope = self.scope.clone();

        self.running.fetch_add(1, Ordering::AcqRel);
        let guard = RunningGuard(Arc::clone(&self.running));

        let worker = thread::Builder::new()
            .name(format!("stats-{}", self.scope))
            .spawn(move || {
                let _guard = guard;
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(source) = source.upgrade() else {
                                tracing::debug!(scope = %scope, "stats source dropped, sampler exiting");
                                break;
                            };
                            let counters = source.sample();
                            drop(source);
                            latest.store(Arc::new(StatsSnapshot::new(counters, SystemTime::now())));
                            samples.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })?;

        tracing::info!(scope = %self.scope, interval_ms = interval.as_millis() as u64, "stats sampler started");
        slot.sampler = Some(Sampler {
            stop: stop_tx,
            worker,
        });
        Ok(true)
    }

    /// Stop the sampler, if any, and wait for it to exit
    ///
    /// A later `start` may run a new sampler.
    pub fn stop(&self) {
        let sampler = self.sampler.lock().sampler.take();
        self.join(sampler);
    }

    /// Stop the sampler and refuse every later `start`
    pub fn close(&self) {
        let sampler = {
            let mut slot = self.sampler.lock();
            slot.closed = true;
            slot.sampler.take()
        };
        self.join(sampler);
    }

    pub fn is_closed(&self) -> bool {
        self.sampler.lock().closed
    }

    fn join(&self, sampler: Option<Sampler>) {
        let Some(sampler) = sampler else {
            return;
        };
        drop(sampler.stop);
        if sampler.worker.thread().id() != thread::current().id() && sampler.worker.join().is_err() {
            tracing::warn!(scope = %self.scope, "stats sampler panicked");
        }
        tracing::info!(scope = %self.scope, "stats sampler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.sampler
            .lock()
            .sampler
            .as_ref()
            .is_some_and(|s| !s.worker.is_finished())
    }

    /// Number of sampler threads currently alive for this collector
    pub fn active_samplers(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Number of snapshots published so far
    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}
