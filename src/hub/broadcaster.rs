//! Hub broadcaster
//!
//! Every registered sink owns a bounded mailbox and a dedicated delivery
//! thread. `emit` only ever `try_send`s into mailboxes, so a slow sink delays
//! nobody but itself.
//!
//! ## Backpressure
//! Drop-oldest: when a mailbox is full, the oldest queued event is discarded
//! to make room for the new one and the hub's dropped counter is bumped.
//!
//! ## Shutdown
//! `close` waits for workers to drain until a deadline. A worker still stuck
//! in `deliver` after that is detached, never joined.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::error::Result;

use super::Event;

/// Default number of events a sink mailbox holds before dropping the oldest
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// How long `close` waits for delivery workers before detaching them
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A receiver of hub events
///
/// `deliver` runs on the sink's own delivery thread, one event at a time, in
/// the order the hub accepted them.
pub trait EventSink: Send + Sync + 'static {
    fn deliver(&self, event: Event);

    /// Short label used in thread names and logs
    fn name(&self) -> &str {
        "sink"
    }
}

/// Shared handle to a sink
pub type SinkRef = Arc<dyn EventSink>;

fn same_sink(a: &SinkRef, b: &SinkRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// A registered sink with its mailbox
struct Mailbox {
    sink: SinkRef,
    tx: Sender<Event>,
    /// Second handle on the mailbox, used to evict the oldest event when full
    overflow: Receiver<Event>,
    /// Disconnects when the worker exits
    done: Receiver<()>,
    worker: Option<JoinHandle<()>>,
}

impl Mailbox {
    /// Queue an event, evicting old ones if needed. Returns how many were evicted.
    fn offer(&self, mut event: Event) -> u64 {
        let mut evicted = 0;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    if self.overflow.try_recv().is_ok() {
                        evicted += 1;
                    }
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }
}

struct HubInner {
    scope: String,
    capacity: usize,
    mailboxes: Mutex<Vec<Mailbox>>,
    closed: AtomicBool,
    emitted: AtomicU64,
    dropped: AtomicU64,
    next_worker: AtomicU64,
}

/// Typed event broadcaster
///
/// Cheap to clone; clones share the same subscriber set.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

/// Non-owning handle to a hub
#[derive(Debug, Clone)]
pub struct WeakHub {
    inner: Weak<HubInner>,
}

impl WeakHub {
    pub fn upgrade(&self) -> Option<Hub> {
        self.inner.upgrade().map(|inner| Hub { inner })
    }
}

impl Hub {
    /// Create a hub whose sinks get mailboxes of `capacity` events (minimum 1)
    pub fn new(scope: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                scope: scope.into(),
                capacity: capacity.max(1),
                mailboxes: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                emitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                next_worker: AtomicU64::new(0),
            }),
        }
    }

    /// Register a sink for all subsequently emitted events
    ///
    /// Returns `Ok(false)` if the sink is already registered here or the hub is
    /// closed. Fails only if the delivery thread cannot be spawned.
    pub fn register(&self, sink: SinkRef) -> Result<bool> {
        let mut mailboxes = self.inner.mailboxes.lock();
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(false);
        }
        if mailboxes.iter().any(|m| same_sink(&m.sink, &sink)) {
            return Ok(false);
        }

        let (tx, rx) = channel::bounded(self.inner.capacity);
        let worker_rx = rx.clone();
        let worker_sink = Arc::clone(&sink);
        let worker_id = self.inner.next_worker.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = channel::bounded::<()>(0);

        let worker = thread::Builder::new()
            .name(format!("hub-{}-{}", self.inner.scope, worker_id))
            .spawn(move || {
                let _done = done_tx;
                // Ends once every sender is gone and the mailbox is drained
                for event in worker_rx.iter() {
                    worker_sink.deliver(event);
                }
            })?;

        tracing::debug!(scope = %self.inner.scope, sink = sink.name(), "sink registered");

        mailboxes.push(Mailbox {
            sink,
            tx,
            overflow: rx,
            done: done_rx,
            worker: Some(worker),
        });
        Ok(true)
    }

    /// Hand an event to every registered sink without waiting on any of them
    pub fn emit(&self, event: Event) {
        let mailboxes = self.inner.mailboxes.lock();
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        self.inner.emitted.fetch_add(1, Ordering::Relaxed);

        for mailbox in mailboxes.iter() {
            let evicted = mailbox.offer(event.clone());
            if evicted > 0 {
                self.inner.dropped.fetch_add(evicted, Ordering::Relaxed);
                tracing::warn!(
                    scope = %self.inner.scope,
                    sink = mailbox.sink.name(),
                    evicted,
                    "sink mailbox full, dropped oldest events"
                );
            }
        }
    }

    /// Snapshot of the currently registered sinks
    pub fn sinks(&self) -> Vec<SinkRef> {
        self.inner
            .mailboxes
            .lock()
            .iter()
            .map(|m| Arc::clone(&m.sink))
            .collect()
    }

    /// Stop accepting events and registrations, drain mailboxes and join workers
    ///
    /// Waits at most [`CLOSE_TIMEOUT`]. A worker calling `close` on its own
    /// hub is not joined.
    pub fn close(&self) {
        self.close_by(Instant::now() + CLOSE_TIMEOUT);
    }

    /// Like [`Hub::close`], detaching every worker still busy at `deadline`
    pub fn close_by(&self, deadline: Instant) {
        let mailboxes = {
            let mut guard = self.inner.mailboxes.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *guard)
        };

        // Drop every sender first so all workers drain in parallel
        let pending: Vec<(SinkRef, Receiver<()>, Option<JoinHandle<()>>)> = mailboxes
            .into_iter()
            .map(|mut m| (Arc::clone(&m.sink), m.done.clone(), m.worker.take()))
            .collect();

        let current = thread::current().id();
        let mut detached = 0;
        for (sink, done, worker) in pending {
            let Some(worker) = worker else {
                continue;
            };
            if worker.thread().id() == current {
                continue;
            }
            match done.recv_deadline(deadline) {
                Err(RecvTimeoutError::Timeout) => {
                    detached += 1;
                    tracing::warn!(
                        scope = %self.inner.scope,
                        sink = sink.name(),
                        "sink still delivering at close deadline, detaching worker"
                    );
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.join().is_err() {
                        tracing::warn!(scope = %self.inner.scope, "hub delivery worker panicked");
                    }
                }
            }
        }
        tracing::debug!(scope = %self.inner.scope, detached, "hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.mailboxes.lock().len()
    }

    /// Number of events accepted by `emit`
    pub fn emitted_events(&self) -> u64 {
        self.inner.emitted.load(Ordering::Relaxed)
    }

    /// Number of events evicted from full mailboxes
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    pub fn downgrade(&self) -> WeakHub {
        WeakHub {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("scope", &self.inner.scope)
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// Channel Sink
// =============================================================================

/// Sink forwarding events into a bounded crossbeam channel
///
/// Never blocks: an event that finds the channel full is dropped and counted.
pub struct ChannelSink {
    name: String,
    tx: Sender<Event>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn bounded(name: impl Into<String>, capacity: usize) -> (Arc<Self>, Receiver<Event>) {
        let (tx, rx) = channel::bounded(capacity.max(1));
        let sink = Arc::new(Self {
            name: name.into(),
            tx,
            dropped: AtomicU64::new(0),
        });
        (sink, rx)
    }

    /// Events discarded because the channel was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(sink = %self.name, dropped, "channel sink full, event dropped");
            }
            // Receiver gone means nobody is listening any more
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
