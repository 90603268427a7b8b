//! Notification Hub Module
//!
//! Pub-sub fan-out of mutation and state-change events.
//!
//! ## Responsibilities
//! - One hub per partition and one per bucket (structurally identical)
//! - A bounded mailbox and delivery thread per registered sink
//! - Per-sink FIFO: a sink sees a hub's events in emit order
//!
//! ## Wiring
//! ```text
//!   Partition ──Mutation──▶ partition hub ──▶ sink mailboxes ──▶ workers
//!   Bucket ──BucketChange─▶ bucket hub    ──▶ sink mailboxes ──▶ workers
//!                               │
//!                               └─ on entry to `active`, every bucket-hub sink
//!                                  is also registered on the partition hub
//! ```

mod broadcaster;
mod event;
mod logger;

pub use broadcaster::{
    ChannelSink, EventSink, Hub, SinkRef, WeakHub, CLOSE_TIMEOUT, DEFAULT_MAILBOX_CAPACITY,
};
pub use event::{BucketChange, Event, Mutation};
pub use logger::MutationLogger;
