//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single acceptor thread polling a non-blocking listener
//! - One thread per connection, capped by `max_connections`
//! - Requests routed through the Registry to bucket partitions

mod connection;
mod server;

pub use connection::{status_for, Connection};
pub use server::{Server, ShutdownHandle};
