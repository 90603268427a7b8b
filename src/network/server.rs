//! TCP Server
//!
//! Accepts connections and hands each one to its own thread.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::{BucketError, Result};
use crate::registry::Registry;

use super::Connection;

/// How long the accept loop sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Clonable handle that stops a running server
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Decrements the live connection count when a handler exits
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// TCP server for the binary protocol
pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    listener: Option<TcpListener>,
    shutdown: ShutdownHandle,
    active: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl Server {
    /// Create a new server with the given config and registry
    pub fn new(config: ServerConfig, registry: Arc<Registry>) -> Self {
        Self {
            config,
            registry,
            listener: None,
            shutdown: ShutdownHandle::default(),
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Bind the listen address, returning the actual local address
    pub fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr()?);
        }
        let listener = TcpListener::bind(&self.config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "listening");
        self.listener = Some(listener);
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Start the server (blocking until shutdown is requested)
    pub fn run(&mut self) -> Result<()> {
        self.bind()?;
        let listener = self
            .listener
            .take()
            .ok_or_else(|| BucketError::Config("listener not bound".to_string()))?;

        while !self.shutdown.is_shutdown() {
            match listener.accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        tracing::info!(active = self.active_connections(), "server stopped accepting");
        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        if self.active.load(Ordering::Acquire) >= self.config.max_connections {
            tracing::warn!(
                peer = %peer,
                max = self.config.max_connections,
                "connection limit reached, refusing"
            );
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);
        let default_bucket = self.config.default_bucket_name.clone();
        let read_timeout = self.config.read_timeout();
        let write_timeout = self.config.write_timeout();

        self.active.fetch_add(1, Ordering::AcqRel);
        let guard = ConnectionGuard(Arc::clone(&self.active));

        let spawned = thread::Builder::new()
            .name(format!("conn-{id}"))
            .spawn(move || {
                let _guard = guard;
                let result = stream
                    .set_nonblocking(false)
                    .map_err(BucketError::from)
                    .and_then(|()| Connection::new(stream, registry, &default_bucket))
                    .and_then(|mut conn| {
                        conn.set_timeouts(read_timeout, write_timeout)?;
                        conn.handle()
                    });
                if let Err(e) = result {
                    tracing::debug!(peer = %peer, "connection ended with error: {}", e);
                }
            });

        if let Err(e) = spawned {
            tracing::warn!(peer = %peer, "failed to spawn connection thread: {}", e);
        }
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Handle usable from other threads (signal handlers, tests)
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}
