//! Connection Handler
//!
//! Handles individual client connections. Each connection is bound to one
//! bucket at a time and addresses partitions through the header's vbucket.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::bucket::Bucket;
use crate::error::{BucketError, Result};
use crate::partition::Item;
use crate::protocol::{read_request, write_response, Command, Request, Response, Status};
use crate::registry::Registry;

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    registry: Arc<Registry>,

    /// Currently selected bucket
    bucket: Option<Arc<Bucket>>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler bound to `default_bucket`
    ///
    /// A missing default bucket is not an error; item commands then answer
    /// NO_BUCKET until a bucket is selected.
    pub fn new(stream: TcpStream, registry: Arc<Registry>, default_bucket: &str) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let write_stream = stream;
        let bucket = registry.get(default_bucket).ok();

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            registry,
            bucket,
            peer_addr,
        })
    }

    /// Configure connection timeouts (`None` leaves a direction unbounded)
    pub fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(read)?;
        self.writer.get_ref().set_write_timeout(write)?;
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads requests in a loop and sends responses. Returns when the client
    /// disconnects, sends QUIT, or breaks framing.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!(peer = %self.peer_addr, "connection established");

        loop {
            let request = match read_request(&mut self.reader) {
                Ok(request) => request,
                Err(BucketError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!(peer = %self.peer_addr, "client disconnected");
                    return Ok(());
                }
                Err(BucketError::Io(ref e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    tracing::debug!(peer = %self.peer_addr, "read timeout");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, "dropping connection: {}", e);
                    return Err(e);
                }
            };

            tracing::trace!(peer = %self.peer_addr, ?request, "request");

            let quit = request.command == Command::Quit;
            let response = self.execute(&request).with_opaque(request.opaque);

            if let Err(e) = write_response(&mut self.writer, &response) {
                if let BucketError::Io(ref io_err) = e {
                    if is_disconnect(io_err.kind()) {
                        tracing::debug!(
                            peer = %self.peer_addr,
                            "client disconnected before response could be sent"
                        );
                        return Ok(());
                    }
                }
                tracing::warn!(peer = %self.peer_addr, "error writing response: {}", e);
                return Err(e);
            }

            if quit {
                tracing::debug!(peer = %self.peer_addr, "client quit");
                return Ok(());
            }
        }
    }

    /// Execute a request and build its response
    fn execute(&mut self, request: &Request) -> Response {
        let opcode = request.command.opcode();
        match &request.command {
            Command::Noop | Command::Quit => Response::success(opcode),
            Command::Version => Response::success(opcode).with_value(crate::VERSION),
            Command::Unknown { opcode } => Response::error(
                *opcode,
                Status::UnknownCommand,
                &format!("unknown command 0x{opcode:02x}"),
            ),
            Command::Invalid { reason, .. } => {
                Response::error(opcode, Status::InvalidArguments, reason)
            }
            Command::SelectBucket { name } => match self.registry.get(name) {
                Ok(bucket) => {
                    tracing::debug!(peer = %self.peer_addr, bucket = %name, "bucket selected");
                    self.bucket = Some(bucket);
                    Response::success(opcode)
                }
                Err(e) => Response::error(opcode, Status::KeyNotFound, &e.to_string()),
            },
            Command::Get { key } => match self.with_bucket(|b| b.get(request.vbucket, key)) {
                Ok(item) => Response::success(opcode)
                    .with_flags(item.flags)
                    .with_cas(item.cas)
                    .with_value(item.value.to_vec()),
                Err(e) => error_response(opcode, &e),
            },
            Command::Set {
                key,
                value,
                flags,
                expiration,
            } => {
                let item = Item::new(key.clone(), value.clone())
                    .with_flags(*flags)
                    .with_expiration(*expiration);
                match self.with_bucket(|b| b.set(request.vbucket, item, request.cas)) {
                    Ok(cas) => Response::success(opcode).with_cas(cas),
                    Err(e) => error_response(opcode, &e),
                }
            }
            Command::Delete { key } => {
                match self.with_bucket(|b| b.delete(request.vbucket, key, request.cas)) {
                    Ok(cas) => Response::success(opcode).with_cas(cas),
                    Err(e) => error_response(opcode, &e),
                }
            }
        }
    }

    fn with_bucket<T>(&self, op: impl FnOnce(&Bucket) -> Result<T>) -> Result<T> {
        match &self.bucket {
            Some(bucket) => op(bucket),
            None => Err(BucketError::bucket_not_found("<none selected>")),
        }
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// Map a bucket error onto the closest wire status
pub fn status_for(err: &BucketError) -> Status {
    match err {
        BucketError::NotFound { kind: "key", .. } => Status::KeyNotFound,
        BucketError::NotFound { kind: "bucket", .. } => Status::NoBucket,
        BucketError::NotFound { .. }
        | BucketError::NotMyPartition { .. }
        | BucketError::PartitionOutOfRange { .. } => Status::NotMyVbucket,
        BucketError::CasMismatch { .. } => Status::KeyExists,
        BucketError::InvalidName { .. } | BucketError::Config(_) | BucketError::Protocol(_) => {
            Status::InvalidArguments
        }
        _ => Status::InternalError,
    }
}

fn error_response(opcode: u8, err: &BucketError) -> Response {
    Response::error(opcode, status_for(err), &err.to_string())
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}
