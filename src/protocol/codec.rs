//! Protocol codec
//!
//! Encoding and decoding functions for the memcached binary protocol.
//!
//! ## Header (24 bytes, big-endian)
//! ```text
//!  0        1        2        3        4        5        6        7
//! ┌────────┬────────┬─────────────────┬────────┬────────┬─────────────────┐
//! │ magic  │ opcode │   key length    │ extlen │ dtype  │ vbucket/status  │
//! ├────────┴────────┴─────────────────┴────────┴────────┴─────────────────┤
//! │ total body length (4)             │ opaque (4)                        │
//! ├───────────────────────────────────┴───────────────────────────────────┤
//! │ cas (8)                                                               │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//! The body follows as `extras | key | value`.
//!
//! ### Extras by Command
//! - SET request:  flags (4) + expiration (4)
//! - GET response: flags (4)
//! - everything else: none

use std::io::{Read, Write};

use crate::error::{BucketError, Result};

use super::{Command, Opcode, Request, Response, Status};

/// Fixed header size
pub const HEADER_SIZE: usize = 24;

/// Magic byte of client requests
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte of server responses
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Maximum body size (16 MB)
pub const MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

/// Decoded header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    magic: u8,
    opcode: u8,
    key_len: u16,
    extras_len: u8,
    vbucket_or_status: u16,
    body_len: u32,
    opaque: u32,
    cas: u64,
}

impl Header {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.magic);
        out.push(self.opcode);
        out.extend_from_slice(&self.key_len.to_be_bytes());
        out.push(self.extras_len);
        out.push(0); // raw bytes datatype
        out.extend_from_slice(&self.vbucket_or_status.to_be_bytes());
        out.extend_from_slice(&self.body_len.to_be_bytes());
        out.extend_from_slice(&self.opaque.to_be_bytes());
        out.extend_from_slice(&self.cas.to_be_bytes());
    }

    fn parse(bytes: &[u8], expected_magic: u8) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(BucketError::Protocol(format!(
                "Incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        if bytes[0] != expected_magic {
            return Err(BucketError::Protocol(format!(
                "Bad magic: expected 0x{:02x}, got 0x{:02x}",
                expected_magic, bytes[0]
            )));
        }

        let header = Self {
            magic: bytes[0],
            opcode: bytes[1],
            key_len: u16::from_be_bytes([bytes[2], bytes[3]]),
            extras_len: bytes[4],
            vbucket_or_status: u16::from_be_bytes([bytes[6], bytes[7]]),
            body_len: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            opaque: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            cas: u64::from_be_bytes([
                bytes[16], bytes[17], bytes[18], bytes[19], bytes[20], bytes[21], bytes[22],
                bytes[23],
            ]),
        };

        if header.body_len > MAX_BODY_SIZE {
            return Err(BucketError::Protocol(format!(
                "Body too large: {} bytes (max {})",
                header.body_len, MAX_BODY_SIZE
            )));
        }
        if (header.key_len as u32 + header.extras_len as u32) > header.body_len {
            return Err(BucketError::Protocol(format!(
                "Key ({}) and extras ({}) exceed body length {}",
                header.key_len, header.extras_len, header.body_len
            )));
        }
        Ok(header)
    }
}

/// Body split into its three sections
struct Body<'a> {
    extras: &'a [u8],
    key: &'a [u8],
    value: &'a [u8],
}

fn split_body<'a>(header: &Header, bytes: &'a [u8]) -> Result<Body<'a>> {
    let total = HEADER_SIZE + header.body_len as usize;
    if bytes.len() < total {
        return Err(BucketError::Protocol(format!(
            "Incomplete body: expected {} bytes, got {}",
            total,
            bytes.len()
        )));
    }

    let body = &bytes[HEADER_SIZE..total];
    let (extras, rest) = body.split_at(header.extras_len as usize);
    let (key, value) = rest.split_at(header.key_len as usize);
    Ok(Body { extras, key, value })
}

fn encode_frame(mut header: Header, extras: &[u8], key: &[u8], value: &[u8]) -> Vec<u8> {
    header.key_len = key.len() as u16;
    header.extras_len = extras.len() as u8;
    header.body_len = (extras.len() + key.len() + value.len()) as u32;

    let mut message = Vec::with_capacity(HEADER_SIZE + header.body_len as usize);
    header.encode(&mut message);
    message.extend_from_slice(extras);
    message.extend_from_slice(key);
    message.extend_from_slice(value);
    message
}

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// Encode a request to bytes
pub fn encode_request(request: &Request) -> Vec<u8> {
    let header = Header {
        magic: REQUEST_MAGIC,
        opcode: request.command.opcode(),
        key_len: 0,
        extras_len: 0,
        vbucket_or_status: request.vbucket,
        body_len: 0,
        opaque: request.opaque,
        cas: request.cas,
    };

    match &request.command {
        Command::Get { key } | Command::Delete { key } => encode_frame(header, &[], key, &[]),
        Command::Set {
            key,
            value,
            flags,
            expiration,
        } => {
            let mut extras = [0u8; 8];
            extras[..4].copy_from_slice(&flags.to_be_bytes());
            extras[4..].copy_from_slice(&expiration.to_be_bytes());
            encode_frame(header, &extras, key, value)
        }
        Command::SelectBucket { name } => encode_frame(header, &[], name.as_bytes(), &[]),
        Command::Quit
        | Command::Noop
        | Command::Version
        | Command::Unknown { .. }
        | Command::Invalid { .. } => encode_frame(header, &[], &[], &[]),
    }
}

/// Decode a request from bytes
///
/// Framing problems are errors. A well-framed request whose body does not
/// suit its opcode decodes to `Command::Invalid` so the caller can answer it
/// and keep the connection.
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    let header = Header::parse(bytes, REQUEST_MAGIC)?;
    let body = split_body(&header, bytes)?;

    Ok(Request {
        opaque: header.opaque,
        vbucket: header.vbucket_or_status,
        cas: header.cas,
        command: decode_command(header.opcode, &body),
    })
}

fn decode_command(opcode: u8, body: &Body<'_>) -> Command {
    let invalid = |reason: &str| Command::Invalid {
        opcode,
        reason: reason.to_string(),
    };

    let Some(op) = Opcode::from_u8(opcode) else {
        return Command::Unknown { opcode };
    };

    match op {
        Opcode::Get | Opcode::Delete => {
            if body.key.is_empty() {
                return invalid("missing key");
            }
            if !body.extras.is_empty() || !body.value.is_empty() {
                return invalid("unexpected extras or value");
            }
            let key = body.key.to_vec();
            if op == Opcode::Get {
                Command::Get { key }
            } else {
                Command::Delete { key }
            }
        }
        Opcode::Set => {
            if body.key.is_empty() {
                return invalid("missing key");
            }
            let [f0, f1, f2, f3, e0, e1, e2, e3] = body.extras else {
                return invalid("SET requires 8 bytes of extras");
            };
            Command::Set {
                key: body.key.to_vec(),
                value: body.value.to_vec(),
                flags: u32::from_be_bytes([*f0, *f1, *f2, *f3]),
                expiration: u32::from_be_bytes([*e0, *e1, *e2, *e3]),
            }
        }
        Opcode::SelectBucket => match std::str::from_utf8(body.key) {
            Ok(name) if !name.is_empty() => Command::SelectBucket {
                name: name.to_string(),
            },
            _ => invalid("bucket name must be non-empty UTF-8"),
        },
        Opcode::Quit | Opcode::Noop | Opcode::Version => {
            if !body.extras.is_empty() || !body.key.is_empty() || !body.value.is_empty() {
                return invalid("unexpected body");
            }
            match op {
                Opcode::Quit => Command::Quit,
                Opcode::Noop => Command::Noop,
                _ => Command::Version,
            }
        }
    }
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
pub fn encode_response(response: &Response) -> Vec<u8> {
    let header = Header {
        magic: RESPONSE_MAGIC,
        opcode: response.opcode,
        key_len: 0,
        extras_len: 0,
        vbucket_or_status: response.status as u16,
        body_len: 0,
        opaque: response.opaque,
        cas: response.cas,
    };
    encode_frame(header, &response.extras, &response.key, &response.value)
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let header = Header::parse(bytes, RESPONSE_MAGIC)?;
    let body = split_body(&header, bytes)?;

    let status = Status::from_u16(header.vbucket_or_status).ok_or_else(|| {
        BucketError::Protocol(format!(
            "Unknown response status: 0x{:04x}",
            header.vbucket_or_status
        ))
    })?;

    Ok(Response {
        opcode: header.opcode,
        status,
        opaque: header.opaque,
        cas: header.cas,
        extras: body.extras.to_vec(),
        key: body.key.to_vec(),
        value: body.value.to_vec(),
    })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one full frame (header and body) from a stream
fn read_frame<R: Read>(reader: &mut R, magic: u8) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let parsed = Header::parse(&header, magic)?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + parsed.body_len as usize);
    frame.extend_from_slice(&header);
    frame.resize(HEADER_SIZE + parsed.body_len as usize, 0);
    reader.read_exact(&mut frame[HEADER_SIZE..])?;
    Ok(frame)
}

/// Read a complete request from a stream
///
/// Blocks until a complete request is received or an error occurs
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request> {
    let frame = read_frame(reader, REQUEST_MAGIC)?;
    decode_request(&frame)
}

/// Write a request to a stream
pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> Result<()> {
    writer.write_all(&encode_request(request))?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let frame = read_frame(reader, RESPONSE_MAGIC)?;
    decode_response(&frame)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    writer.write_all(&encode_response(response))?;
    writer.flush()?;
    Ok(())
}
