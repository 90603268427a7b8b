//! Protocol Module
//!
//! Defines the wire protocol for client-server communication: the subset of
//! the memcached binary protocol needed to address partitions.
//!
//! ### Commands
//! - 0x00: GET           - key
//! - 0x01: SET           - extras (flags, expiration) + key + value
//! - 0x04: DELETE        - key
//! - 0x07: QUIT          - empty
//! - 0x0a: NOOP          - empty
//! - 0x0b: VERSION       - empty
//! - 0x89: SELECT_BUCKET - key is the bucket name
//!
//! The target partition travels in the header's vbucket field.
//!
//! ### Status Codes
//! - 0x0000: SUCCESS
//! - 0x0001: KEY_ENOENT
//! - 0x0002: KEY_EEXISTS (CAS mismatch)
//! - 0x0004: EINVAL
//! - 0x0007: NOT_MY_VBUCKET
//! - 0x0008: NO_BUCKET
//! - 0x0081: UNKNOWN_COMMAND
//! - 0x0084: INTERNAL_ERROR

mod codec;
mod command;
mod response;

pub use codec::{
    decode_request, decode_response, encode_request, encode_response, read_request,
    read_response, write_request, write_response, HEADER_SIZE, MAX_BODY_SIZE, REQUEST_MAGIC,
    RESPONSE_MAGIC,
};
pub use command::{Command, Opcode, Request};
pub use response::{Response, Status};
