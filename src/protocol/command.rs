//! Command definitions
//!
//! Represents requests from clients.

/// Supported request opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Delete = 0x04,
    Quit = 0x07,
    Noop = 0x0a,
    Version = 0x0b,
    SelectBucket = 0x89,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Opcode::Get),
            0x01 => Some(Opcode::Set),
            0x04 => Some(Opcode::Delete),
            0x07 => Some(Opcode::Quit),
            0x0a => Some(Opcode::Noop),
            0x0b => Some(Opcode::Version),
            0x89 => Some(Opcode::SelectBucket),
            _ => None,
        }
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Get a value by key
    Get { key: Vec<u8> },

    /// Store a value
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        flags: u32,
        expiration: u32,
    },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Close the connection after replying
    Quit,

    /// Health check
    Noop,

    /// Server version
    Version,

    /// Switch the connection to another bucket
    SelectBucket { name: String },

    /// Well-framed request with an opcode we do not serve
    Unknown { opcode: u8 },

    /// Known opcode whose body does not fit it
    Invalid { opcode: u8, reason: String },
}

impl Command {
    /// Opcode byte on the wire
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Get { .. } => Opcode::Get as u8,
            Command::Set { .. } => Opcode::Set as u8,
            Command::Delete { .. } => Opcode::Delete as u8,
            Command::Quit => Opcode::Quit as u8,
            Command::Noop => Opcode::Noop as u8,
            Command::Version => Opcode::Version as u8,
            Command::SelectBucket { .. } => Opcode::SelectBucket as u8,
            Command::Unknown { opcode } | Command::Invalid { opcode, .. } => *opcode,
        }
    }
}

/// A command plus its header fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Echoed back in the response
    pub opaque: u32,

    /// Target partition
    pub vbucket: u16,

    /// Expected CAS, 0 for unconditional
    pub cas: u64,

    pub command: Command,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            opaque: 0,
            vbucket: 0,
            cas: 0,
            command,
        }
    }

    pub fn with_vbucket(mut self, vbucket: u16) -> Self {
        self.vbucket = vbucket;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }
}
