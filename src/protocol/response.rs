//! Response definitions
//!
//! Represents responses to clients.

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Success = 0x0000,
    KeyNotFound = 0x0001,
    KeyExists = 0x0002,
    InvalidArguments = 0x0004,
    NotMyVbucket = 0x0007,
    NoBucket = 0x0008,
    UnknownCommand = 0x0081,
    InternalError = 0x0084,
}

impl Status {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(Status::Success),
            0x0001 => Some(Status::KeyNotFound),
            0x0002 => Some(Status::KeyExists),
            0x0004 => Some(Status::InvalidArguments),
            0x0007 => Some(Status::NotMyVbucket),
            0x0008 => Some(Status::NoBucket),
            0x0081 => Some(Status::UnknownCommand),
            0x0084 => Some(Status::InternalError),
            _ => None,
        }
    }
}

/// A response to send to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Opcode of the request being answered
    pub opcode: u8,

    pub status: Status,

    /// Copied from the request
    pub opaque: u32,

    pub cas: u64,

    /// Flags for GET hits
    pub extras: Vec<u8>,

    pub key: Vec<u8>,

    /// Item value, version string or error message
    pub value: Vec<u8>,
}

impl Response {
    /// Create a SUCCESS response with an empty body
    pub fn success(opcode: u8) -> Self {
        Self {
            opcode,
            status: Status::Success,
            opaque: 0,
            cas: 0,
            extras: Vec::new(),
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Create an error response carrying `message` as its value
    pub fn error(opcode: u8, status: Status, message: &str) -> Self {
        Self {
            status,
            value: message.as_bytes().to_vec(),
            ..Self::success(opcode)
        }
    }

    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = value.into();
        self
    }

    /// Attach item flags as the 4-byte extras field
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.extras = flags.to_be_bytes().to_vec();
        self
    }

    /// Item flags, if the extras carry them
    pub fn flags(&self) -> Option<u32> {
        match self.extras.as_slice() {
            [a, b, c, d] => Some(u32::from_be_bytes([*a, *b, *c, *d])),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
