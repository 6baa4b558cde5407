//! Request and response definitions

use crate::types::{Key, StreamId, Value};

/// Request opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Scan = 0x01,
    Ping = 0x02,
    Get = 0x03,
}

impl RequestType {
    pub fn from_u8(op: u8) -> Option<Self> {
        match op {
            0x01 => Some(RequestType::Scan),
            0x02 => Some(RequestType::Ping),
            0x03 => Some(RequestType::Get),
            _ => None,
        }
    }
}

/// A parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Entries with `start <= key < end`, optionally limited to `points`
    Scan {
        stream: StreamId,
        start: Key,
        end: Key,
        points: Vec<u64>,
    },

    /// Health check
    Ping,

    /// Point lookup
    Get { stream: StreamId, key: Key },
}

impl Request {
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Scan { .. } => RequestType::Scan,
            Request::Ping => RequestType::Ping,
            Request::Get { .. } => RequestType::Get,
        }
    }
}

/// One unit of a response stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Record(Key, Value),
    End,
    Error(String),
}
