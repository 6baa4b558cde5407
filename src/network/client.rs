//! Remote query client

use std::net::ToSocketAddrs;

use crate::error::{ArchiveError, Result};
use crate::protocol::{read_response, write_request, Request, Response};
use crate::types::{Key, StreamId, Value};

use super::NetworkStream;

/// Blocking client for a `Server`
pub struct Client {
    stream: NetworkStream,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs, timeout_ms: u64) -> Result<Self> {
        Ok(Self {
            stream: NetworkStream::connect(addr, timeout_ms)?,
        })
    }

    pub fn ping(&mut self) -> Result<()> {
        self.send(&Request::Ping)?;
        match read_response(&mut *self.stream)? {
            Response::End => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn get(&mut self, stream: StreamId, key: Key) -> Result<Option<Value>> {
        self.send(&Request::Get { stream, key })?;
        let mut records = self.collect()?;
        Ok(records.pop().map(|(_, value)| value))
    }

    /// Entries with `start <= key < end`; an empty `points` means all points
    pub fn scan(
        &mut self,
        stream: StreamId,
        start: Key,
        end: Key,
        points: &[u64],
    ) -> Result<Vec<(Key, Value)>> {
        self.send(&Request::Scan {
            stream,
            start,
            end,
            points: points.to_vec(),
        })?;
        self.collect()
    }

    pub fn disconnect(mut self) {
        self.stream.disconnect();
    }

    fn send(&mut self, request: &Request) -> Result<()> {
        write_request(&mut *self.stream, request);
        self.stream.flush()
    }

    fn collect(&mut self) -> Result<Vec<(Key, Value)>> {
        let mut records = Vec::new();
        loop {
            match read_response(&mut *self.stream)? {
                Response::Record(key, value) => records.push((key, value)),
                Response::End => return Ok(records),
                Response::Error(message) => return Err(ArchiveError::Protocol(message)),
            }
        }
    }
}

fn unexpected(response: Response) -> ArchiveError {
    match response {
        Response::Error(message) => ArchiveError::Protocol(message),
        other => ArchiveError::Protocol(format!("unexpected response: {:?}", other)),
    }
}
