//! Connection Handler
//!
//! Serves requests from one client until it disconnects.

use std::io::ErrorKind;
use std::net::TcpStream;

use crate::archive::Archive;
use crate::error::{ArchiveError, Result};
use crate::protocol::{read_request, write_response, Request, Response};
use crate::tree::PointIdFilter;

use super::NetworkStream;

/// Records buffered before an intermediate flush during a scan
const FLUSH_EVERY: usize = 1024;

/// Handles a single client connection
pub struct Connection {
    stream: NetworkStream,
    archive: Archive,
}

impl Connection {
    pub fn new(socket: TcpStream, archive: Archive, timeout_ms: u64) -> Result<Self> {
        Ok(Self {
            stream: NetworkStream::from_tcp(socket, timeout_ms)?,
            archive,
        })
    }

    pub fn peer_addr(&self) -> &str {
        self.stream.peer_addr()
    }

    /// Handle requests until the client goes away (blocking)
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!(peer = %self.peer_addr(), "connection established");

        loop {
            let request = match read_request(&mut *self.stream) {
                Ok(Some(request)) => request,
                Ok(None) => {
                    tracing::debug!(peer = %self.peer_addr(), "client disconnected");
                    return Ok(());
                }
                Err(ArchiveError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!(peer = %self.peer_addr(), error = %e, "connection closed");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr(), error = %e, "bad request");
                    write_response(&mut *self.stream, &Response::Error(e.to_string()));
                    let _ = self.stream.flush();
                    return Err(e);
                }
            };

            tracing::trace!(peer = %self.peer_addr(), ?request, "request received");

            if let Err(e) = self.execute(&request) {
                if let ArchiveError::Io(ref io_err) = e {
                    if is_disconnect(io_err.kind()) {
                        tracing::debug!(peer = %self.peer_addr(), error = %e, "client left mid-response");
                        return Ok(());
                    }
                }
                tracing::warn!(peer = %self.peer_addr(), error = %e, "error writing response");
                return Err(e);
            }
        }
    }

    /// Answer one request. Archive errors become error responses; only
    /// transport failures are returned.
    fn execute(&mut self, request: &Request) -> Result<()> {
        let read = self.archive.begin_read();

        match request {
            Request::Ping => write_response(&mut *self.stream, &Response::End),
            Request::Get { stream, key } => match read.get(*stream, key) {
                Ok(Some(value)) => {
                    write_response(&mut *self.stream, &Response::Record(*key, value));
                    write_response(&mut *self.stream, &Response::End);
                }
                Ok(None) => write_response(&mut *self.stream, &Response::End),
                Err(e) => write_response(&mut *self.stream, &Response::Error(e.to_string())),
            },
            Request::Scan {
                stream,
                start,
                end,
                points,
            } => {
                let filter = PointIdFilter::new(points.iter().copied());
                let scan = if points.is_empty() {
                    read.scan(*stream, *start, *end)
                } else {
                    read.scan_filtered(*stream, *start, *end, &filter)
                };

                let mut sent = 0usize;
                for entry in scan {
                    match entry {
                        Ok((key, value)) => {
                            write_response(&mut *self.stream, &Response::Record(key, value));
                            sent += 1;
                            if sent % FLUSH_EVERY == 0 {
                                self.stream.flush()?;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(peer = %self.peer_addr(), error = %e, "scan failed");
                            write_response(&mut *self.stream, &Response::Error(e.to_string()));
                            return self.stream.flush();
                        }
                    }
                }
                write_response(&mut *self.stream, &Response::End);
                tracing::trace!(peer = %self.peer_addr(), version = read.version(), sent, "scan served");
            }
        }

        self.stream.flush()
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}
