//! Buffered little-endian byte streams.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use crate::encoding::{decode_varint, encode_varint, MAX_VARINT_LEN};
use crate::error::{ArchiveError, Result};

/// Bytes pulled from the underlying reader per refill
const READ_CHUNK: usize = 8 * 1024;

const CONTINUATION: u8 = 0x80;

/// Duplex stream with buffered fixed-width little-endian integers and
/// varints. Writes accumulate until `flush`.
pub struct BinaryStream<S: Read + Write> {
    inner: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S: Read + Write> BinaryStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// True once the peer closed the stream and nothing is left buffered
    pub fn at_end(&mut self) -> Result<bool> {
        if !self.read_buf.is_empty() {
            return Ok(false);
        }
        Ok(self.refill()? == 0)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.fill(1)?;
        Ok(self.read_buf.get_u8())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.fill(4)?;
        Ok(self.read_buf.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.fill(8)?;
        Ok(self.read_buf.get_u64_le())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.fill(8)?;
        Ok(self.read_buf.get_i64_le())
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut needed = 1;
        loop {
            self.fill(needed)?;
            if needed == MAX_VARINT_LEN || self.read_buf[needed - 1] & CONTINUATION == 0 {
                break;
            }
            needed += 1;
        }
        let (value, used) = decode_varint(&self.read_buf[..needed])?;
        self.read_buf.advance(used);
        Ok(value)
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.fill(len)?;
        Ok(self.read_buf.split_to(len).to_vec())
    }

    // =========================================================================
    // Writing
    // =========================================================================

    pub fn write_u8(&mut self, value: u8) {
        self.write_buf.put_u8(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_buf.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_buf.put_u64_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_buf.put_i64_le(value);
    }

    pub fn write_varint(&mut self, value: u64) {
        let mut encoded = Vec::with_capacity(MAX_VARINT_LEN);
        encode_varint(value, &mut encoded);
        self.write_buf.put_slice(&encoded);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_buf.put_slice(bytes);
    }

    /// Send everything written so far
    pub fn flush(&mut self) -> Result<()> {
        if !self.write_buf.is_empty() {
            self.inner.write_all(&self.write_buf)?;
            self.write_buf.clear();
        }
        self.inner.flush()?;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Buffer at least `len` unread bytes
    fn fill(&mut self, len: usize) -> Result<()> {
        while self.read_buf.len() < len {
            if self.refill()? == 0 {
                return Err(ArchiveError::CorruptStream(format!(
                    "stream ended with {} of {} bytes available",
                    self.read_buf.len(),
                    len
                )));
            }
        }
        Ok(())
    }

    fn refill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => {
                    self.read_buf.put_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// TCP flavour of `BinaryStream`. Dropping it disconnects.
pub struct NetworkStream {
    stream: BinaryStream<TcpStream>,
    peer: String,
    connected: bool,
}

impl NetworkStream {
    /// Connect to `addr` with a read/write timeout (0 = none)
    pub fn connect(addr: impl ToSocketAddrs, timeout_ms: u64) -> Result<Self> {
        Self::from_tcp(TcpStream::connect(addr)?, timeout_ms)
    }

    /// Wrap an accepted or connected socket
    pub fn from_tcp(socket: TcpStream, timeout_ms: u64) -> Result<Self> {
        let peer = socket
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Replies are small records; don't let Nagle hold them back
        socket.set_nodelay(true)?;

        let mut stream = Self {
            stream: BinaryStream::new(socket),
            peer,
            connected: true,
        };
        stream.set_timeout(timeout_ms)?;
        Ok(stream)
    }

    /// Apply `ms` to both directions; 0 clears the timeout
    pub fn set_timeout(&mut self, ms: u64) -> Result<()> {
        let timeout = (ms > 0).then(|| Duration::from_millis(ms));
        let socket = self.stream.get_ref();
        socket.set_read_timeout(timeout)?;
        socket.set_write_timeout(timeout)?;
        Ok(())
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer
    }

    /// Flush and shut the socket down. Errors are logged, never returned.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Err(e) = self.stream.flush() {
            tracing::debug!(peer = %self.peer, error = %e, "flush during disconnect failed");
        }
        if let Err(e) = self.stream.get_ref().shutdown(Shutdown::Both) {
            tracing::debug!(peer = %self.peer, error = %e, "shutdown during disconnect failed");
        }
    }
}

impl Deref for NetworkStream {
    type Target = BinaryStream<TcpStream>;

    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

impl DerefMut for NetworkStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stream
    }
}

impl Drop for NetworkStream {
    fn drop(&mut self) {
        self.disconnect();
    }
}
