//! Protocol codec
//!
//! Reads and writes requests and responses on a `BinaryStream`. Writers only
//! buffer; callers flush once per request or response batch.

use std::io::{Read, Write};

use super::{Request, RequestType, Response, END, ERROR, MAX_FILTER_POINTS, MAX_MESSAGE_LEN, RECORD};
use crate::error::{ArchiveError, Result};
use crate::network::BinaryStream;
use crate::types::{Key, Value};

// =============================================================================
// Requests
// =============================================================================

pub fn write_request<S: Read + Write>(stream: &mut BinaryStream<S>, request: &Request) {
    stream.write_u8(request.request_type() as u8);
    match request {
        Request::Scan {
            stream: id,
            start,
            end,
            points,
        } => {
            stream.write_u32(*id);
            write_key(stream, start);
            write_key(stream, end);
            stream.write_varint(points.len() as u64);
            for point in points {
                stream.write_varint(*point);
            }
        }
        Request::Ping => {}
        Request::Get { stream: id, key } => {
            stream.write_u32(*id);
            write_key(stream, key);
        }
    }
}

/// Read the next request; `None` when the peer closed between requests
pub fn read_request<S: Read + Write>(stream: &mut BinaryStream<S>) -> Result<Option<Request>> {
    if stream.at_end()? {
        return Ok(None);
    }

    let op = stream.read_u8()?;
    let request = match RequestType::from_u8(op) {
        Some(RequestType::Scan) => {
            let id = stream.read_u32()?;
            let start = read_key(stream)?;
            let end = read_key(stream)?;
            let count = stream.read_varint()?;
            if count > MAX_FILTER_POINTS {
                return Err(ArchiveError::Protocol(format!(
                    "scan filter of {} points exceeds limit of {}",
                    count, MAX_FILTER_POINTS
                )));
            }
            let points = (0..count)
                .map(|_| stream.read_varint())
                .collect::<Result<Vec<_>>>()?;
            Request::Scan {
                stream: id,
                start,
                end,
                points,
            }
        }
        Some(RequestType::Ping) => Request::Ping,
        Some(RequestType::Get) => {
            let id = stream.read_u32()?;
            let key = read_key(stream)?;
            Request::Get { stream: id, key }
        }
        None => {
            return Err(ArchiveError::Protocol(format!(
                "unknown request type: 0x{:02x}",
                op
            )))
        }
    };
    Ok(Some(request))
}

// =============================================================================
// Responses
// =============================================================================

pub fn write_response<S: Read + Write>(stream: &mut BinaryStream<S>, response: &Response) {
    match response {
        Response::Record(key, value) => {
            stream.write_u8(RECORD);
            write_key(stream, key);
            write_value(stream, value);
        }
        Response::End => stream.write_u8(END),
        Response::Error(message) => {
            let bytes = message.as_bytes();
            let len = bytes.len().min(MAX_MESSAGE_LEN as usize);
            stream.write_u8(ERROR);
            stream.write_varint(len as u64);
            stream.write_bytes(&bytes[..len]);
        }
    }
}

pub fn read_response<S: Read + Write>(stream: &mut BinaryStream<S>) -> Result<Response> {
    match stream.read_u8()? {
        RECORD => {
            let key = read_key(stream)?;
            let value = read_value(stream)?;
            Ok(Response::Record(key, value))
        }
        END => Ok(Response::End),
        ERROR => {
            let len = stream.read_varint()?;
            if len > MAX_MESSAGE_LEN {
                return Err(ArchiveError::Protocol(format!(
                    "error message of {} bytes exceeds limit",
                    len
                )));
            }
            let bytes = stream.read_bytes(len as usize)?;
            Ok(Response::Error(String::from_utf8_lossy(&bytes).into_owned()))
        }
        other => Err(ArchiveError::Protocol(format!(
            "unknown response marker: 0x{:02x}",
            other
        ))),
    }
}

// =============================================================================
// Fields
// =============================================================================

fn write_key<S: Read + Write>(stream: &mut BinaryStream<S>, key: &Key) {
    stream.write_varint(key.timestamp);
    stream.write_varint(key.point_id);
}

fn read_key<S: Read + Write>(stream: &mut BinaryStream<S>) -> Result<Key> {
    Ok(Key::new(stream.read_varint()?, stream.read_varint()?))
}

fn write_value<S: Read + Write>(stream: &mut BinaryStream<S>, value: &Value) {
    stream.write_varint(value.value);
    stream.write_varint(value.flags);
}

fn read_value<S: Read + Write>(stream: &mut BinaryStream<S>) -> Result<Value> {
    Ok(Value::new(stream.read_varint()?, stream.read_varint()?))
}
