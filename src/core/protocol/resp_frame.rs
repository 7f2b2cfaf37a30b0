// src/core/protocol/resp_frame.rs

//! Implements the RESP2 (REdis Serialization Protocol) frame structure and
//! the corresponding `Encoder`/`Decoder` for network communication, both
//! towards clients and towards backend instances.
//!
//! Only the RESP2 type set is implemented: `SimpleString`, `Error`,
//! `Integer`, `BulkString`, `Null`, `NullArray`, `Array`. The proxy only
//! ever forwards requests and relays backend replies verbatim, so it has
//! no need for the RESP3 Map/Set/Boolean/Double/BigNumber/VerbatimString/
//! Attribute types.

use crate::core::errors::ProxyError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits, mirroring the bounds a careful RESP decoder places
// on malicious or malformed frames.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;
/// Maximum array nesting depth the decoder will follow before giving up.
const MAX_PARSE_DEPTH: usize = 8;

/// A single frame in the RESP2 protocol: the low-level representation of
/// data exchanged between client and proxy, and between proxy and backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Builds an `Array` of `BulkString`s from a command line, the shape
    /// every request forwarded to a backend takes.
    pub fn from_command_parts(parts: impl IntoIterator<Item = Bytes>) -> Self {
        RespFrame::Array(parts.into_iter().map(RespFrame::BulkString).collect())
    }

    /// Returns the command name and argument bytes if this frame is a
    /// well-formed request (an `Array` of `BulkString`s, or a single
    /// inline-compatible value), used by the router to classify commands.
    pub fn as_command(&self) -> Option<Vec<&Bytes>> {
        match self {
            RespFrame::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        RespFrame::BulkString(b) => out.push(b),
                        _ => return None,
                    }
                }
                Some(out)
            }
            _ => None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        RespFrame::Error(msg.into())
    }

    pub fn ok() -> Self {
        RespFrame::SimpleString("OK".to_string())
    }
}

impl From<&ProxyError> for RespFrame {
    fn from(err: &ProxyError) -> Self {
        RespFrame::Error(err.to_string())
    }
}

/// A `tokio_util::codec::{Encoder,Decoder}` pair for `RespFrame`. Used both
/// by the client-facing `Framed<TcpStream, RespFrameCodec>` and by each
/// backend link's `Framed<TcpStream, RespFrameCodec>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = ProxyError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst);
        Ok(())
    }
}

fn encode_frame(frame: &RespFrame, dst: &mut BytesMut) {
    match frame {
        RespFrame::SimpleString(s) => {
            dst.extend_from_slice(b"+");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Error(s) => {
            dst.extend_from_slice(b"-");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Integer(i) => {
            dst.extend_from_slice(b":");
            dst.extend_from_slice(i.to_string().as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::BulkString(b) => {
            dst.extend_from_slice(b"$");
            dst.extend_from_slice(b.len().to_string().as_bytes());
            dst.extend_from_slice(CRLF);
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Null => {
            dst.extend_from_slice(b"$-1\r\n");
        }
        RespFrame::NullArray => {
            dst.extend_from_slice(b"*-1\r\n");
        }
        RespFrame::Array(items) => {
            dst.extend_from_slice(b"*");
            dst.extend_from_slice(items.len().to_string().as_bytes());
            dst.extend_from_slice(CRLF);
            for item in items {
                encode_frame(item, dst);
            }
        }
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut cursor = src.as_ref();
        let start_len = cursor.len();
        match parse_frame(&mut cursor, 0)? {
            Some(frame) => {
                let consumed = start_len - cursor.len();
                src.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

/// Parses one frame from `src`, advancing `src` only on a complete parse.
/// Returns `Ok(None)` when the buffer holds an incomplete frame (the caller
/// should wait for more bytes), and an error on a malformed frame.
fn parse_frame(src: &mut &[u8], depth: usize) -> Result<Option<RespFrame>, ProxyError> {
    if depth > MAX_PARSE_DEPTH {
        return Err(ProxyError::ProtocolError(
            "max array nesting depth exceeded".to_string(),
        ));
    }
    if src.is_empty() {
        return Ok(None);
    }
    let tag = src[0];
    let mut rest = &src[1..];
    let result = match tag {
        b'+' => parse_line(&mut rest)?.map(|s| RespFrame::SimpleString(s)),
        b'-' => parse_line(&mut rest)?.map(RespFrame::Error),
        b':' => match parse_line(&mut rest)? {
            Some(line) => Some(RespFrame::Integer(line.parse().map_err(|_| {
                ProxyError::ProtocolError(format!("invalid integer: {line}"))
            })?)),
            None => None,
        },
        b'$' => parse_bulk_string(&mut rest)?,
        b'*' => parse_array(&mut rest, depth)?,
        other => {
            return Err(ProxyError::ProtocolError(format!(
                "unknown frame type byte: {other:#x}"
            )));
        }
    };
    if let Some(frame) = result {
        *src = rest;
        Ok(Some(frame))
    } else {
        Ok(None)
    }
}

/// Reads up to the next CRLF, returning the line without the terminator.
/// Returns `Ok(None)` if no CRLF is present yet.
fn parse_line(src: &mut &[u8]) -> Result<Option<String>, ProxyError> {
    if let Some(pos) = find_crlf(src) {
        let line = std::str::from_utf8(&src[..pos])
            .map_err(|e| ProxyError::ProtocolError(e.to_string()))?
            .to_string();
        *src = &src[pos + CRLF_LEN..];
        Ok(Some(line))
    } else {
        Ok(None)
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn parse_bulk_string(src: &mut &[u8]) -> Result<Option<RespFrame>, ProxyError> {
    let len_line = match parse_line(src)? {
        Some(l) => l,
        None => return Ok(None),
    };
    let len: i64 = len_line
        .parse()
        .map_err(|_| ProxyError::ProtocolError(format!("invalid bulk string length: {len_line}")))?;
    if len == -1 {
        return Ok(Some(RespFrame::Null));
    }
    if len < 0 {
        return Err(ProxyError::ProtocolError(format!(
            "negative bulk string length: {len}"
        )));
    }
    let len = len as usize;
    if len > MAX_BULK_STRING_SIZE {
        return Err(ProxyError::ProtocolError(format!(
            "bulk string of {len} bytes exceeds the {MAX_BULK_STRING_SIZE}-byte limit"
        )));
    }
    if src.len() < len + CRLF_LEN {
        return Ok(None);
    }
    let data = Bytes::copy_from_slice(&src[..len]);
    if &src[len..len + CRLF_LEN] != CRLF {
        return Err(ProxyError::ProtocolError(
            "bulk string missing terminating CRLF".to_string(),
        ));
    }
    *src = &src[len + CRLF_LEN..];
    Ok(Some(RespFrame::BulkString(data)))
}

fn parse_array(src: &mut &[u8], depth: usize) -> Result<Option<RespFrame>, ProxyError> {
    let len_line = match parse_line(src)? {
        Some(l) => l,
        None => return Ok(None),
    };
    let len: i64 = len_line
        .parse()
        .map_err(|_| ProxyError::ProtocolError(format!("invalid array length: {len_line}")))?;
    if len == -1 {
        return Ok(Some(RespFrame::NullArray));
    }
    if len < 0 {
        return Err(ProxyError::ProtocolError(format!(
            "negative array length: {len}"
        )));
    }
    let len = len as usize;
    if len > MAX_FRAME_ELEMENTS {
        return Err(ProxyError::ProtocolError(format!(
            "array of {len} elements exceeds the {MAX_FRAME_ELEMENTS}-element limit"
        )));
    }
    let mut items = Vec::with_capacity(len.min(4096));
    let mut scratch = *src;
    for _ in 0..len {
        match parse_frame(&mut scratch, depth + 1)? {
            Some(item) => items.push(item),
            None => return Ok(None),
        }
    }
    *src = scratch;
    Ok(Some(RespFrame::Array(items)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: RespFrame) {
        let mut buf = BytesMut::new();
        let mut codec = RespFrameCodec;
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(frame, decoded);
        assert!(buf.is_empty());
    }

    #[test]
    fn roundtrips_simple_string() {
        roundtrip(RespFrame::SimpleString("OK".to_string()));
    }

    #[test]
    fn roundtrips_error() {
        roundtrip(RespFrame::Error("MOVED 1 127.0.0.1:7001".to_string()));
    }

    #[test]
    fn roundtrips_integer() {
        roundtrip(RespFrame::Integer(-42));
    }

    #[test]
    fn roundtrips_bulk_string() {
        roundtrip(RespFrame::BulkString(Bytes::from_static(b"hello world")));
    }

    #[test]
    fn roundtrips_null() {
        roundtrip(RespFrame::Null);
    }

    #[test]
    fn roundtrips_null_array() {
        roundtrip(RespFrame::NullArray);
    }

    #[test]
    fn roundtrips_nested_array() {
        roundtrip(RespFrame::Array(vec![
            RespFrame::BulkString(Bytes::from_static(b"SET")),
            RespFrame::BulkString(Bytes::from_static(b"key")),
            RespFrame::Array(vec![RespFrame::Integer(1), RespFrame::Null]),
        ]));
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut codec = RespFrameCodec;
        let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.as_ref(), b"$5\r\nhel");
    }

    #[test]
    fn decode_accumulates_across_calls() {
        let mut codec = RespFrameCodec;
        let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"lo\r\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, RespFrame::BulkString(Bytes::from_static(b"hello")));
    }

    #[test]
    fn rejects_depth_beyond_limit() {
        let mut nested = "*1\r\n".repeat(MAX_PARSE_DEPTH + 2);
        nested.push_str("$1\r\na\r\n");
        let mut codec = RespFrameCodec;
        let mut buf = BytesMut::from(nested.as_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn as_command_extracts_bulk_strings() {
        let frame = RespFrame::Array(vec![
            RespFrame::BulkString(Bytes::from_static(b"GET")),
            RespFrame::BulkString(Bytes::from_static(b"key")),
        ]);
        let parts = frame.as_command().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].as_ref(), b"GET");
    }
}
