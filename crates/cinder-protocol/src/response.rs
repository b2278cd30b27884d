//! Response framing and the human-readable projection.
//!
//! A response is a small tagged tree. On the wire:
//!
//! ```text
//! | payload len (u32) | tag (u8) | tag-specific body |
//! ```
//!
//! | tag | variant | body |
//! |-----|---------|------|
//! | 0 | Nil | empty |
//! | 1 | Err | error code (u8) + nested Str response |
//! | 2 | Str | len (u32) + bytes |
//! | 3 | Int | i64 |
//! | 4 | Dbl | f64 |
//! | 5 | Arr | count (u32) + count serialized responses |
//!
//! All numbers are little-endian. Serialization writes directly into a
//! `BytesMut` with no intermediate allocations; parsing exists for the
//! client side and tests.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::{HEADER_SIZE, MAX_PAYLOAD};

/// Maximum nesting depth accepted when parsing arrays. The server only
/// ever produces flat arrays; the guard protects the client from
/// malicious peers.
const MAX_NESTING_DEPTH: usize = 64;

const TAG_NIL: u8 = 0;
const TAG_ERR: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_DBL: u8 = 4;
const TAG_ARR: u8 = 5;

/// Machine-readable error category carried by an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// Unknown command name or arity.
    Unknown = 0,
    /// A frame exceeded the size limit.
    TooBig = 1,
    /// Operation against a key holding the wrong kind of value.
    BadType = 2,
    /// An argument failed to parse.
    InvalidArg = 3,
}

impl ErrorCode {
    fn from_u8(raw: u8) -> Result<Self, ProtocolError> {
        match raw {
            0 => Ok(ErrorCode::Unknown),
            1 => Ok(ErrorCode::TooBig),
            2 => Ok(ErrorCode::BadType),
            3 => Ok(ErrorCode::InvalidArg),
            _ => Err(ProtocolError::Malformed("unknown error code")),
        }
    }
}

/// A single server response.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The absence of a value.
    Nil,
    /// An error with a machine-readable code and a message.
    Err(ErrorCode, String),
    /// A byte string.
    Str(Bytes),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit float.
    Dbl(f64),
    /// An ordered list of responses.
    Arr(Vec<Response>),
}

impl Response {
    /// The canonical `"OK"` string response.
    pub fn ok() -> Self {
        Response::Str(Bytes::from_static(b"OK"))
    }

    /// Size of the serialized body (tag included, length header excluded).
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Response::Nil => 0,
            // code byte + nested Str response
            Response::Err(_, msg) => 1 + (1 + 4 + msg.len()),
            Response::Str(data) => 4 + data.len(),
            Response::Int(_) | Response::Dbl(_) => 8,
            Response::Arr(items) => 4 + items.iter().map(Response::encoded_len).sum::<usize>(),
        }
    }

    /// Frames this response into `dst`, header included.
    ///
    /// Fails with [`ProtocolError::TooBig`] — and writes nothing — when
    /// the body would exceed [`MAX_PAYLOAD`]. The caller substitutes an
    /// error response and closes the connection after draining.
    pub fn marshal(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = self.encoded_len();
        if len > MAX_PAYLOAD {
            return Err(ProtocolError::TooBig);
        }

        dst.reserve(HEADER_SIZE + len);
        dst.put_u32_le(len as u32);
        self.serialize(dst);
        Ok(())
    }

    /// Writes the tag and body, without the length header. Arrays recurse.
    fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Response::Nil => dst.put_u8(TAG_NIL),
            Response::Err(code, msg) => {
                dst.put_u8(TAG_ERR);
                dst.put_u8(*code as u8);
                Response::Str(Bytes::copy_from_slice(msg.as_bytes())).serialize(dst);
            }
            Response::Str(data) => {
                dst.put_u8(TAG_STR);
                dst.put_u32_le(data.len() as u32);
                dst.put_slice(data);
            }
            Response::Int(n) => {
                dst.put_u8(TAG_INT);
                dst.put_i64_le(*n);
            }
            Response::Dbl(d) => {
                dst.put_u8(TAG_DBL);
                dst.put_f64_le(*d);
            }
            Response::Arr(items) => {
                dst.put_u8(TAG_ARR);
                dst.put_u32_le(items.len() as u32);
                for item in items {
                    item.serialize(dst);
                }
            }
        }
    }

    /// Tries to parse one complete response from the front of `buf`.
    ///
    /// Same contract as [`crate::Request::unmarshal`]: `Ok(None)` until a
    /// complete frame is buffered, then the response plus the number of
    /// bytes consumed.
    pub fn unmarshal(buf: &[u8]) -> Result<Option<(Response, usize)>, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut raw = [0u8; 4];
        raw.copy_from_slice(&buf[..4]);
        let payload = u32::from_le_bytes(raw) as usize;
        if payload > MAX_PAYLOAD {
            return Err(ProtocolError::TooBig);
        }
        if buf.len() < HEADER_SIZE + payload {
            return Ok(None);
        }

        let mut body = &buf[HEADER_SIZE..HEADER_SIZE + payload];
        let response = parse(&mut body, 0)?;
        if !body.is_empty() {
            return Err(ProtocolError::Malformed("trailing bytes in payload"));
        }

        Ok(Some((response, HEADER_SIZE + payload)))
    }
}

/// Parses one response from the front of `body`, advancing it.
fn parse(body: &mut &[u8], depth: usize) -> Result<Response, ProtocolError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ProtocolError::Malformed("array nesting too deep"));
    }

    match take_u8(body)? {
        TAG_NIL => Ok(Response::Nil),
        TAG_ERR => {
            let code = ErrorCode::from_u8(take_u8(body)?)?;
            match parse(body, depth + 1)? {
                Response::Str(msg) => Ok(Response::Err(
                    code,
                    String::from_utf8_lossy(&msg).into_owned(),
                )),
                _ => Err(ProtocolError::Malformed("error body is not a string")),
            }
        }
        TAG_STR => {
            let len = take_u32(body)? as usize;
            if body.len() < len {
                return Err(ProtocolError::Malformed("string length exceeds payload"));
            }
            let (data, rest) = body.split_at(len);
            let data = Bytes::copy_from_slice(data);
            *body = rest;
            Ok(Response::Str(data))
        }
        TAG_INT => {
            let raw = take_array::<8>(body)?;
            Ok(Response::Int(i64::from_le_bytes(raw)))
        }
        TAG_DBL => {
            let raw = take_array::<8>(body)?;
            Ok(Response::Dbl(f64::from_le_bytes(raw)))
        }
        TAG_ARR => {
            let count = take_u32(body)? as usize;
            // every element is at least one tag byte
            if count > body.len() {
                return Err(ProtocolError::Malformed("array count exceeds payload"));
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(parse(body, depth + 1)?);
            }
            Ok(Response::Arr(items))
        }
        _ => Err(ProtocolError::Malformed("unknown response tag")),
    }
}

fn take_u8(body: &mut &[u8]) -> Result<u8, ProtocolError> {
    let raw = take_array::<1>(body)?;
    Ok(raw[0])
}

fn take_u32(body: &mut &[u8]) -> Result<u32, ProtocolError> {
    let raw = take_array::<4>(body)?;
    Ok(u32::from_le_bytes(raw))
}

fn take_array<const N: usize>(body: &mut &[u8]) -> Result<[u8; N], ProtocolError> {
    if body.len() < N {
        return Err(ProtocolError::Malformed("truncated field"));
    }
    let mut raw = [0u8; N];
    raw.copy_from_slice(&body[..N]);
    *body = &body[N..];
    Ok(raw)
}

/// The projection used by the command-line client:
/// `(nil)`, `(integer) N`, `(string) S`, `(double) D` (six decimals),
/// `(error) MSG`, and arrays as a `len=` header, one line per element,
/// and an `end` footer.
impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Nil => write!(f, "(nil)"),
            Response::Err(_, msg) => write!(f, "(error) {msg}"),
            Response::Str(data) => write!(f, "(string) {}", String::from_utf8_lossy(data)),
            Response::Int(n) => write!(f, "(integer) {n}"),
            Response::Dbl(d) => write!(f, "(double) {d:.6}"),
            Response::Arr(items) => {
                writeln!(f, "(array) len={}", items.len())?;
                for item in items {
                    writeln!(f, "{item}")?;
                }
                write!(f, "(array) end")
            }
        }
    }
}
