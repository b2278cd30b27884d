//! Request framing.
//!
//! A request is an array of byte strings that together form one command.
//! On the wire:
//!
//! ```text
//! | payload len (u32) | array len (u32) | str1 len (u32) | str1 | ... |
//! ```
//!
//! All integers are little-endian. The payload length counts every byte
//! after itself. The parser operates on a buffered byte slice and never
//! consumes input itself — the caller advances its buffer by the returned
//! count, which lets it retry with the same bytes once more data arrives.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::{HEADER_SIZE, MAX_PAYLOAD};

/// Size of the array-length and per-string length fields.
const LEN_SIZE: usize = 4;

/// A single client command, decomposed into its individual strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    cmd: Vec<Bytes>,
}

impl Request {
    /// Creates a request from the command's parts, e.g. `["set", "k", "v"]`.
    pub fn new(cmd: Vec<Bytes>) -> Self {
        Self { cmd }
    }

    /// The command parts in order.
    pub fn cmd(&self) -> &[Bytes] {
        &self.cmd
    }

    /// Consumes the request, returning the command parts.
    pub fn into_cmd(self) -> Vec<Bytes> {
        self.cmd
    }

    /// Number of bytes following the payload-length header.
    fn payload_len(&self) -> usize {
        LEN_SIZE
            + self
                .cmd
                .iter()
                .map(|part| LEN_SIZE + part.len())
                .sum::<usize>()
    }

    /// Frames this request into `dst`.
    ///
    /// Refuses to emit a request whose payload exceeds [`MAX_PAYLOAD`],
    /// since the peer would drop the connection rather than parse it.
    pub fn marshal(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload = self.payload_len();
        if payload > MAX_PAYLOAD {
            return Err(ProtocolError::TooBig);
        }

        dst.reserve(HEADER_SIZE + payload);
        dst.put_u32_le(payload as u32);
        dst.put_u32_le(self.cmd.len() as u32);
        for part in &self.cmd {
            dst.put_u32_le(part.len() as u32);
            dst.put_slice(part);
        }
        Ok(())
    }

    /// Tries to parse one complete request from the front of `buf`.
    ///
    /// Returns `Ok(Some((request, consumed)))` when the buffer holds a
    /// complete frame, `Ok(None)` when more data is needed, or an error
    /// when the frame is oversized or internally inconsistent (in both
    /// cases the connection should be closed — the stream position can
    /// no longer be trusted).
    pub fn unmarshal(buf: &[u8]) -> Result<Option<(Request, usize)>, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let payload = read_u32_at(buf, 0) as usize;
        if payload > MAX_PAYLOAD {
            return Err(ProtocolError::TooBig);
        }
        if buf.len() < HEADER_SIZE + payload {
            return Ok(None);
        }

        let mut body = &buf[HEADER_SIZE..HEADER_SIZE + payload];
        let count = take_u32(&mut body)? as usize;

        // each string needs at least its length field, so a count larger
        // than the remaining bytes can never be satisfied
        if count.saturating_mul(LEN_SIZE) > body.len() {
            return Err(ProtocolError::Malformed("string count exceeds payload"));
        }

        let mut cmd = Vec::with_capacity(count);
        for _ in 0..count {
            let len = take_u32(&mut body)? as usize;
            if body.len() < len {
                return Err(ProtocolError::Malformed("string length exceeds payload"));
            }
            let (data, rest) = body.split_at(len);
            cmd.push(Bytes::copy_from_slice(data));
            body = rest;
        }

        if !body.is_empty() {
            return Err(ProtocolError::Malformed("trailing bytes in payload"));
        }

        Ok(Some((Request { cmd }, HEADER_SIZE + payload)))
    }
}

/// Reads a little-endian u32 at a fixed offset. The caller has already
/// checked the bounds.
fn read_u32_at(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

/// Pops a little-endian u32 from the front of `body`.
fn take_u32(body: &mut &[u8]) -> Result<u32, ProtocolError> {
    if body.len() < 4 {
        return Err(ProtocolError::Malformed("truncated length field"));
    }
    let val = read_u32_at(body, 0);
    *body = &body[4..];
    Ok(val)
}
