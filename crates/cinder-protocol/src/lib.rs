//! cinder-protocol: length-prefixed binary wire protocol.
//!
//! A request is an array of byte strings; a response is a small tagged
//! tree (nil, error, string, integer, double, array). Both directions
//! are framed with a 4-byte little-endian payload length so the caller
//! can accumulate bytes from a non-blocking socket and retry until a
//! complete frame arrives.
//!
//! # quick start
//!
//! ```
//! use bytes::{Bytes, BytesMut};
//! use cinder_protocol::{Request, Response};
//!
//! // frame a request
//! let req = Request::new(vec![Bytes::from_static(b"get"), Bytes::from_static(b"name")]);
//! let mut buf = BytesMut::new();
//! req.marshal(&mut buf).unwrap();
//!
//! // and recover it from the raw bytes
//! let (parsed, consumed) = Request::unmarshal(&buf).unwrap().unwrap();
//! assert_eq!(parsed, req);
//! assert_eq!(consumed, buf.len());
//!
//! // responses render a human-readable projection
//! assert_eq!(Response::Int(1).to_string(), "(integer) 1");
//! ```

pub mod command;
pub mod error;
pub mod request;
pub mod response;

pub use command::{Command, CommandError};
pub use error::ProtocolError;
pub use request::Request;
pub use response::{ErrorCode, Response};

/// Maximum payload size of a single frame, in either direction. A request
/// whose header declares more than this is unrecoverable (the stream can
/// no longer be trusted); a response that would encode larger is replaced
/// with an error by the server.
pub const MAX_PAYLOAD: usize = 4096;

/// Size of the payload-length header that precedes every frame.
pub const HEADER_SIZE: usize = 4;
