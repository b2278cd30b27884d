//! Protocol error types for framing and parsing.

use thiserror::Error;

/// Errors that can occur when marshaling or unmarshaling wire frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame payload exceeds [`crate::MAX_PAYLOAD`]. On the inbound
    /// path the framing can no longer be trusted and the connection
    /// should be closed; on the outbound path the caller substitutes an
    /// error response.
    #[error("payload exceeds the size limit")]
    TooBig,

    /// The frame's interior structure contradicts its length header
    /// (truncated fields, trailing bytes, unknown tags).
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}
