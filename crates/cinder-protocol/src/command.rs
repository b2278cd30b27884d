//! Command parsing from request frames.
//!
//! Converts the raw string array of a [`Request`] into a typed
//! [`Command`]. This keeps protocol-level concerns separate from the
//! executor that actually runs commands against the keyspace.
//!
//! Dispatch is by name and arity together: a known verb with the wrong
//! number of arguments is as unknown as a misspelled one. Numeric
//! arguments that fail to parse report which argument was bad.

use bytes::Bytes;

use crate::request::Request;
use crate::response::{ErrorCode, Response};

/// A parsed client command, ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `get <key>`. Returns the string value or nil.
    Get { key: Bytes },
    /// `set <key> <value>`. Creates or overwrites; clears any TTL.
    Set { key: Bytes, value: Bytes },
    /// `del <key>`. Returns the number of keys removed.
    Del { key: Bytes },
    /// `keys`. Returns every key in unspecified order.
    Keys,
    /// `zadd <key> <score> <name>`. Upserts one pair into a sorted set.
    ZAdd { key: Bytes, score: f64, name: Bytes },
    /// `zscore <key> <name>`. Returns the stringified score or nil.
    ZScore { key: Bytes, name: Bytes },
    /// `zrem <key> <name>`. Removes one pair from a sorted set.
    ZRem { key: Bytes, name: Bytes },
    /// `zquery <key> <score> <name> <offset> <limit>`. Range scan from
    /// `(score, name)` inclusive; `limit == 0` means unbounded.
    ZQuery {
        key: Bytes,
        score: f64,
        name: Bytes,
        offset: u64,
        limit: u64,
    },
    /// `zrank <key> <name>`. 0-based position in sorted order, or nil.
    ZRank { key: Bytes, name: Bytes },
    /// `expire <key> <seconds>`. Sets an absolute expiry on the key.
    Expire { key: Bytes, seconds: i64 },
    /// `ttl <key>`. Remaining seconds, -1 without TTL, -2 without key.
    Ttl { key: Bytes },
    /// `persist <key>`. Clears the TTL without touching the value.
    Persist { key: Bytes },
}

/// Why a request failed to parse into a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown verb, or a known verb with the wrong arity.
    Unknown,
    /// A numeric argument failed to parse; carries the argument name.
    InvalidArg(&'static str),
}

impl From<CommandError> for Response {
    fn from(err: CommandError) -> Response {
        match err {
            CommandError::Unknown => {
                Response::Err(ErrorCode::Unknown, "unknown command".into())
            }
            CommandError::InvalidArg(what) => {
                Response::Err(ErrorCode::InvalidArg, format!("invalid {what} argument"))
            }
        }
    }
}

impl Command {
    /// Parses a request into a command.
    pub fn from_request(request: &Request) -> Result<Command, CommandError> {
        let cmd = request.cmd();
        let name = cmd.first().ok_or(CommandError::Unknown)?;
        let name = name.to_ascii_lowercase();

        match (name.as_slice(), cmd.len()) {
            (b"keys", 1) => Ok(Command::Keys),
            (b"get", 2) => Ok(Command::Get {
                key: cmd[1].clone(),
            }),
            (b"del", 2) => Ok(Command::Del {
                key: cmd[1].clone(),
            }),
            (b"ttl", 2) => Ok(Command::Ttl {
                key: cmd[1].clone(),
            }),
            (b"persist", 2) => Ok(Command::Persist {
                key: cmd[1].clone(),
            }),
            (b"set", 3) => Ok(Command::Set {
                key: cmd[1].clone(),
                value: cmd[2].clone(),
            }),
            (b"zscore", 3) => Ok(Command::ZScore {
                key: cmd[1].clone(),
                name: cmd[2].clone(),
            }),
            (b"zrem", 3) => Ok(Command::ZRem {
                key: cmd[1].clone(),
                name: cmd[2].clone(),
            }),
            (b"zrank", 3) => Ok(Command::ZRank {
                key: cmd[1].clone(),
                name: cmd[2].clone(),
            }),
            (b"expire", 3) => Ok(Command::Expire {
                key: cmd[1].clone(),
                seconds: parse_num(&cmd[2], "seconds")?,
            }),
            (b"zadd", 4) => Ok(Command::ZAdd {
                key: cmd[1].clone(),
                score: parse_num(&cmd[2], "score")?,
                name: cmd[3].clone(),
            }),
            (b"zquery", 6) => Ok(Command::ZQuery {
                key: cmd[1].clone(),
                score: parse_num(&cmd[2], "score")?,
                name: cmd[3].clone(),
                offset: parse_num(&cmd[4], "offset")?,
                limit: parse_num(&cmd[5], "limit")?,
            }),
            _ => Err(CommandError::Unknown),
        }
    }
}

/// Parses a numeric argument, naming it in the error on failure.
fn parse_num<T: std::str::FromStr>(
    raw: &[u8],
    what: &'static str,
) -> Result<T, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::InvalidArg(what))
}
