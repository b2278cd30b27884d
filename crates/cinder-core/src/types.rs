//! Value shapes stored in the keyspace.

pub mod sorted_set;

use bytes::Bytes;
pub use sorted_set::SortedSet;

/// The value held by a keyspace entry. Exactly one shape is live; the
/// enum discriminant doubles as the type tag the command surface
/// enforces.
#[derive(Debug, Clone)]
pub enum Value {
    /// An opaque byte string.
    Str(Bytes),
    /// A sorted set of (score, name) pairs.
    Zset(SortedSet),
}

impl Value {
    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Zset(_) => "sorted set",
        }
    }
}
