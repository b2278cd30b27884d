//! The keyspace: cinder's core key-value store.
//!
//! A `Keyspace` owns a flat `AHashMap<Bytes, Entry>` and exposes point
//! lookups, removal (which transfers entry ownership to the caller),
//! and bulk key iteration. TTL state lives on the entry as an absolute
//! monotonic deadline; the timer manager mirrors that deadline in its
//! expiry index, and the executor keeps the two in step.

use ahash::AHashMap;
use bytes::Bytes;
use tracing::debug;

use crate::pool::WorkerPool;
use crate::time::NO_EXPIRY;
use crate::types::Value;

/// Sorted sets at or above this many pairs are dropped on the worker
/// pool instead of inline, so a single `del` can't stall the event loop
/// on a long destructor chain.
pub const LARGE_ZSET_SIZE: usize = 1000;

/// A single entry in the keyspace: a value plus optional expiration.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    /// Monotonic expiry timestamp in ms. 0 = no expiry. Doubles as the
    /// handle into the timer manager's TTL index: the entry is indexed
    /// there under exactly this deadline, or not at all when unset.
    pub expires_at_ms: u64,
}

impl Entry {
    /// Creates an entry with no expiration.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at_ms: NO_EXPIRY,
        }
    }

    /// Returns `true` if this entry carries a TTL.
    pub fn has_expiry(&self) -> bool {
        self.expires_at_ms != NO_EXPIRY
    }
}

/// The shared keyspace. All access is from the event-loop thread.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: AHashMap<Bytes, Entry>,
}

impl Keyspace {
    /// Creates an empty keyspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an entry by key.
    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Looks up an entry by key for mutation.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        self.entries.get_mut(key)
    }

    /// Inserts an entry. The caller has already established that the key
    /// is absent (or intends to replace it; the previous entry is
    /// returned either way).
    pub fn insert(&mut self, key: Bytes, entry: Entry) -> Option<Entry> {
        self.entries.insert(key, entry)
    }

    /// Removes an entry, transferring ownership to the caller. The
    /// caller is responsible for cancelling any TTL timer and for
    /// disposing of the value (see [`dispose_value`]).
    pub fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        self.entries.remove(key)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the keyspace holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all keys in unspecified order.
    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        self.entries.keys()
    }
}

/// Disposes of a value that has been removed from the keyspace.
///
/// Large sorted sets are handed to the worker pool, which owns them
/// until their destructor has run; everything else drops inline. The
/// caller must have already cancelled the entry's TTL timer, so the
/// worker receives a fully self-contained object.
pub fn dispose_value(value: Value, pool: &WorkerPool) {
    if let Value::Zset(set) = &value {
        if set.len() >= LARGE_ZSET_SIZE {
            debug!(pairs = set.len(), "deferring large sorted set drop to the worker pool");
            pool.submit(move || drop(value));
            return;
        }
    }
    // small values drop here
}
