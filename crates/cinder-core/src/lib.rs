//! cinder-core: the storage engine.
//!
//! Owns the keyspace, the two value shapes (byte strings and sorted
//! sets), and the worker pool that absorbs expensive destructor work.
//! Everything here is single-threaded by design — the event loop is the
//! only mutator — except the pool, whose workers only ever receive
//! values that have already been removed from the keyspace.

pub mod keyspace;
pub mod pool;
pub mod time;
pub mod types;

pub use keyspace::{dispose_value, Entry, Keyspace, LARGE_ZSET_SIZE};
pub use pool::WorkerPool;
pub use types::{SortedSet, Value};
