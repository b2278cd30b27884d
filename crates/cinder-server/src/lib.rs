//! cinder-server: the server engine.
//!
//! A single-threaded, readiness-driven event loop drives every
//! connection, the keyspace, and both timer disciplines; the only
//! blocking point is the `poll` call at the top of each tick. Expensive
//! destructor work is handed to the worker pool in `cinder-core`.

pub mod config;
pub mod conn;
pub mod executor;
pub mod server;
pub mod timers;

pub use config::Config;
pub use server::Server;
