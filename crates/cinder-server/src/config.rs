//! Server configuration.

use std::net::IpAddr;

use clap::Parser;

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 1234;

/// Command-line configuration for the server binary.
#[derive(Debug, Parser)]
#[command(name = "cinder-server", version, about = "In-memory key-value server")]
pub struct Config {
    /// Address to bind. The default is the dual-stack wildcard.
    #[arg(long, default_value = "::")]
    pub host: IpAddr,

    /// TCP port to listen on. Port 0 picks a free port.
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Worker threads for deferred destruction of large values.
    #[arg(long, default_value_t = cinder_core::WorkerPool::DEFAULT_WORKERS)]
    pub workers: usize,
}
