use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use cinder_server::{Config, Server};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinder_server=info,cinder_core=info".into()),
        )
        .init();

    let config = Config::parse();

    let mut server = match Server::bind(config.host, config.port, config.workers) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to start server on {}:{}: {e}", config.host, config.port);
            return ExitCode::FAILURE;
        }
    };

    match server.local_addr() {
        Ok(addr) => info!("listening on {addr}"),
        Err(e) => {
            error!("failed to resolve listener address: {e}");
            return ExitCode::FAILURE;
        }
    }

    // only a readiness-wait failure gets here; everything else is
    // isolated to a single connection
    if let Err(e) = server.run() {
        error!("event loop failed: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
