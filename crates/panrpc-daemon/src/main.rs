//! panrpcd: shared path-selection and connection-telemetry policy daemon.
//!
//! Usage: `panrpcd [config.yaml]` (default `panrpcd.yaml`).
//! - Listens on a Unix socket (`daemon.socket_path`)
//! - Hosts one policy script for every client process
//! - Stops on Ctrl-C and removes its socket

use std::process::ExitCode;

use tracing_subscriber::{fmt, EnvFilter};

use panrpc_daemon::{config, Daemon};

const DEFAULT_CONFIG: &str = "panrpcd.yaml";

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let cfg = match config::load_from_file(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(config = %path, error = %e, "config load failed");
            return ExitCode::FAILURE;
        }
    };

    let daemon = match Daemon::bind(cfg) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "panrpcd startup failed");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    match daemon.run_until(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "panrpcd failed");
            ExitCode::FAILURE
        }
    }
}
