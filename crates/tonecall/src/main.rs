//! tonecall: a minimal SIP user agent server
//!
//! Answers every INVITE with 100 Trying, 180 Ringing and, after the ring
//! delay, 200 OK with an SDP answer. Once the ACK arrives it plays a tone (or
//! simulates one with `--headless`) until the caller hangs up.

mod cli;
mod logging;
mod sender;
mod server;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use crate::cli::Args;
use crate::logging::{setup_logging, LoggingConfig};
use crate::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&LoggingConfig::new(&args.log_level, args.json_logs)?)?;
    info!("Starting tonecall v{}", env!("CARGO_PKG_VERSION"));

    let config = args.call_config()?;
    let bind = args.bind_addr(&config);
    info!(
        "Advertising {} (ring delay {:?}, call duration {:?}, {:?} audio, {:?} on timeout)",
        config.media_ip(),
        config.ring_delay,
        config.call_duration,
        config.audio.mode,
        config.duration_policy
    );

    let server = Server::bind(bind, config).await?;
    server.run(shutdown_signal()).await
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
