use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use presence_relay::config::{DEFAULT_ADMIN_PORT, DEFAULT_WS_PORT};
use presence_relay::{Relay, RelayConfig};

/// Presence-and-push WebSocket relay.
#[derive(Parser, Debug)]
#[command(name = "presence-relay", version)]
struct Cli {
    /// Address of the client WebSocket listener
    #[arg(long, env = "RELAY_WS_ADDR", default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_WS_PORT)))]
    ws_addr: SocketAddr,

    /// Address of the admin HTTP listener
    #[arg(long, env = "RELAY_ADMIN_ADDR", default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_ADMIN_PORT)))]
    admin_addr: SocketAddr,

    /// Roles admitted at handshake (comma separated)
    #[arg(long = "role", env = "RELAY_ACCEPTED_ROLES", value_delimiter = ',', default_value = "teacher")]
    roles: Vec<String>,
}

impl Cli {
    fn into_config(self) -> RelayConfig {
        RelayConfig::new()
            .with_ws_addr(self.ws_addr)
            .with_admin_addr(self.admin_addr)
            .with_accepted_roles(self.roles)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().into_config();

    let relay = match Relay::start(config).await {
        Ok(relay) => relay,
        Err(e) => {
            error!(error = %e, "Failed to start relay");
            return ExitCode::FAILURE;
        }
    };

    info!(ws = %relay.ws_url(), admin = %relay.admin_url(), "Relay listening");

    shutdown_signal().await;
    relay.shutdown().await;

    ExitCode::SUCCESS
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
