//! tlschat-server - the chat relay daemon.
//!
//! With no arguments, listens on port 8080 and loads `cert.pem` / `key.pem`
//! from the working directory. Runs until Ctrl+C.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser as ClapParser;
use tlschat::config::ServerConfig;
use tlschat::server::{ChatServer, ServerError};
use tlschat::session::SessionRegistry;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Multi-user chat relay over TLS.
#[derive(ClapParser, Debug)]
#[command(name = "tlschat-server", version, about, long_about = None)]
struct Cli {
    /// Optional TOML config file (port, cert_path, key_path, backlog)
    #[arg(long, env = "TLSCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();
    init_tracing();

    let config = ServerConfig::resolve(cli.config.as_deref(), cli.port)?;
    tracing::debug!(?config, "resolved configuration");

    let sessions = SessionRegistry::new();
    let server = ChatServer::bind(&config, sessions).inspect_err(|e| {
        tracing::error!(error = %e, "startup failed");
    })?;

    let cancel = CancellationToken::new();
    let mut serve_handle = tokio::spawn(server.serve(cancel.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C");
            cancel.cancel();
            // Let connection tasks announce departures and send close_notify
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            match serve_handle.await {
                Ok(result) => result?,
                Err(e) => tracing::warn!(?e, "accept loop panicked"),
            }
        }
        result = &mut serve_handle => {
            match result {
                Ok(result) => result?,
                Err(e) => tracing::warn!(?e, "accept loop panicked"),
            }
        }
    }

    tracing::info!("tlschat server exiting");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tlschat=info,tlschat_server=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
