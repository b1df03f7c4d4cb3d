//! webterm-server: shared web terminal.
//!
//! Runs one PTY-backed shell and lets any number of WebSocket viewers watch
//! and drive it. New viewers get the recent output replayed on connect.

mod config;
mod server;
mod session;
mod transport;

use anyhow::Context;
use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::WebTermServer;
use session::SessionManager;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// webterm-server: shared web terminal
#[derive(Parser, Debug)]
#[command(name = "webterm-server", version, about = "Shared web terminal server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.webterm/config.toml")]
    config: String,

    /// Shell to try before the configured ones
    #[arg(long)]
    shell: Option<PathBuf>,

    /// Replay buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting webterm-server");

    let (server_config, manager) = match bootstrap(cli).await {
        Ok(parts) => parts,
        Err(e) => {
            error!(error = %format_args!("{e:#}"), "failed to start");
            std::process::exit(1);
        }
    };

    info!(
        shell = ?manager.shell(),
        state = ?manager.state(),
        alive = manager.is_alive(),
        size = ?manager.window_size(),
        "terminal session ready"
    );

    let server = WebTermServer::new(server_config, manager.clone());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                shutdown_session(manager).await;
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    shutdown_session(manager).await;
    info!("webterm-server stopped");
}

/// Load configuration and start the terminal session.
async fn bootstrap(cli: Cli) -> anyhow::Result<(ServerConfig, Arc<SessionManager>)> {
    let overrides = CliOverrides {
        host: cli.host,
        port: cli.port,
        shell: cli.shell,
        buffer_size: cli.buffer_size,
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config =
        ServerConfig::load(Some(&config_path), overrides).context("failed to load config")?;

    let manager = Arc::new(SessionManager::new(server_config.session.clone()));
    let starter = manager.clone();
    tokio::task::spawn_blocking(move || starter.initialize())
        .await
        .context("session startup task failed")?
        .context("failed to start terminal session")?;

    Ok((server_config, manager))
}

async fn shutdown_session(manager: Arc<SessionManager>) {
    if let Err(e) = tokio::task::spawn_blocking(move || manager.shutdown()).await {
        warn!(error = %e, "session shutdown task failed");
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
