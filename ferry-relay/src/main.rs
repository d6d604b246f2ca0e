//! ferry-relay binary entry point.
//!
//! Usage:
//! ```bash
//! ferry-relay --config ferry.toml
//! ferry-relay --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use ferry_relay::cleanup::spawn_cleanup_task;
use ferry_relay::config::Config;
use ferry_relay::http::{build_router, health};
use ferry_relay::server::FerryRelay;
use ferry_relay::ssh::{load_host_key, SshFrontEnd};
use std::future::IntoFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Ephemeral SSH-upload, single-use HTTP-download relay.
#[derive(Parser, Debug)]
#[command(name = "ferry-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "ferry.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.server.base_url,
        "Starting ferry-relay"
    );

    let host_key = load_host_key(config.ssh.host_key_path.as_deref())
        .context("Failed to prepare SSH host key")?;
    let relay = Arc::new(FerryRelay::standalone(config));
    health::init_start_time();

    let cleanup = spawn_cleanup_task(Arc::clone(&relay), relay.config().cleanup.clone());

    let http_address = relay.config().http.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&http_address)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {http_address}"))?;
    tracing::info!("HTTP listening on {}", http_address);
    let app = build_router(Arc::clone(&relay));

    let ssh = SshFrontEnd::new(Arc::clone(&relay));

    let result = tokio::select! {
        served = axum::serve(listener, app).into_future() => served.context("HTTP server failed"),
        ssh_result = ssh.run(host_key) => ssh_result.context("SSH server failed"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
            Ok(())
        }
    };

    cleanup.abort();
    tracing::info!(
        dropped_tunnels = relay.active_tunnels(),
        "ferry-relay stopped"
    );
    result
}

/// Read the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::warn!(
            path = %path.display(),
            "Config file not found, using defaults"
        );
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    tracing::info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}
