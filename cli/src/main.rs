//! relay: install MCP providers, bridge each to a local port and serve them
//! behind one HTTP endpoint.
//!
//! `relay ./mcp-servers.json` reads the provider list, builds the workspace,
//! starts one adapter per provider and then serves until Ctrl-C.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nimbus_relay::config::{DEFAULT_INTERNAL_PORT_START, DEFAULT_PORT};
use nimbus_relay::{Relay, RelayConfig, RelaySettings};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Serve a list of stdio MCP providers behind one HTTP endpoint.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Cli {
    /// Path to the servers configuration file (JSON, or TOML with a .toml extension)
    config: Option<PathBuf>,
    /// Public HTTP port
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// First internal port; provider N listens on start + N
    #[arg(long, default_value_t = DEFAULT_INTERNAL_PORT_START)]
    internal_port_start: u16,
    /// Workspace directory, wiped on every run [default: <data dir>/nimbus-relay/workspace]
    #[arg(long)]
    workspace: Option<PathBuf>,
    /// Version-control client
    #[arg(long, default_value = "git")]
    git: PathBuf,
    /// Package manager
    #[arg(long, default_value = "pnpm")]
    pnpm: PathBuf,
    /// Stdio-to-socket adapter
    #[arg(long, default_value = "supergateway")]
    adapter: PathBuf,
    /// Base URL that `github:` specifiers are cloned from
    #[arg(long, default_value = "https://github.com")]
    repository_host: String,
    /// Seconds to wait for each adapter's port; 0 skips the readiness check
    #[arg(long, default_value_t = 30)]
    readiness_timeout_secs: u64,
}

impl Cli {
    fn settings(&self) -> RelaySettings {
        let workspace = self.workspace.clone().unwrap_or_else(default_workspace);
        let mut settings = RelaySettings::new(workspace);
        settings.host = self.host.clone();
        settings.port = self.port;
        settings.internal_port_start = self.internal_port_start;
        settings.git_program = self.git.clone();
        settings.pnpm_program = self.pnpm.clone();
        settings.adapter_program = self.adapter.clone();
        settings.repository_host = self.repository_host.clone();
        settings.readiness_timeout = Duration::from_secs(self.readiness_timeout_secs);
        settings
    }
}

fn default_workspace() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("nimbus-relay")
        .join("workspace")
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env first so PORT and ${VAR} references can come from it
    dotenv::dotenv().ok();

    // Initialize tracing with env filter (RUST_LOG controls verbosity)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .context("No servers configuration file argument provided")?;

    let cancel = CancellationToken::new();

    // Ctrl-C handler: cancels the root token for graceful shutdown
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down relay");
        cancel_for_signal.cancel();
    });

    let config = RelayConfig::load(&config_path)
        .await
        .context("Failed to start MCP server")?;

    let relay = tokio::select! {
        result = Relay::bootstrap(config, cli.settings(), &cancel) => {
            result.context("Failed to start MCP server")?
        }
        _ = cancel.cancelled() => {
            anyhow::bail!("interrupted during startup");
        }
    };

    let address = relay.settings().bind_address();
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            relay.shutdown();
            return Err(anyhow::anyhow!("Failed to bind {}: {}", address, e));
        }
    };
    let port = listener.local_addr()?.port();

    println!("MCP Server is running on port {}", port);
    println!("running servers:");
    for url in relay.provider_urls(port) {
        println!("  {}", url);
    }

    relay.serve(listener).await?;
    Ok(())
}
