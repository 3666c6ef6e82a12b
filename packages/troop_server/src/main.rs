use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;

use troop_server::config::{FileConfig, RelayConfig, TroopDirs, load_config};
use troop_server::RelayServer;

#[derive(Parser)]
#[command(name = "troop-server")]
#[command(about = "Relay server for collaborative live coding")]
struct Cli {
    /// Port to listen on (the next free port is used if it is busy)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Shared performer password
    #[arg(long, conflicts_with = "ask_password")]
    password: Option<String>,

    /// Prompt for the performer password at startup
    #[arg(long)]
    ask_password: bool,

    /// Record every relayed message to a session log
    #[arg(short, long)]
    log: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Custom data directory (defaults to ~/.troop)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn prompt_password() -> Result<String> {
    print!("Password (leave blank for none): ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Failed to read password")?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "troop_server=debug,info"
    } else {
        "troop_server=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let dirs = TroopDirs::new(cli.data_dir)?;
    let mut fc: FileConfig = load_config(&dirs.data_dir)
        .extract()
        .with_context(|| format!("Invalid config in {:?}", dirs.config_toml_path()))?;

    if let Some(port) = cli.port {
        fc.server.port = port;
    }
    if let Some(host) = cli.host {
        fc.server.host = host;
    }
    if let Some(password) = cli.password {
        fc.server.password = password;
    }
    if cli.ask_password {
        fc.server.password = prompt_password()?;
    }
    if cli.log {
        fc.log.enabled = true;
    }

    let config = RelayConfig::from_file(&fc, &dirs.logs_dir);
    let server = RelayServer::bind(config)
        .await
        .context("Failed to start relay")?;
    let address = server.local_addr()?;
    info!("Starting Troop server on {}", address);

    let hub = server.hub();
    let controller = server.shutdown_controller();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, notifying clients...");
                controller.shutdown().await;
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await?;

    let metrics = hub.metrics().snapshot();
    info!(
        uptime_secs = metrics.uptime_secs,
        connections = metrics.total_connections,
        auth_failures = metrics.auth_failures,
        relayed = metrics.messages_relayed,
        deliveries = metrics.deliveries,
        evictions = metrics.evictions,
        "Session summary"
    );
    Ok(())
}
