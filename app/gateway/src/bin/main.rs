//! Ferry gateway binary entry point.
//!
//! Scaffolds the config directory on first run, loads `gateway.toml`,
//! builds the model registry, and serves until ctrl-c.

use anyhow::Result;
use clap::Parser;
use ferry_gateway::config::{self, CONFIG_FILE};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Ferry model gateway.
#[derive(Parser, Debug)]
#[command(name = "ferry-gateway", about = "OpenAI-compatible model gateway")]
struct Cli {
    /// Config directory (defaults to the platform config dir).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address, overriding the configured one.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing from RUST_LOG (default: info).
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config_dir = match cli.config {
        Some(dir) => dir,
        None => config::global_config_dir()?,
    };
    if !config_dir.join(CONFIG_FILE).exists() {
        config::scaffold_config_dir(&config_dir)?;
        tracing::info!("created default config in {}", config_dir.display());
    }

    let handle = ferry_gateway::serve(&config_dir, cli.bind.as_deref()).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
    }
    handle.shutdown().await?;
    tracing::info!("gateway shut down");
    Ok(())
}
