//! rumor - gossip node
//!
//! Runs a peer-to-peer gossip node that disseminates data announced by local
//! modules and hands data received from peers back to them.

use clap::{Parser, Subcommand};
use rumor_node::{GossipNode, NodeConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "rumor")]
#[command(about = "Peer-to-peer gossip node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node until interrupted
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "rumor.toml")]
        config: PathBuf,
    },

    /// Write a config file with default settings
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "rumor.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("rumor=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_node(config).await?,
        Commands::InitConfig { output } => init_config(&output)?,
    }

    Ok(())
}

async fn run_node(config_path: PathBuf) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "Starting rumor");

    let config = NodeConfig::from_file(&config_path)?;
    let node = GossipNode::start(&config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    node.shutdown().await;
    Ok(())
}

fn init_config(output: &PathBuf) -> anyhow::Result<()> {
    let toml = NodeConfig::default().to_toml()?;
    std::fs::write(output, toml)?;
    info!(path = %output.display(), "Wrote default config");
    Ok(())
}
