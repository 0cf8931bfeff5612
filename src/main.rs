//! Tidal full node
//!
//! Opens the chain database, starts the peer listener and dials the
//! configured bootstrap peers.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tidal_core::config::NodeConfig;
use tidal_core::consensus::ConsensusParams;
use tidal_core::node::Node;
use tidal_core::p2p::{self, PeerContext};
use tidal_core::storage::SledStore;

#[derive(Parser)]
#[command(name = "tidal-node")]
#[command(about = "Proof-of-work UTXO full node", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "tidal.toml")]
    config: PathBuf,

    /// Address to listen for peers on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Database directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Additional peer to connect to (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = NodeConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    config.bootstrap_peers.extend(cli.peers);

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let store = SledStore::open(&config.data_dir)
        .with_context(|| format!("Failed to open database at {}", config.data_dir.display()))?;
    let node = Node::open(ConsensusParams::mainnet(), Arc::new(store))?;
    let (tip, height) = node.chain_tip().await;
    info!("Node started; chain tip {} at height {}", tip, height);

    let context = Arc::new(PeerContext {
        agent: config.agent.clone(),
        known_peers: config.bootstrap_peers.clone(),
    });

    for addr in config.bootstrap_peers.clone() {
        let (node, context) = (Arc::clone(&node), Arc::clone(&context));
        tokio::spawn(async move {
            if let Err(e) = p2p::connect(node, &addr, context).await {
                warn!("Connection to {} ended: {}", addr, e);
            }
        });
    }

    tokio::select! {
        result = p2p::listen(Arc::clone(&node), config.listen_addr, context) => {
            if let Err(e) = &result {
                error!("Listener failed: {}", e);
            }
            result.context("Peer listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
    Ok(())
}
