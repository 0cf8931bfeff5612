//! Node configuration, read from a TOML file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::constants::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Address to accept peer connections on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Directory of the sled database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Peers to dial at startup (host:port)
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Agent string announced in `hello`
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Default log filter, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./db")
}

fn default_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            bootstrap_peers: Vec::new(),
            agent: default_agent(),
            log_level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// Load config from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }
}
