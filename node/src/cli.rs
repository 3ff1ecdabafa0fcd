//! # CLI Interface
//!
//! Defines the command-line argument structure for `lattice-node` using
//! `clap` derive. Two subcommands: `run` and `version`.
//!
//! Every `run` flag has an environment variable twin. Flags override the
//! values loaded from the JSON config file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lattice_protocol::config::{NetworkConfig, DEFAULT_METRICS_PORT};

use crate::logging::LogFormat;

/// Lattice propagation node.
///
/// Connects to the configured peers, relays announces and full messages,
/// and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "lattice-node",
    about = "Lattice peer-to-peer propagation node",
    version,
    propagate_version = true
)]
pub struct LatticeNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to a JSON network config. Defaults apply when omitted.
    #[arg(long, short = 'c', env = "LATTICE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on and to dial peers at.
    #[arg(long, env = "LATTICE_P2P_PORT")]
    pub p2p_port: Option<u16>,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "LATTICE_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Peer hosts to connect to, comma separated. Replaces the config list.
    #[arg(long = "peer", env = "LATTICE_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Enable automatic staking.
    #[arg(long, env = "LATTICE_AUTO_STAKE")]
    pub auto_stake: bool,

    /// Log output format.
    #[arg(long, env = "LATTICE_LOG_FORMAT", value_enum, ignore_case = true, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, default_value = "lattice_node=info,lattice_protocol=info")]
    pub log_level: String,
}

impl RunArgs {
    /// Loads the config file (if any), applies flag overrides and validates
    /// the result.
    pub fn load_config(&self) -> Result<NetworkConfig> {
        let mut config = match &self.config {
            Some(path) => NetworkConfig::from_json_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => NetworkConfig::default(),
        };

        if let Some(port) = self.p2p_port {
            config.peer_port = port;
        }
        if !self.peers.is_empty() {
            config.peer_addresses = self.peers.clone();
        }
        if self.auto_stake {
            config.auto_staking_enabled = true;
        }

        config.validate().context("invalid network config")?;
        Ok(config)
    }
}
