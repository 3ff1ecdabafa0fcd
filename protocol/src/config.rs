//! # Network Configuration & Constants
//!
//! Every timing knob of the propagation layer lives here, together with the
//! [`NetworkConfig`] struct the node binary loads from disk and overrides from
//! the command line.
//!
//! Durations are stored as milliseconds in the serialized form so that config
//! files stay plain JSON numbers; the accessors hand out [`Duration`]s.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate-level protocol version, reported by `lattice-node version`.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Port every peer listens on. Outbound connection attempts always dial this
/// port; the address list only carries hosts.
pub const DEFAULT_P2P_PORT: u16 = 9000;

/// Default Prometheus metrics port for the node binary.
pub const DEFAULT_METRICS_PORT: u16 = 9002;

/// Number of fully known messages kept around to answer full-message requests.
/// Oldest entries are evicted first.
pub const MESSAGE_QUEUE_SIZE: usize = 300;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// How long a single peer gets to answer a full-message request before the
/// next announcing peer is asked.
pub const MESSAGE_RECEIPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed delay between two consensus-candidate selection steps.
pub const CONSENSUS_RESELECT_DELAY: Duration = Duration::from_secs(5);

/// Liveness probe cadence used by the node binary.
pub const PEER_PING_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// NetworkConfig
// ---------------------------------------------------------------------------

/// Runtime configuration for the propagation layer.
///
/// `auto_staking_enabled` is read once at startup; changing it on a running
/// service has no effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hosts (IP literals) the node dials on `connect_peers`.
    pub peer_addresses: Vec<String>,
    /// Port used for outbound connection attempts.
    pub peer_port: u16,
    /// Per-peer full-message receipt timeout, in milliseconds.
    pub message_receipt_timeout_ms: u64,
    /// Delay between consensus selection steps, in milliseconds.
    pub consensus_reselect_delay_ms: u64,
    /// Capacity of the fully-known message store.
    pub message_queue_size: usize,
    /// Interval between `ping_peers` rounds, in milliseconds.
    pub ping_interval_ms: u64,
    /// Whether this node stakes automatically.
    pub auto_staking_enabled: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            peer_addresses: Vec::new(),
            peer_port: DEFAULT_P2P_PORT,
            message_receipt_timeout_ms: MESSAGE_RECEIPT_TIMEOUT.as_millis() as u64,
            consensus_reselect_delay_ms: CONSENSUS_RESELECT_DELAY.as_millis() as u64,
            message_queue_size: MESSAGE_QUEUE_SIZE,
            ping_interval_ms: PEER_PING_INTERVAL.as_millis() as u64,
            auto_staking_enabled: false,
        }
    }
}

impl NetworkConfig {
    /// Loads a config from a JSON file. Missing fields fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the propagation layer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peer_port == 0 {
            return Err(ConfigError::Invalid("peer_port must be non-zero"));
        }
        if self.message_receipt_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "message_receipt_timeout_ms must be non-zero",
            ));
        }
        if self.consensus_reselect_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "consensus_reselect_delay_ms must be non-zero",
            ));
        }
        if self.message_queue_size == 0 {
            return Err(ConfigError::Invalid("message_queue_size must be non-zero"));
        }
        if self.ping_interval_ms == 0 {
            return Err(ConfigError::Invalid("ping_interval_ms must be non-zero"));
        }
        Ok(())
    }

    pub fn message_receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.message_receipt_timeout_ms)
    }

    pub fn consensus_reselect_delay(&self) -> Duration {
        Duration::from_millis(self.consensus_reselect_delay_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Errors raised while loading or validating a [`NetworkConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid JSON for [`NetworkConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A field holds a value the service cannot run with.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}
