//! # Structured Logging
//!
//! Installs the node's `tracing` subscriber. The library logs propagation
//! events with structured fields (`hash`, `peer`, `msg_type`, ...); in JSON
//! mode those fields are flattened into the top-level object so a log
//! pipeline can index them directly.
//!
//! `RUST_LOG` takes precedence over `--log-level`:
//!
//! ```text
//! RUST_LOG=lattice_node=debug,lattice_protocol::network::request=trace
//! ```

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format, selected with `--log-format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Resolves the active filter: `RUST_LOG` when set, else `default_level`.
pub fn build_filter(default_level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => default_filter(default_level),
    }
}

fn default_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("invalid log filter `{}`", level))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(default_level: &str, format: LogFormat) -> Result<()> {
    let filter = build_filter(default_level)?;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_target(true),
            )
            .try_init(),
    }
    .context("failed to install tracing subscriber")?;

    tracing::info!(?format, "logging initialized");
    Ok(())
}
