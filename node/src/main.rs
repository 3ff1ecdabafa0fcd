// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Lattice Node
//!
//! Entry point for the `lattice-node` binary. Parses CLI arguments,
//! initializes logging and metrics, starts the propagation event loop with a
//! TCP transport, and serves `/metrics`.
//!
//! - `run`     — start the node
//! - `version` — print build version information

mod cli;
mod logging;
mod metrics;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use lattice_protocol::network::{EventLoop, InboundOutcome, NetworkHandle};
use lattice_protocol::storage::{Chain, ChainView};

use cli::{Commands, LatticeNodeCli};
use metrics::NodeMetrics;
use transport::{TcpConnector, Transport};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LatticeNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: event loop, P2P listener, metrics endpoint, and the
/// periodic ping / sync poll.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, args.log_format)?;

    let config = args.load_config()?;
    tracing::info!(
        p2p_port = config.peer_port,
        metrics_port = args.metrics_port,
        peers = config.peer_addresses.len(),
        auto_staking = config.auto_staking_enabled,
        "starting lattice-node"
    );

    // --- Chain view ---
    // This binary relays only; nothing appends accepted blocks here.
    let chain: Arc<dyn ChainView> = Arc::new(RwLock::new(Chain::default()));

    // --- Event loop ---
    let (handle, inbox) = NetworkHandle::channel();
    let transport = Transport::new(handle.clone());
    let connector = Arc::new(TcpConnector::new(Arc::clone(&transport)));
    let (event_loop, mut outcomes) = EventLoop::new(config.clone(), chain, connector, inbox);
    let mut stats = event_loop.stats();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let network_task = tokio::spawn(event_loop.run(shutdown_rx.clone()));

    // --- P2P listener ---
    let p2p_addr = format!("0.0.0.0:{}", config.peer_port);
    let p2p_listener = tokio::net::TcpListener::bind(&p2p_addr)
        .await
        .with_context(|| format!("failed to bind P2P listener on {}", p2p_addr))?;
    tracing::info!("P2P listener on {}", p2p_addr);
    let listen_task = tokio::spawn(Arc::clone(&transport).listen(p2p_listener, shutdown_rx.clone()));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let metrics_ref = Arc::clone(&node_metrics);
    let exporter = tokio::spawn(async move {
        while stats.changed().await.is_ok() {
            metrics_ref.update(&stats.borrow_and_update());
        }
    });

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Inbound results ---
    // No scoring collaborator runs in this binary, so announced blocks are
    // only logged.
    let results = tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            match outcome {
                InboundOutcome::BlockAnnounced { peer, record } => tracing::info!(
                    %peer,
                    hash = %record.hash(),
                    block_number = record.block_number(),
                    "block announced"
                ),
                InboundOutcome::Delivered { hash, message } => tracing::info!(
                    %hash,
                    msg_type = %message.msg_type,
                    bytes = message.payload.len(),
                    "full message received"
                ),
                InboundOutcome::Handled => {}
            }
        }
    });

    // --- Peers ---
    handle
        .connect_peers()
        .context("network event loop exited before startup")?;

    let ping_interval = config.ping_interval();
    let housekeeping_handle = handle.clone();
    let housekeeping = tokio::spawn(async move {
        let mut interval = tokio::time::interval(ping_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            if housekeeping_handle.ping_peers().is_err() || housekeeping_handle.poll_sync_state().is_err() {
                break;
            }
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    housekeeping.abort();
    if let Err(e) = network_task.await {
        tracing::error!(error = %e, "network event loop panicked");
    }
    listen_task.abort();
    exporter.abort();
    results.abort();

    tracing::info!("lattice-node stopped");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("lattice-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", lattice_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
