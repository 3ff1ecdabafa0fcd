// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Lattice Protocol — Propagation Core
//!
//! The peer-to-peer propagation layer of a Lattice node. Data is advertised
//! by hash, pulled on demand, and the best pending consensus block for the
//! contested height is fetched on a fixed schedule.
//!
//! ## Architecture
//!
//! - **network** — Peers, announce/request gossip, the consensus selector,
//!   timers, and the single-task event loop that owns all of it.
//! - **storage** — The read-only chain view the selector scores against.
//! - **config** — Protocol constants and the runtime `NetworkConfig`.
//!
//! ## What lives elsewhere
//!
//! Wire framing, sockets, block validation, score computation and
//! persistence are collaborators behind narrow traits (`PeerLink`,
//! `Connector`, `ChainView`). The `lattice-node` binary wires real ones in.

pub mod config;
pub mod network;
pub mod storage;
