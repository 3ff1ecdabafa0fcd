//! # Network Module
//!
//! Announce-by-hash propagation for Lattice nodes: peers advertise what they
//! hold, receivers pull payloads they lack one peer at a time, and a
//! consensus selector keeps pulling the best candidate block for the
//! contested height.
//!
//! ## Architecture
//!
//! ```text
//! message.rs    — Announce records and the peer wire messages
//! peers.rs      — Live sessions, outbound dialing, ping and sync polls
//! receipt.rs    — Known payloads and per-hash request state
//! broadcast.rs  — Register-then-announce fan-out
//! request.rs    — Full-message requester (RFM) with receipt timers
//! selector.rs   — Consensus-candidate selector (bkmr)
//! timer.rs      — Cancelable timers: tokio-backed and manual
//! context.rs    — The single owner of peers, registry and timers
//! service.rs    — NetworkService: every operation in one place
//! runtime.rs    — EventLoop task and the NetworkHandle front door
//! ```
//!
//! ## Design Decisions
//!
//! - All propagation state lives on one task. Other tasks talk to it through
//!   a `NetworkHandle`, so nothing here takes a lock on the hot path.
//! - Timers are never callbacks holding references. A fired timer is a
//!   message carrying its `TimerId`; the owner compares it with the id it
//!   armed and drops anything stale.
//! - The layer never owns sockets. Sessions carry a `PeerLink` write handle
//!   and outbound dials go through a `Connector`; both are supplied by the
//!   node's transport.
//! - Lost peers are not re-dialed and peers that never answer a request are
//!   not penalised.

pub mod broadcast;
pub mod context;
pub mod error;
pub mod message;
pub mod peers;
pub mod receipt;
pub mod request;
pub mod runtime;
pub mod selector;
pub mod service;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use broadcast::{BroadcastStats, GossipBroadcaster};
pub use context::NetworkContext;
pub use error::{PropagationError, TransportError};
pub use message::{AnnounceRecord, BlockFields, MessageHash, MessageType, PeerMessage};
pub use peers::{Connector, PeerId, PeerLink, PeerRegistry, PeerSession, SendReport};
pub use receipt::{AnnounceOutcome, KnownMessage, MessageReceiptRegistry, RequestState};
pub use request::{FullMessageRequester, RequestOutcome, RequestStats};
pub use runtime::{EventInbox, EventLoop, NetworkEvent, NetworkHandle};
pub use selector::{
    ConsensusCandidate, ConsensusRecordSelector, SelectionOutcome, SelectorState, SelectorStats,
};
pub use service::{
    GossipBlock, Gossipable, InboundOutcome, NetworkService, OutboundMessage, PropagationStats,
};
pub use timer::{ManualScheduler, ScheduledTimer, Scheduler, TimerEvent, TimerId, TimerReceiver, TokioScheduler};
