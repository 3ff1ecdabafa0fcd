//! Error types for the propagation layer.
//!
//! Most failures in this layer are absorbed (missed requests, stale timers,
//! per-peer write errors). What remains here is what callers must see.

use thiserror::Error;

use crate::network::message::MessageHash;
use crate::network::peers::PeerId;
use crate::storage::ChainError;

/// Errors returned by propagation operations.
#[derive(Debug, Error)]
pub enum PropagationError {
    /// A full-message request was issued for a hash nobody announced.
    #[error("no request state for hash {0}")]
    NoRequestState(MessageHash),

    /// The chain view could not answer a score lookup.
    #[error("chain lookup failed: {0}")]
    Chain(#[from] ChainError),

    /// The event loop is gone; the command was not delivered.
    #[error("network event loop is not running")]
    ChannelClosed,
}

/// Failure writing to a single peer's transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The session's writer has shut down.
    #[error("peer {0} is disconnected")]
    Disconnected(PeerId),

    /// The message could not be framed for the wire.
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// No live session with this id.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}
