//! # Full-Message Requester (RFM)
//!
//! Pulls the payload of an announced hash from the peers that announced it,
//! one peer at a time. Each attempt arms a receipt timer; if the payload has
//! not arrived when it fires, the next un-asked peer is tried. When every
//! announcing peer has been asked the request state is dropped.
//!
//! ```text
//! request(h) ─┬─ known ───────────────> drop state            AlreadyKnown
//!             ├─ next un-asked peer p ─> ask p, arm timer      Requested(p)
//!             └─ nobody left ─────────> drop state            Exhausted
//! ```
//!
//! At most one request per hash is in flight: arming a new timer always
//! cancels the previous one, and a firing whose id does not match the state's
//! current timer is ignored.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::network::context::NetworkContext;
use crate::network::error::{PropagationError, TransportError};
use crate::network::message::{MessageHash, PeerMessage};
use crate::network::peers::PeerId;
use crate::network::timer::{Scheduler, TimerEvent, TimerId};

/// Result of one request step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The payload is already held; any request state was dropped.
    AlreadyKnown,
    /// This peer was asked and a receipt timer is armed.
    Requested(PeerId),
    /// Every announcing peer was asked; the request state was dropped.
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    pub requests_sent: u64,
    pub send_failures: u64,
    pub exhausted: u64,
    pub stale_timers: u64,
}

#[derive(Debug)]
pub struct FullMessageRequester {
    receipt_timeout: Duration,
    stats: RequestStats,
}

impl FullMessageRequester {
    pub fn new(receipt_timeout: Duration) -> Self {
        Self {
            receipt_timeout,
            stats: RequestStats::default(),
        }
    }

    pub fn stats(&self) -> RequestStats {
        self.stats
    }

    /// Runs one request step for `hash`.
    ///
    /// Fails with [`PropagationError::NoRequestState`] when the hash is
    /// neither known nor announced.
    pub fn request<S: Scheduler>(
        &mut self,
        ctx: &mut NetworkContext<S>,
        hash: &MessageHash,
    ) -> Result<RequestOutcome, PropagationError> {
        if ctx.registry.is_fully_known(hash) {
            if ctx.discard_request(hash) {
                trace!(%hash, "dropped request state for known message");
            }
            return Ok(RequestOutcome::AlreadyKnown);
        }

        let state = ctx
            .registry
            .request_state_mut(hash)
            .ok_or_else(|| PropagationError::NoRequestState(hash.clone()))?;

        let Some(peer) = state.next_candidate() else {
            let asked = state.asked().len();
            ctx.discard_request(hash);
            self.stats.exhausted += 1;
            debug!(%hash, asked, "no peer left to ask, giving up");
            return Ok(RequestOutcome::Exhausted);
        };

        state.mark_asked(peer);
        if let Some(previous) = state.replace_timer(None) {
            ctx.scheduler.cancel(previous);
        }

        let message = PeerMessage::FullMessageRequest { hash: hash.clone() };
        match ctx.peers.send_to(peer, message) {
            Ok(()) => {
                self.stats.requests_sent += 1;
                debug!(%hash, %peer, "requested full message");
            }
            Err(TransportError::UnknownPeer(_)) => {
                self.stats.send_failures += 1;
                debug!(%hash, %peer, "announcing peer disconnected, waiting out receipt timer");
            }
            Err(e) => {
                // The peer stays asked; the timer below moves on to the next one.
                self.stats.send_failures += 1;
                warn!(%hash, %peer, error = %e, "failed to send full message request");
            }
        }

        let timer = ctx
            .scheduler
            .schedule(self.receipt_timeout, TimerEvent::RequestTimeout(hash.clone()));
        state.replace_timer(Some(timer));

        Ok(RequestOutcome::Requested(peer))
    }

    /// Handles a fired receipt timer. Returns `None` for a stale firing.
    pub fn on_timeout<S: Scheduler>(
        &mut self,
        ctx: &mut NetworkContext<S>,
        timer: TimerId,
        hash: &MessageHash,
    ) -> Result<Option<RequestOutcome>, PropagationError> {
        match ctx.registry.request_state_mut(hash) {
            Some(state) if state.timer() == Some(timer) => {
                state.replace_timer(None);
            }
            _ => {
                self.stats.stale_timers += 1;
                trace!(%hash, %timer, "ignoring stale receipt timer");
                return Ok(None);
            }
        }

        self.request(ctx, hash).map(Some)
    }
}
