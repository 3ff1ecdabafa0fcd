//! # Event Loop
//!
//! Runs a [`NetworkService`] on one tokio task. Everything that touches
//! propagation state arrives here as a message:
//!
//! - commands and connection events posted through a [`NetworkHandle`],
//! - fired timers from the [`TokioScheduler`],
//! - the shutdown signal.
//!
//! Because only this task mutates the service, no lock guards any of it.
//! After every event the loop publishes a fresh [`PropagationStats`]
//! snapshot on a `watch` channel for the metrics exporter.
//!
//! ## Shutdown
//!
//! The loop exits when the shutdown `watch` flips to `true` or its sender is
//! dropped, or when every `NetworkHandle` is gone. On exit the consensus
//! schedule is cancelled and dropping the scheduler aborts any pending
//! receipt timers.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::NetworkConfig;
use crate::network::error::PropagationError;
use crate::network::message::{MessageHash, MessageType, PeerMessage};
use crate::network::peers::{Connector, PeerId, PeerSession};
use crate::network::service::{
    GossipBlock, Gossipable, InboundOutcome, NetworkService, OutboundMessage, PropagationStats,
};
use crate::network::timer::{TimerReceiver, TokioScheduler};
use crate::storage::{BlockScore, ChainView};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything the event loop can be asked to do.
#[derive(Debug)]
pub enum NetworkEvent {
    Publish(OutboundMessage),
    Inbound { peer: PeerId, message: PeerMessage },
    ConnectionMade(PeerSession),
    ConnectionLost { peer: PeerId, reason: String },
    ConnectionFailed { host: String, reason: String },
    StartedConnecting { host: String },
    ConnectPeers,
    PingPeers,
    PollSyncState,
    SetSynced(bool),
    TrackBlockNumber(u64),
    PushCandidate { score: BlockScore, hash: MessageHash },
    SelectBest,
}

/// Receiving end of a [`NetworkHandle`], consumed by [`EventLoop::new`].
pub type EventInbox = mpsc::UnboundedReceiver<NetworkEvent>;

// ---------------------------------------------------------------------------
// NetworkHandle
// ---------------------------------------------------------------------------

/// Cloneable front door to a running [`EventLoop`].
///
/// Every method only enqueues; the work happens on the loop's task. A
/// [`PropagationError::ChannelClosed`] means the loop has stopped.
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    events: mpsc::UnboundedSender<NetworkEvent>,
}

impl NetworkHandle {
    /// Creates a handle and the inbox an [`EventLoop`] will drain.
    pub fn channel() -> (Self, EventInbox) {
        let (events, inbox) = mpsc::unbounded_channel();
        (Self { events }, inbox)
    }

    pub fn post(&self, event: NetworkEvent) -> Result<(), PropagationError> {
        self.events
            .send(event)
            .map_err(|_| PropagationError::ChannelClosed)
    }

    pub fn publish(&self, message: OutboundMessage) -> Result<(), PropagationError> {
        self.post(NetworkEvent::Publish(message))
    }

    pub fn send_transaction<T: Gossipable + ?Sized>(&self, tx: &T) -> Result<(), PropagationError> {
        self.publish(OutboundMessage::new(MessageType::Transaction, tx))
    }

    pub fn send_stake<T: Gossipable + ?Sized>(&self, stake: &T) -> Result<(), PropagationError> {
        self.publish(OutboundMessage::new(MessageType::Stake, stake))
    }

    pub fn send_vote<T: Gossipable + ?Sized>(&self, vote: &T) -> Result<(), PropagationError> {
        self.publish(OutboundMessage::new(MessageType::Vote, vote))
    }

    pub fn send_destake<T: Gossipable + ?Sized>(&self, destake: &T) -> Result<(), PropagationError> {
        self.publish(OutboundMessage::new(MessageType::Destake, destake))
    }

    pub fn send_block<B: GossipBlock + ?Sized>(&self, block: &B) -> Result<(), PropagationError> {
        self.publish(OutboundMessage::block(block))
    }

    /// Hands a message received from `peer` to the loop.
    pub fn deliver(&self, peer: PeerId, message: PeerMessage) -> Result<(), PropagationError> {
        self.post(NetworkEvent::Inbound { peer, message })
    }

    pub fn connection_made(&self, session: PeerSession) -> Result<(), PropagationError> {
        self.post(NetworkEvent::ConnectionMade(session))
    }

    pub fn connection_lost(&self, peer: PeerId, reason: impl Into<String>) -> Result<(), PropagationError> {
        self.post(NetworkEvent::ConnectionLost {
            peer,
            reason: reason.into(),
        })
    }

    pub fn connection_failed(
        &self,
        host: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<(), PropagationError> {
        self.post(NetworkEvent::ConnectionFailed {
            host: host.into(),
            reason: reason.into(),
        })
    }

    pub fn started_connecting(&self, host: impl Into<String>) -> Result<(), PropagationError> {
        self.post(NetworkEvent::StartedConnecting { host: host.into() })
    }

    pub fn connect_peers(&self) -> Result<(), PropagationError> {
        self.post(NetworkEvent::ConnectPeers)
    }

    pub fn ping_peers(&self) -> Result<(), PropagationError> {
        self.post(NetworkEvent::PingPeers)
    }

    pub fn poll_sync_state(&self) -> Result<(), PropagationError> {
        self.post(NetworkEvent::PollSyncState)
    }

    pub fn set_synced(&self, synced: bool) -> Result<(), PropagationError> {
        self.post(NetworkEvent::SetSynced(synced))
    }

    pub fn track_block_number(&self, block_number: u64) -> Result<(), PropagationError> {
        self.post(NetworkEvent::TrackBlockNumber(block_number))
    }

    pub fn push_candidate(&self, score: BlockScore, hash: MessageHash) -> Result<(), PropagationError> {
        self.post(NetworkEvent::PushCandidate { score, hash })
    }

    pub fn select_best(&self) -> Result<(), PropagationError> {
        self.post(NetworkEvent::SelectBest)
    }
}

// ---------------------------------------------------------------------------
// EventLoop
// ---------------------------------------------------------------------------

pub struct EventLoop {
    service: NetworkService<TokioScheduler>,
    timers: TimerReceiver,
    events: EventInbox,
    outcomes: mpsc::UnboundedSender<InboundOutcome>,
    stats: watch::Sender<PropagationStats>,
}

impl EventLoop {
    /// Builds the loop around a fresh service. The returned receiver yields
    /// inbound results the host must act on (announced blocks, delivered
    /// payloads).
    pub fn new(
        config: NetworkConfig,
        chain: Arc<dyn ChainView>,
        connector: Arc<dyn Connector>,
        events: EventInbox,
    ) -> (Self, mpsc::UnboundedReceiver<InboundOutcome>) {
        let (scheduler, timers) = TokioScheduler::new();
        let service = NetworkService::new(config, chain, connector, scheduler);
        let (outcomes, outcome_rx) = mpsc::unbounded_channel();
        let (stats, _) = watch::channel(service.stats());

        let event_loop = Self {
            service,
            timers,
            events,
            outcomes,
            stats,
        };
        (event_loop, outcome_rx)
    }

    /// Subscribes to stats snapshots published after every event.
    pub fn stats(&self) -> watch::Receiver<PropagationStats> {
        self.stats.subscribe()
    }

    /// Drains events until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            peers = self.service.config().peer_addresses.len(),
            auto_staking = self.service.config().auto_staking_enabled,
            "network event loop starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some((id, event)) = self.timers.recv() => {
                    self.service.handle_timer(id, event);
                }
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        debug!("all network handles dropped");
                        break;
                    }
                },
            }

            self.stats.send_replace(self.service.stats());
        }

        self.service.shutdown();
        self.stats.send_replace(self.service.stats());
        info!("network event loop stopped");
    }

    fn dispatch(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Publish(message) => self.service.publish(message),
            NetworkEvent::Inbound { peer, message } => {
                let outcome = self.service.handle_message(peer, message);
                if outcome != InboundOutcome::Handled && self.outcomes.send(outcome).is_err() {
                    debug!(%peer, "inbound outcome dropped, nobody listening");
                }
            }
            NetworkEvent::ConnectionMade(session) => self.service.connection_made(session),
            NetworkEvent::ConnectionLost { peer, reason } => {
                self.service.connection_lost(peer, &reason)
            }
            NetworkEvent::ConnectionFailed { host, reason } => {
                self.service.connection_failed(&host, &reason)
            }
            NetworkEvent::StartedConnecting { host } => self.service.started_connecting(&host),
            NetworkEvent::ConnectPeers => {
                self.service.connect_peers();
            }
            NetworkEvent::PingPeers => {
                self.service.ping_peers();
            }
            NetworkEvent::PollSyncState => {
                self.service.get_synced_state();
            }
            NetworkEvent::SetSynced(synced) => self.service.set_synced(synced),
            NetworkEvent::TrackBlockNumber(block_number) => {
                self.service.track_block_number(block_number)
            }
            NetworkEvent::PushCandidate { score, hash } => self.service.push_candidate(score, hash),
            NetworkEvent::SelectBest => {
                let outcome = self.service.select_best_bkmr();
                debug!(?outcome, "consensus selection step");
            }
        }
    }
}
