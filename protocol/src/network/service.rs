//! # Network Service
//!
//! The orchestrator of the propagation layer. One `NetworkService` owns the
//! [`NetworkContext`] (peers, receipt registry, timers) plus the three
//! protocol components, and exposes every operation the rest of the node
//! needs:
//!
//! - **outbound**: `send_transaction`, `send_block`, `send_stake`,
//!   `send_vote`, `send_destake` register the payload and announce it.
//! - **inbound**: `handle_message` runs the announce / request / deliver
//!   protocol for one message from one peer.
//! - **consensus**: `track_block_number`, `push_candidate`,
//!   `select_best_bkmr` drive the bkmr selector.
//! - **peers**: `connect_peers`, `ping_peers`, `get_synced_state` and the
//!   connection events reported by the transport.
//! - **timers**: `handle_timer` routes a fired timer to its owner.
//!
//! The service is not thread-safe and does not need to be: the
//! [`EventLoop`](crate::network::EventLoop) owns it on a single task and
//! funnels every call through there.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::NetworkConfig;
use crate::network::broadcast::GossipBroadcaster;
use crate::network::context::NetworkContext;
use crate::network::error::PropagationError;
use crate::network::message::{AnnounceRecord, BlockFields, MessageHash, MessageType, PeerMessage};
use crate::network::peers::{Connector, PeerId, PeerRegistry, PeerSession, SendReport};
use crate::network::receipt::{AnnounceOutcome, KnownMessage, MessageReceiptRegistry};
use crate::network::request::{FullMessageRequester, RequestOutcome};
use crate::network::selector::{ConsensusRecordSelector, SelectionOutcome};
use crate::network::timer::{Scheduler, TimerEvent, TimerId};
use crate::storage::{BlockScore, ChainView};

// ---------------------------------------------------------------------------
// Business payload contracts
// ---------------------------------------------------------------------------

/// Anything that can be gossiped: a hash to announce and the bytes to serve.
pub trait Gossipable {
    fn message_hash(&self) -> MessageHash;
    fn payload(&self) -> Vec<u8>;
}

/// A block, which announces a few header fields along with its hash.
pub trait GossipBlock: Gossipable {
    fn block_number(&self) -> u64;
    fn prev_header_hash(&self) -> MessageHash;
    fn stake_selector(&self) -> String;
    /// Hash-chain reveal. Only announced above height 1.
    fn reveal_hash(&self) -> Option<MessageHash>;
}

/// A payload ready to be registered and announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub msg_type: MessageType,
    pub hash: MessageHash,
    pub payload: Vec<u8>,
    pub block: Option<BlockFields>,
}

impl OutboundMessage {
    /// Packages a non-block payload.
    pub fn new<T: Gossipable + ?Sized>(msg_type: MessageType, item: &T) -> Self {
        Self {
            msg_type,
            hash: item.message_hash(),
            payload: item.payload(),
            block: None,
        }
    }

    /// Packages a block together with its announce fields.
    pub fn block<B: GossipBlock + ?Sized>(block: &B) -> Self {
        Self {
            msg_type: MessageType::Block,
            hash: block.message_hash(),
            payload: block.payload(),
            block: Some(BlockFields {
                stake_selector: block.stake_selector(),
                block_number: block.block_number(),
                prev_header_hash: block.prev_header_hash(),
                reveal_hash: block.reveal_hash(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound results & stats
// ---------------------------------------------------------------------------

/// What the host has to act on after an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Fully handled inside the propagation layer.
    Handled,
    /// A peer announced a block we do not have. The scoring collaborator
    /// decides whether it becomes a consensus candidate.
    BlockAnnounced { peer: PeerId, record: AnnounceRecord },
    /// A requested payload arrived and is now registered.
    Delivered { hash: MessageHash, message: KnownMessage },
}

/// Point-in-time counters of the propagation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationStats {
    pub connected_peers: usize,
    pub synced_peers: usize,
    pub known_messages: usize,
    pub pending_requests: usize,
    pub announces_sent: u64,
    pub send_failures: u64,
    pub full_requests_sent: u64,
    pub requests_exhausted: u64,
    pub stale_timers: u64,
    pub candidates_queued: u64,
    pub selector_prunes: u64,
}

// ---------------------------------------------------------------------------
// NetworkService
// ---------------------------------------------------------------------------

pub struct NetworkService<S: Scheduler> {
    config: NetworkConfig,
    ctx: NetworkContext<S>,
    broadcaster: GossipBroadcaster,
    requester: FullMessageRequester,
    selector: ConsensusRecordSelector,
    chain: Arc<dyn ChainView>,
    synced: bool,
}

impl<S: Scheduler> NetworkService<S> {
    pub fn new(
        config: NetworkConfig,
        chain: Arc<dyn ChainView>,
        connector: Arc<dyn Connector>,
        scheduler: S,
    ) -> Self {
        let peers = PeerRegistry::new(config.peer_addresses.clone(), config.peer_port, connector);
        let registry = MessageReceiptRegistry::new(config.message_queue_size);

        Self {
            ctx: NetworkContext::new(registry, peers, scheduler),
            broadcaster: GossipBroadcaster::new(),
            requester: FullMessageRequester::new(config.message_receipt_timeout()),
            selector: ConsensusRecordSelector::new(config.consensus_reselect_delay()),
            chain,
            synced: false,
            config,
        }
    }

    // -- outbound -----------------------------------------------------------

    pub fn send_transaction<T: Gossipable + ?Sized>(&mut self, tx: &T) {
        self.publish(OutboundMessage::new(MessageType::Transaction, tx));
    }

    pub fn send_stake<T: Gossipable + ?Sized>(&mut self, stake: &T) {
        self.publish(OutboundMessage::new(MessageType::Stake, stake));
    }

    pub fn send_vote<T: Gossipable + ?Sized>(&mut self, vote: &T) {
        self.publish(OutboundMessage::new(MessageType::Vote, vote));
    }

    pub fn send_destake<T: Gossipable + ?Sized>(&mut self, destake: &T) {
        self.publish(OutboundMessage::new(MessageType::Destake, destake));
    }

    pub fn send_block<B: GossipBlock + ?Sized>(&mut self, block: &B) {
        self.publish(OutboundMessage::block(block));
    }

    /// Registers and announces an already packaged payload.
    pub fn publish(&mut self, message: OutboundMessage) {
        info!(
            msg_type = %message.msg_type,
            hash = %message.hash,
            block_number = message.block.as_ref().map(|b| b.block_number),
            "<<<Transmitting"
        );
        self.register_and_broadcast(message.msg_type, message.hash, message.payload, message.block);
    }

    pub fn register_and_broadcast(
        &mut self,
        msg_type: MessageType,
        hash: MessageHash,
        payload: Vec<u8>,
        extra: Option<BlockFields>,
    ) {
        self.broadcaster
            .register_and_broadcast(&mut self.ctx, msg_type, hash, payload, extra);
    }

    pub fn broadcast(&mut self, hash: &MessageHash, msg_type: MessageType, record: Option<AnnounceRecord>) {
        self.broadcaster.broadcast(&self.ctx, hash, msg_type, record);
    }

    /// Runs one full-message request step for `hash`.
    pub fn request_full_message(&mut self, hash: &MessageHash) -> Result<RequestOutcome, PropagationError> {
        self.requester.request(&mut self.ctx, hash)
    }

    // -- peers --------------------------------------------------------------

    pub fn connect_peers(&mut self) -> usize {
        self.ctx.peers.connect_peers()
    }

    pub fn ping_peers(&mut self) -> SendReport {
        self.ctx.peers.ping_peers()
    }

    pub fn get_synced_state(&mut self) -> SendReport {
        self.ctx.peers.get_synced_state()
    }

    /// Sets the sync status this node reports to peers.
    pub fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn connection_made(&mut self, session: PeerSession) {
        self.ctx.peers.connection_made(session);
    }

    pub fn connection_lost(&mut self, peer: PeerId, reason: &str) {
        self.ctx.peers.connection_lost(peer, reason);
    }

    pub fn connection_failed(&mut self, host: &str, reason: &str) {
        self.ctx.peers.connection_failed(host, reason);
    }

    pub fn started_connecting(&mut self, host: &str) {
        self.ctx.peers.started_connecting(host);
    }

    // -- consensus ----------------------------------------------------------

    pub fn track_block_number(&mut self, block_number: u64) {
        self.selector.track_block_number(&mut self.ctx, block_number);
    }

    pub fn push_candidate(&mut self, score: BlockScore, hash: MessageHash) {
        self.selector.push_candidate(&mut self.ctx, score, hash);
    }

    /// Runs a consensus selection step immediately.
    pub fn select_best_bkmr(&mut self) -> SelectionOutcome {
        self.selector
            .select_best(&mut self.ctx, &mut self.requester, self.chain.as_ref())
    }

    // -- timers -------------------------------------------------------------

    /// Routes a fired timer to its owner. Stale firings are dropped.
    pub fn handle_timer(&mut self, id: TimerId, event: TimerEvent) {
        self.ctx.scheduler.fired(id);

        match event {
            TimerEvent::RequestTimeout(hash) => {
                if let Err(e) = self.requester.on_timeout(&mut self.ctx, id, &hash) {
                    warn!(%hash, error = %e, "receipt timeout handling failed");
                }
            }
            TimerEvent::Reselect => {
                self.selector
                    .on_timer(&mut self.ctx, &mut self.requester, self.chain.as_ref(), id);
            }
        }
    }

    // -- inbound ------------------------------------------------------------

    /// Handles one message received from `peer`.
    pub fn handle_message(&mut self, peer: PeerId, message: PeerMessage) -> InboundOutcome {
        trace!(%peer, kind = message.kind(), "inbound message");

        match message {
            PeerMessage::Announce(record) => self.on_announce(peer, record),
            PeerMessage::FullMessageRequest { hash } => {
                self.on_full_message_request(peer, hash);
                InboundOutcome::Handled
            }
            PeerMessage::FullMessage {
                hash,
                msg_type,
                payload,
            } => self.on_full_message(peer, hash, msg_type, payload),
            PeerMessage::SyncStatusRequest => {
                let reply = PeerMessage::SyncStatus { synced: self.synced };
                if let Err(e) = self.ctx.peers.send_to(peer, reply) {
                    warn!(%peer, error = %e, "failed to answer sync status request");
                }
                InboundOutcome::Handled
            }
            PeerMessage::SyncStatus { synced } => {
                self.ctx.peers.set_synced(peer, synced);
                InboundOutcome::Handled
            }
            PeerMessage::Ping => {
                self.ctx.peers.touch(peer);
                if let Err(e) = self.ctx.peers.send_to(peer, PeerMessage::Pong) {
                    warn!(%peer, error = %e, "failed to answer ping");
                }
                InboundOutcome::Handled
            }
            PeerMessage::Pong => {
                self.ctx.peers.touch(peer);
                InboundOutcome::Handled
            }
        }
    }

    fn on_announce(&mut self, peer: PeerId, record: AnnounceRecord) -> InboundOutcome {
        let hash = record.hash().clone();
        let msg_type = record.msg_type();

        match self.ctx.registry.add_peer(record.clone(), peer) {
            AnnounceOutcome::New if msg_type == MessageType::Block => {
                debug!(%peer, %hash, block_number = record.block_number(), "block announced");
                InboundOutcome::BlockAnnounced { peer, record }
            }
            AnnounceOutcome::New => {
                if let Err(e) = self.requester.request(&mut self.ctx, &hash) {
                    warn!(%peer, %hash, error = %e, "full message request failed");
                }
                InboundOutcome::Handled
            }
            outcome => {
                trace!(%peer, %hash, ?outcome, "announce needs no request");
                InboundOutcome::Handled
            }
        }
    }

    fn on_full_message_request(&self, peer: PeerId, hash: MessageHash) {
        let Some(known) = self.ctx.registry.get(&hash) else {
            debug!(%peer, %hash, "requested message is not known");
            return;
        };

        let reply = PeerMessage::FullMessage {
            hash,
            msg_type: known.msg_type,
            payload: known.payload.clone(),
        };
        if let Err(e) = self.ctx.peers.send_to(peer, reply) {
            warn!(%peer, error = %e, "failed to send full message");
        }
    }

    fn on_full_message(
        &mut self,
        peer: PeerId,
        hash: MessageHash,
        msg_type: MessageType,
        payload: Vec<u8>,
    ) -> InboundOutcome {
        if self.ctx.registry.is_fully_known(&hash) || self.ctx.registry.request_state(&hash).is_none() {
            debug!(%peer, %hash, "dropping unsolicited full message");
            return InboundOutcome::Handled;
        }

        self.ctx.registry.register(hash.clone(), payload.clone(), msg_type);
        self.ctx.discard_request(&hash);
        debug!(%peer, %hash, msg_type = %msg_type, "full message received");

        InboundOutcome::Delivered {
            hash,
            message: KnownMessage { msg_type, payload },
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Stops the consensus schedule. Request timers die with the scheduler.
    pub fn shutdown(&mut self) {
        self.selector.shutdown(&mut self.ctx);
        info!("network service stopped");
    }

    pub fn stats(&self) -> PropagationStats {
        let broadcast = self.broadcaster.stats();
        let requests = self.requester.stats();
        let selector = self.selector.stats();

        PropagationStats {
            connected_peers: self.ctx.peers.len(),
            synced_peers: self.ctx.peers.synced_peers().len(),
            known_messages: self.ctx.registry.known_count(),
            pending_requests: self.ctx.registry.pending_requests(),
            announces_sent: broadcast.announces_sent,
            send_failures: broadcast.send_failures + requests.send_failures,
            full_requests_sent: requests.requests_sent,
            requests_exhausted: requests.exhausted,
            stale_timers: requests.stale_timers + selector.stale_timers,
            candidates_queued: selector.candidates_queued,
            selector_prunes: selector.prunes,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn context(&self) -> &NetworkContext<S> {
        &self.ctx
    }

    pub fn registry(&self) -> &MessageReceiptRegistry {
        &self.ctx.registry
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.ctx.peers
    }

    pub fn scheduler(&self) -> &S {
        &self.ctx.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.ctx.scheduler
    }

    pub fn selector(&self) -> &ConsensusRecordSelector {
        &self.selector
    }
}
