//! # Message Receipt Registry
//!
//! Per-hash bookkeeping for the announce/request protocol:
//!
//! - **known** — payloads this node holds in full and can hand to any peer
//!   that asks. Bounded; the oldest registration is evicted first.
//! - **requests** — hashes that were announced to us but are not known yet.
//!   Each [`RequestState`] keeps the announcing peers in announce order, the
//!   subset already asked, and the id of the one armed retry timer.
//!
//! A hash has at most one `RequestState` at a time. The registry never arms
//! or cancels timers itself: [`MessageReceiptRegistry::delete_request_state`]
//! hands the removed state back so the caller can cancel its timer.

use std::collections::{HashMap, VecDeque};

use tracing::trace;

use crate::network::message::{AnnounceRecord, MessageHash, MessageType};
use crate::network::peers::PeerId;
use crate::network::timer::TimerId;

/// A payload held in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownMessage {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

/// Outstanding retrieval of an announced, not yet known hash.
#[derive(Debug)]
pub struct RequestState {
    record: AnnounceRecord,
    peers: Vec<PeerId>,
    asked: Vec<PeerId>,
    timer: Option<TimerId>,
}

impl RequestState {
    fn new(record: AnnounceRecord, first_peer: PeerId) -> Self {
        Self {
            record,
            peers: vec![first_peer],
            asked: Vec::new(),
            timer: None,
        }
    }

    /// The first announce received for this hash.
    pub fn record(&self) -> &AnnounceRecord {
        &self.record
    }

    /// Peers that announced the hash, in announce order.
    pub fn peers(&self) -> &[PeerId] {
        &self.peers
    }

    /// Peers already asked for the payload, in asking order.
    pub fn asked(&self) -> &[PeerId] {
        &self.asked
    }

    /// The armed retry timer, if any.
    pub fn timer(&self) -> Option<TimerId> {
        self.timer
    }

    /// First announcing peer that has not been asked yet.
    pub fn next_candidate(&self) -> Option<PeerId> {
        self.peers
            .iter()
            .copied()
            .find(|peer| !self.asked.contains(peer))
    }

    pub(crate) fn mark_asked(&mut self, peer: PeerId) {
        if !self.asked.contains(&peer) {
            self.asked.push(peer);
        }
    }

    pub(crate) fn replace_timer(&mut self, timer: Option<TimerId>) -> Option<TimerId> {
        std::mem::replace(&mut self.timer, timer)
    }

    fn add_peer(&mut self, peer: PeerId) -> bool {
        if self.peers.contains(&peer) {
            return false;
        }
        self.peers.push(peer);
        true
    }
}

/// What [`MessageReceiptRegistry::add_peer`] did with an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// The payload is already known; nothing recorded.
    AlreadyKnown,
    /// First announce for this hash; a request state was created.
    New,
    /// Another peer announcing a hash already being requested.
    Duplicate,
    /// The same peer announced the same hash again.
    Repeated,
}

/// Known payloads and outstanding requests, keyed by hash.
#[derive(Debug)]
pub struct MessageReceiptRegistry {
    capacity: usize,
    known: HashMap<MessageHash, KnownMessage>,
    order: VecDeque<MessageHash>,
    requests: HashMap<MessageHash, RequestState>,
}

impl MessageReceiptRegistry {
    /// Creates a registry holding at most `capacity` known payloads.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            known: HashMap::new(),
            order: VecDeque::new(),
            requests: HashMap::new(),
        }
    }

    pub fn is_fully_known(&self, hash: &MessageHash) -> bool {
        self.known.contains_key(hash)
    }

    /// Marks `hash` as fully known. Registering an already known hash keeps
    /// its original payload and eviction position.
    pub fn register(&mut self, hash: MessageHash, payload: Vec<u8>, msg_type: MessageType) {
        if self.known.contains_key(&hash) {
            return;
        }

        self.order.push_back(hash.clone());
        self.known.insert(hash, KnownMessage { msg_type, payload });

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.known.remove(&evicted);
                trace!(hash = %evicted, "evicted known message");
            }
        }
    }

    /// Full payload for `hash`, if known.
    pub fn get(&self, hash: &MessageHash) -> Option<&KnownMessage> {
        self.known.get(hash)
    }

    pub fn request_state(&self, hash: &MessageHash) -> Option<&RequestState> {
        self.requests.get(hash)
    }

    pub(crate) fn request_state_mut(&mut self, hash: &MessageHash) -> Option<&mut RequestState> {
        self.requests.get_mut(hash)
    }

    /// Removes and returns the request state for `hash`. The caller owns
    /// cancelling the returned state's timer.
    #[must_use = "the removed state's timer must be cancelled"]
    pub fn delete_request_state(&mut self, hash: &MessageHash) -> Option<RequestState> {
        self.requests.remove(hash)
    }

    /// Records that `peer` announced `record`.
    pub fn add_peer(&mut self, record: AnnounceRecord, peer: PeerId) -> AnnounceOutcome {
        if self.is_fully_known(record.hash()) {
            return AnnounceOutcome::AlreadyKnown;
        }

        match self.requests.get_mut(record.hash()) {
            Some(state) => {
                if state.add_peer(peer) {
                    AnnounceOutcome::Duplicate
                } else {
                    AnnounceOutcome::Repeated
                }
            }
            None => {
                let hash = record.hash().clone();
                self.requests.insert(hash, RequestState::new(record, peer));
                AnnounceOutcome::New
            }
        }
    }

    /// Number of fully known payloads.
    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Number of outstanding request states.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }
}
