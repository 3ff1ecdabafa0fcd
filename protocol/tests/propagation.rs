//! Integration tests for the propagation layer.
//!
//! Every test drives a real `NetworkService` over a `ManualScheduler`, so
//! timers fire exactly when the test says so. Peers are recording fakes: a
//! test can see every message each peer was sent and in which order.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use lattice_protocol::config::{NetworkConfig, CONSENSUS_RESELECT_DELAY};
use lattice_protocol::network::{
    AnnounceRecord, Connector, InboundOutcome, ManualScheduler, MessageHash, MessageType,
    NetworkService, PeerId, PeerLink, PeerMessage, PeerSession, RequestOutcome, SelectionOutcome,
    TimerEvent, TransportError,
};
use lattice_protocol::storage::{BlockScore, Chain, ChainError, ChainView};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingPeer {
    sent: Mutex<Vec<PeerMessage>>,
}

impl RecordingPeer {
    fn announced(&self, hash: &MessageHash) -> bool {
        self.sent
            .lock()
            .iter()
            .any(|m| matches!(m, PeerMessage::Announce(r) if r.hash() == hash))
    }

    fn requested(&self) -> Vec<MessageHash> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                PeerMessage::FullMessageRequest { hash } => Some(hash.clone()),
                _ => None,
            })
            .collect()
    }
}

impl PeerLink for RecordingPeer {
    fn send(&self, message: PeerMessage) -> Result<(), TransportError> {
        self.sent.lock().push(message);
        Ok(())
    }
}

#[derive(Default)]
struct CountingConnector {
    attempts: Mutex<Vec<String>>,
}

impl Connector for CountingConnector {
    fn connect(&self, host: &str, _port: u16) {
        self.attempts.lock().push(host.to_string());
    }
}

struct Harness {
    service: NetworkService<ManualScheduler>,
    peers: Vec<Arc<RecordingPeer>>,
    connector: Arc<CountingConnector>,
    chain: Arc<RwLock<Chain>>,
}

impl Harness {
    fn new(peer_count: u64) -> Self {
        let addresses = (1..=peer_count).map(|i| format!("10.0.0.{}", i)).collect();
        let config = NetworkConfig {
            peer_addresses: addresses,
            ..NetworkConfig::default()
        };
        let chain = Arc::new(RwLock::new(Chain::default()));
        let connector = Arc::new(CountingConnector::default());
        let view: Arc<dyn ChainView> = chain.clone();
        let mut service = NetworkService::new(config, view, connector.clone(), ManualScheduler::new());

        let mut peers = Vec::new();
        for i in 1..=peer_count {
            let peer = Arc::new(RecordingPeer::default());
            let remote: SocketAddr = format!("10.0.0.{}:9000", i).parse().unwrap();
            service.connection_made(PeerSession::new(PeerId::new(i), remote, peer.clone()));
            peers.push(peer);
        }

        Self {
            service,
            peers,
            connector,
            chain,
        }
    }

    fn peer(&self, id: u64) -> &RecordingPeer {
        &self.peers[(id - 1) as usize]
    }

    fn announce(&mut self, from: u64, hash: &MessageHash, msg_type: MessageType) -> InboundOutcome {
        let record = AnnounceRecord::new(hash.clone(), msg_type);
        self.service
            .handle_message(PeerId::new(from), PeerMessage::Announce(record))
    }

    /// Fires the next due receipt timer, skipping selector timers.
    fn fire_receipt_timeout(&mut self) {
        loop {
            let (id, event) = self
                .service
                .scheduler_mut()
                .fire_next()
                .expect("a timer should be armed");
            let is_receipt = matches!(event, TimerEvent::RequestTimeout(_));
            self.service.handle_timer(id, event);
            if is_receipt {
                return;
            }
        }
    }
}

fn hash(byte: u8) -> MessageHash {
    MessageHash::new(vec![byte; 32])
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

#[test]
fn broadcast_skips_every_announcing_peer() {
    let mut h = Harness::new(4);
    let target = hash(1);
    h.announce(2, &target, MessageType::Transaction);
    h.announce(4, &target, MessageType::Transaction);

    h.service.broadcast(&target, MessageType::Transaction, None);

    assert!(h.peer(1).announced(&target));
    assert!(!h.peer(2).announced(&target));
    assert!(h.peer(3).announced(&target));
    assert!(!h.peer(4).announced(&target));
}

#[test]
fn announced_data_can_be_fetched_immediately() {
    let mut h = Harness::new(2);
    let target = hash(2);
    h.service
        .register_and_broadcast(MessageType::Vote, target.clone(), b"vote".to_vec(), None);

    // Every peer that heard the announce asks for the payload right away.
    for id in 1..=2 {
        assert!(h.peer(id).announced(&target));
        h.service.handle_message(
            PeerId::new(id),
            PeerMessage::FullMessageRequest {
                hash: target.clone(),
            },
        );
        let last = h.peer(id).sent.lock().last().cloned().unwrap();
        assert_eq!(
            last,
            PeerMessage::FullMessage {
                hash: target.clone(),
                msg_type: MessageType::Vote,
                payload: b"vote".to_vec(),
            }
        );
    }
}

// ---------------------------------------------------------------------------
// Full-message requests
// ---------------------------------------------------------------------------

#[test]
fn each_timeout_asks_the_next_announcer_once() {
    let mut h = Harness::new(3);
    let target = hash(3);
    for id in [3, 1, 2] {
        h.announce(id, &target, MessageType::Transaction);
    }

    assert_eq!(h.peer(3).requested(), vec![target.clone()]);
    h.fire_receipt_timeout();
    assert_eq!(h.peer(1).requested(), vec![target.clone()]);
    h.fire_receipt_timeout();
    assert_eq!(h.peer(2).requested(), vec![target.clone()]);

    let state = h.service.registry().request_state(&target).unwrap();
    assert_eq!(state.asked(), &[PeerId::new(3), PeerId::new(1), PeerId::new(2)]);
    for id in 1..=3 {
        assert_eq!(h.peer(id).requested().len(), 1);
    }
}

#[test]
fn exhausted_request_leaves_no_state() {
    let mut h = Harness::new(2);
    let target = hash(4);
    h.announce(1, &target, MessageType::Stake);
    h.announce(2, &target, MessageType::Stake);

    h.fire_receipt_timeout();
    h.fire_receipt_timeout();

    assert!(h.service.registry().request_state(&target).is_none());
    assert!(h.service.scheduler().pending().is_empty());
    assert_eq!(h.service.stats().requests_exhausted, 1);
}

#[test]
fn request_for_known_hash_is_a_no_op() {
    let mut h = Harness::new(1);
    let target = hash(5);
    h.announce(1, &target, MessageType::Transaction);
    h.service
        .register_and_broadcast(MessageType::Transaction, target.clone(), vec![5], None);

    let outcome = h.service.request_full_message(&target).unwrap();

    assert_eq!(outcome, RequestOutcome::AlreadyKnown);
    assert!(h.service.registry().request_state(&target).is_none());
    assert!(h.service.scheduler().pending().is_empty());
    assert_eq!(h.peer(1).requested().len(), 1);
}

#[test]
fn request_for_unannounced_hash_is_reported() {
    let mut h = Harness::new(1);
    assert!(h.service.request_full_message(&hash(6)).is_err());
}

#[test]
fn timeout_after_delivery_does_nothing() {
    let mut h = Harness::new(2);
    let target = hash(7);
    h.announce(1, &target, MessageType::Transaction);
    h.announce(2, &target, MessageType::Transaction);
    let (id, event) = h.service.scheduler_mut().fire_next().unwrap();

    let outcome = h.service.handle_message(
        PeerId::new(1),
        PeerMessage::FullMessage {
            hash: target.clone(),
            msg_type: MessageType::Transaction,
            payload: vec![7],
        },
    );
    assert!(matches!(outcome, InboundOutcome::Delivered { .. }));

    h.service.handle_timer(id, event);
    assert!(h.peer(2).requested().is_empty());
    assert_eq!(h.service.stats().stale_timers, 1);
}

// ---------------------------------------------------------------------------
// Consensus selection
// ---------------------------------------------------------------------------

#[test]
fn selector_prunes_when_accepted_block_wins() {
    let mut h = Harness::new(1);
    h.chain.write().append(50);
    h.service.track_block_number(1);
    for byte in [11, 12] {
        h.announce(1, &hash(byte), MessageType::Block);
    }
    h.service.push_candidate(60, hash(11));
    h.service.push_candidate(70, hash(12));

    let outcome = h.service.select_best_bkmr();

    assert_eq!(outcome, SelectionOutcome::Pruned { discarded: 2 });
    assert_eq!(h.service.selector().queued(), 0);
    assert!(h.peer(1).requested().is_empty());
    assert!(h.service.scheduler().pending().is_empty());
}

#[test]
fn selector_requests_winning_candidate_and_reschedules() {
    let mut h = Harness::new(1);
    h.chain.write().append(50);
    h.service.track_block_number(1);
    h.announce(1, &hash(11), MessageType::Block);
    h.service.push_candidate(40, hash(11));

    let (id, event) = h.service.scheduler_mut().fire_next().unwrap();
    assert_eq!(event, TimerEvent::Reselect);
    h.service.handle_timer(id, event);

    assert_eq!(h.peer(1).requested(), vec![hash(11)]);
    let now = h.service.scheduler().now();
    let next = h
        .service
        .scheduler()
        .pending()
        .iter()
        .find(|t| t.event == TimerEvent::Reselect)
        .cloned()
        .expect("next selection step armed");
    assert_eq!(next.due, now + CONSENSUS_RESELECT_DELAY);
}

struct UnavailableChain;

impl ChainView for UnavailableChain {
    fn height(&self) -> u64 {
        10
    }

    fn score_at(&self, _height: u64) -> Result<BlockScore, ChainError> {
        Err(ChainError::Unavailable("store offline".to_string()))
    }
}

#[test]
fn selector_survives_chain_failure() {
    let mut service = NetworkService::new(
        NetworkConfig::default(),
        Arc::new(UnavailableChain),
        Arc::new(CountingConnector::default()),
        ManualScheduler::new(),
    );
    service.track_block_number(3);
    service.push_candidate(5, hash(13));
    service.push_candidate(6, hash(14));

    let (id, event) = service.scheduler_mut().fire_next().unwrap();
    service.handle_timer(id, event);

    // The failed step was skipped and the next one is armed.
    assert_eq!(service.selector().queued(), 1);
    let (id, event) = service.scheduler_mut().fire_next().unwrap();
    assert_eq!(event, TimerEvent::Reselect);
    service.handle_timer(id, event);
    assert_eq!(service.selector().queued(), 0);
    assert_eq!(service.select_best_bkmr(), SelectionOutcome::Empty);
}

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

#[test]
fn connect_peers_is_idempotent_while_connected() {
    let mut h = Harness::new(2);

    assert_eq!(h.service.connect_peers(), 0);
    assert_eq!(h.service.connect_peers(), 0);
    assert!(h.connector.attempts.lock().is_empty());
}

#[test]
fn lost_peer_is_dialed_again_only_on_request() {
    let mut h = Harness::new(2);
    h.service.connection_lost(PeerId::new(2), "closed");
    assert!(h.connector.attempts.lock().is_empty());

    assert_eq!(h.service.connect_peers(), 1);
    assert_eq!(h.service.connect_peers(), 0);
    assert_eq!(*h.connector.attempts.lock(), vec!["10.0.0.2".to_string()]);

    // Lost peers are not asked for anything any more.
    let target = hash(8);
    h.announce(1, &target, MessageType::Transaction);
    assert_eq!(h.service.stats().connected_peers, 1);
    assert!(h.peer(2).requested().is_empty());
}
