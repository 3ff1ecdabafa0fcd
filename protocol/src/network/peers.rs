//! # Peer Registry
//!
//! Tracks the live peer sessions reported by the connection layer and drives
//! outbound connections to the configured address list.
//!
//! The registry never owns a socket. Each [`PeerSession`] holds an
//! `Arc<dyn PeerLink>` send capability that the connection layer created and
//! will shut down on its own schedule; this side only writes through it and
//! uses the session id for membership tests.
//!
//! ## Lifecycle
//!
//! ```text
//! connect_peers() ──> Connector::connect(host, port)
//!                        │
//!            started_connecting / connection_failed / connection_made
//!                                                        │
//!                                               connection_lost (log only)
//! ```
//!
//! A lost connection is logged and dropped. Nothing re-dials it.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::network::error::TransportError;
use crate::network::message::PeerMessage;

// ---------------------------------------------------------------------------
// Connection-layer contracts
// ---------------------------------------------------------------------------

/// Identifier the connection layer assigns to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(u64);

impl PeerId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Write side of a peer transport. Implementations must not block: queue the
/// message and return.
pub trait PeerLink: Send + Sync {
    fn send(&self, message: PeerMessage) -> Result<(), TransportError>;
}

/// Initiates outbound connections. Outcomes come back as connection events
/// on the service.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &str, port: u16);
}

// ---------------------------------------------------------------------------
// PeerSession
// ---------------------------------------------------------------------------

/// One live connection.
#[derive(Clone)]
pub struct PeerSession {
    id: PeerId,
    remote: SocketAddr,
    dialed: Option<String>,
    synced: bool,
    last_seen: Option<DateTime<Utc>>,
    link: Arc<dyn PeerLink>,
}

impl PeerSession {
    pub fn new(id: PeerId, remote: SocketAddr, link: Arc<dyn PeerLink>) -> Self {
        Self {
            id,
            remote,
            dialed: None,
            synced: false,
            last_seen: None,
            link,
        }
    }

    /// Tags an outbound session with the address it was dialed by, which
    /// may be a hostname rather than the resolved IP.
    pub fn with_dialed_address(mut self, address: impl Into<String>) -> Self {
        self.dialed = Some(address.into());
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Remote host as an IP literal, the form used in the address list.
    pub fn host(&self) -> String {
        self.remote.ip().to_string()
    }

    pub fn dialed_address(&self) -> Option<&str> {
        self.dialed.as_deref()
    }

    /// Whether this session serves the configured `address`.
    pub fn matches_address(&self, address: &str) -> bool {
        self.dialed.as_deref() == Some(address) || self.host() == address
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// When this peer last answered a ping.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    pub fn send(&self, message: PeerMessage) -> Result<(), TransportError> {
        self.link.send(message)
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("dialed", &self.dialed)
            .field("synced", &self.synced)
            .finish()
    }
}

/// Per-peer delivery tally of a fan-out send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub delivered: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// PeerRegistry
// ---------------------------------------------------------------------------

/// Live sessions plus the configured dial list.
pub struct PeerRegistry {
    peer_addresses: Vec<String>,
    peer_port: u16,
    sessions: Vec<PeerSession>,
    synced_peers: HashSet<PeerId>,
    /// Hosts with an outbound attempt that has not resolved yet.
    connecting: HashSet<String>,
    connector: Arc<dyn Connector>,
    last_ping: Option<DateTime<Utc>>,
}

impl PeerRegistry {
    pub fn new(peer_addresses: Vec<String>, peer_port: u16, connector: Arc<dyn Connector>) -> Self {
        Self {
            peer_addresses,
            peer_port,
            sessions: Vec::new(),
            synced_peers: HashSet::new(),
            connecting: HashSet::new(),
            connector,
            last_ping: None,
        }
    }

    /// Dials every configured address that has neither a live session nor an
    /// attempt in flight. Returns the number of attempts issued.
    pub fn connect_peers(&mut self) -> usize {
        info!(peers = ?self.peer_addresses, "<<<Reconnecting to peer list");

        let mut issued = 0;
        for address in &self.peer_addresses {
            let connected = self.sessions.iter().any(|s| s.matches_address(address));
            if connected || self.connecting.contains(address) {
                continue;
            }
            self.connector.connect(address, self.peer_port);
            self.connecting.insert(address.clone());
            issued += 1;
        }
        issued
    }

    /// Registers a session reported by the connection layer.
    pub fn connection_made(&mut self, session: PeerSession) {
        self.connecting.remove(&session.host());
        if let Some(address) = session.dialed_address() {
            self.connecting.remove(address);
        }
        info!(peer = %session.id(), remote = %session.remote(), "peer connected");

        self.sessions.retain(|s| s.id() != session.id());
        self.sessions.push(session);
    }

    /// Drops a session. Reconnect is disabled; the peer stays gone until the
    /// next explicit `connect_peers`.
    pub fn connection_lost(&mut self, peer: PeerId, reason: &str) -> Option<PeerSession> {
        debug!(%peer, reason, "connection lost");
        self.synced_peers.remove(&peer);
        let index = self.sessions.iter().position(|s| s.id() == peer)?;
        Some(self.sessions.remove(index))
    }

    pub fn connection_failed(&mut self, host: &str, reason: &str) {
        self.connecting.remove(host);
        debug!(host, reason, "connection failed");
    }

    pub fn started_connecting(&self, host: &str) {
        debug!(host, "started connecting");
    }

    /// Clears the synced set and asks every peer for its sync status.
    /// Replies arrive later through [`PeerRegistry::set_synced`].
    pub fn get_synced_state(&mut self) -> SendReport {
        self.synced_peers.clear();
        for session in &mut self.sessions {
            session.synced = false;
        }
        self.send_all(&PeerMessage::SyncStatusRequest, |_| false)
    }

    /// Records a peer's answer to a sync status request.
    pub fn set_synced(&mut self, peer: PeerId, synced: bool) {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id() == peer) else {
            debug!(%peer, "sync status from unknown peer");
            return;
        };
        session.synced = synced;
        if synced {
            self.synced_peers.insert(peer);
        } else {
            self.synced_peers.remove(&peer);
        }
    }

    /// Sends a liveness probe to every peer.
    pub fn ping_peers(&mut self) -> SendReport {
        info!("<<<Transmitting network PING");
        self.last_ping = Some(Utc::now());
        self.send_all(&PeerMessage::Ping, |_| false)
    }

    /// Marks a peer as seen just now.
    pub fn touch(&mut self, peer: PeerId) {
        if let Some(session) = self.sessions.iter_mut().find(|s| s.id() == peer) {
            session.last_seen = Some(Utc::now());
        }
    }

    /// Sends `message` to one peer.
    pub fn send_to(&self, peer: PeerId, message: PeerMessage) -> Result<(), TransportError> {
        self.get(peer)
            .ok_or(TransportError::UnknownPeer(peer))?
            .send(message)
    }

    /// Sends `message` to every session `skip` does not exclude. A failing
    /// peer is logged and counted; the remaining peers still get the message.
    pub fn send_all<F>(&self, message: &PeerMessage, skip: F) -> SendReport
    where
        F: Fn(&PeerSession) -> bool,
    {
        let mut report = SendReport::default();
        for session in self.sessions.iter().filter(|s| !skip(s)) {
            match session.send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(peer = %session.id(), kind = message.kind(), error = %e, "failed to write to peer");
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn get(&self, peer: PeerId) -> Option<&PeerSession> {
        self.sessions.iter().find(|s| s.id() == peer)
    }

    pub fn sessions(&self) -> &[PeerSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn synced_peers(&self) -> &HashSet<PeerId> {
        &self.synced_peers
    }

    pub fn last_ping(&self) -> Option<DateTime<Utc>> {
        self.last_ping
    }

    pub fn peer_addresses(&self) -> &[String] {
        &self.peer_addresses
    }
}

impl fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peer_addresses", &self.peer_addresses)
            .field("sessions", &self.sessions)
            .field("connecting", &self.connecting)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingLink {
        sent: Mutex<Vec<PeerMessage>>,
    }

    impl PeerLink for RecordingLink {
        fn send(&self, message: PeerMessage) -> Result<(), TransportError> {
            self.sent.lock().push(message);
            Ok(())
        }
    }

    struct BrokenLink(PeerId);

    impl PeerLink for BrokenLink {
        fn send(&self, _message: PeerMessage) -> Result<(), TransportError> {
            Err(TransportError::Disconnected(self.0))
        }
    }

    #[derive(Default)]
    struct RecordingConnector {
        dialed: Mutex<Vec<(String, u16)>>,
    }

    impl Connector for RecordingConnector {
        fn connect(&self, host: &str, port: u16) {
            self.dialed.lock().push((host.to_string(), port));
        }
    }

    fn session(id: u64, host: &str, link: Arc<dyn PeerLink>) -> PeerSession {
        let remote: SocketAddr = format!("{}:9000", host).parse().unwrap();
        PeerSession::new(PeerId::new(id), remote, link)
    }

    fn registry(addresses: &[&str]) -> (PeerRegistry, Arc<RecordingConnector>) {
        let connector = Arc::new(RecordingConnector::default());
        let registry = PeerRegistry::new(
            addresses.iter().map(|a| a.to_string()).collect(),
            9000,
            connector.clone(),
        );
        (registry, connector)
    }

    #[test]
    fn connect_peers_dials_every_unconnected_address() {
        let (mut peers, connector) = registry(&["10.0.0.1", "10.0.0.2"]);
        peers.connection_made(session(1, "10.0.0.1", Arc::new(RecordingLink::default())));

        assert_eq!(peers.connect_peers(), 1);
        assert_eq!(*connector.dialed.lock(), vec![("10.0.0.2".to_string(), 9000)]);
    }

    #[test]
    fn connect_peers_twice_issues_no_duplicate_attempts() {
        let (mut peers, connector) = registry(&["10.0.0.1", "10.0.0.2"]);
        peers.connection_made(session(1, "10.0.0.1", Arc::new(RecordingLink::default())));
        peers.connection_made(session(2, "10.0.0.2", Arc::new(RecordingLink::default())));

        assert_eq!(peers.connect_peers(), 0);
        assert_eq!(peers.connect_peers(), 0);
        assert!(connector.dialed.lock().is_empty());
    }

    #[test]
    fn in_flight_attempt_is_not_repeated() {
        let (mut peers, connector) = registry(&["10.0.0.3"]);
        assert_eq!(peers.connect_peers(), 1);
        assert_eq!(peers.connect_peers(), 0);
        assert_eq!(connector.dialed.lock().len(), 1);

        peers.connection_failed("10.0.0.3", "refused");
        assert_eq!(peers.connect_peers(), 1);
        assert_eq!(connector.dialed.lock().len(), 2);
    }

    #[test]
    fn lost_connection_is_not_redialed() {
        let (mut peers, connector) = registry(&["10.0.0.1"]);
        peers.connection_made(session(1, "10.0.0.1", Arc::new(RecordingLink::default())));

        let dropped = peers.connection_lost(PeerId::new(1), "reset by peer");
        assert!(dropped.is_some());
        assert!(peers.is_empty());
        assert!(connector.dialed.lock().is_empty());
    }

    #[test]
    fn hostname_entry_is_redialed_after_loss() {
        let (mut peers, connector) = registry(&["localhost"]);
        assert_eq!(peers.connect_peers(), 1);

        let link: Arc<dyn PeerLink> = Arc::new(RecordingLink::default());
        peers.connection_made(session(1, "127.0.0.1", link).with_dialed_address("localhost"));
        assert_eq!(peers.connect_peers(), 0);

        peers.connection_lost(PeerId::new(1), "reset by peer");
        assert_eq!(peers.connect_peers(), 1);
        assert_eq!(connector.dialed.lock().len(), 2);
    }

    #[test]
    fn ping_reaches_all_peers_and_records_time() {
        let (mut peers, _) = registry(&[]);
        let a = Arc::new(RecordingLink::default());
        let b = Arc::new(RecordingLink::default());
        peers.connection_made(session(1, "10.0.0.1", a.clone()));
        peers.connection_made(session(2, "10.0.0.2", b.clone()));

        assert!(peers.last_ping().is_none());
        let report = peers.ping_peers();

        assert_eq!(report.delivered, 2);
        assert!(peers.last_ping().is_some());
        assert_eq!(*a.sent.lock(), vec![PeerMessage::Ping]);
        assert_eq!(*b.sent.lock(), vec![PeerMessage::Ping]);
    }

    #[test]
    fn failing_peer_does_not_block_the_rest() {
        let (mut peers, _) = registry(&[]);
        let healthy = Arc::new(RecordingLink::default());
        peers.connection_made(session(1, "10.0.0.1", Arc::new(BrokenLink(PeerId::new(1)))));
        peers.connection_made(session(2, "10.0.0.2", healthy.clone()));

        let report = peers.ping_peers();
        assert_eq!(report, SendReport { delivered: 1, failed: 1 });
        assert_eq!(healthy.sent.lock().len(), 1);
    }

    #[test]
    fn sync_poll_clears_and_collects_status() {
        let (mut peers, _) = registry(&[]);
        let link = Arc::new(RecordingLink::default());
        peers.connection_made(session(1, "10.0.0.1", link.clone()));
        peers.set_synced(PeerId::new(1), true);
        assert_eq!(peers.synced_peers().len(), 1);

        peers.get_synced_state();
        assert!(peers.synced_peers().is_empty());
        assert!(!peers.get(PeerId::new(1)).unwrap().is_synced());
        assert_eq!(*link.sent.lock(), vec![PeerMessage::SyncStatusRequest]);

        peers.set_synced(PeerId::new(1), true);
        assert!(peers.synced_peers().contains(&PeerId::new(1)));
    }

    #[test]
    fn send_to_unknown_peer_fails() {
        let (peers, _) = registry(&[]);
        let err = peers.send_to(PeerId::new(9), PeerMessage::Ping).unwrap_err();
        assert!(matches!(err, TransportError::UnknownPeer(_)));
    }
}
