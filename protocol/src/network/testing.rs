//! Fakes shared by the network unit tests.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::network::context::NetworkContext;
use crate::network::error::TransportError;
use crate::network::message::{MessageHash, PeerMessage};
use crate::network::peers::{Connector, PeerId, PeerLink, PeerRegistry, PeerSession};
use crate::network::receipt::MessageReceiptRegistry;
use crate::network::timer::ManualScheduler;

/// Link that keeps every message it was asked to send.
#[derive(Default)]
pub(crate) struct RecordingLink {
    sent: Mutex<Vec<PeerMessage>>,
}

impl RecordingLink {
    pub(crate) fn sent(&self) -> Vec<PeerMessage> {
        self.sent.lock().clone()
    }

    pub(crate) fn full_requests(&self) -> Vec<MessageHash> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                PeerMessage::FullMessageRequest { hash } => Some(hash.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn announces(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| matches!(m, PeerMessage::Announce(_)))
            .count()
    }
}

impl PeerLink for RecordingLink {
    fn send(&self, message: PeerMessage) -> Result<(), TransportError> {
        self.sent.lock().push(message);
        Ok(())
    }
}

/// Link whose writes always fail.
pub(crate) struct BrokenLink(pub(crate) PeerId);

impl PeerLink for BrokenLink {
    fn send(&self, _message: PeerMessage) -> Result<(), TransportError> {
        Err(TransportError::Disconnected(self.0))
    }
}

#[derive(Default)]
pub(crate) struct RecordingConnector {
    pub(crate) dialed: Mutex<Vec<(String, u16)>>,
}

impl Connector for RecordingConnector {
    fn connect(&self, host: &str, port: u16) {
        self.dialed.lock().push((host.to_string(), port));
    }
}

pub(crate) fn hash(byte: u8) -> MessageHash {
    MessageHash::new(vec![byte; 32])
}

pub(crate) fn session(id: u64, link: Arc<dyn PeerLink>) -> PeerSession {
    let remote: SocketAddr = format!("10.0.0.{}:9000", id).parse().expect("valid addr");
    PeerSession::new(PeerId::new(id), remote, link)
}

/// Context with one recording peer per id in `ids`.
pub(crate) fn context(ids: &[u64]) -> (NetworkContext<ManualScheduler>, Vec<Arc<RecordingLink>>) {
    let mut peers = PeerRegistry::new(Vec::new(), 9000, Arc::new(RecordingConnector::default()));
    let mut links = Vec::new();
    for &id in ids {
        let link = Arc::new(RecordingLink::default());
        peers.connection_made(session(id, link.clone()));
        links.push(link);
    }
    let ctx = NetworkContext::new(MessageReceiptRegistry::new(64), peers, ManualScheduler::new());
    (ctx, links)
}
