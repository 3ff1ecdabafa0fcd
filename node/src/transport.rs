//! # TCP Transport
//!
//! The node's connection layer. Each peer connection carries
//! newline-delimited JSON [`PeerMessage`] frames in both directions.
//!
//! - The **reader** task decodes frames and hands them to the event loop
//!   with [`NetworkHandle::deliver`]. A malformed frame is logged and
//!   skipped; EOF or a read error reports the connection as lost.
//! - The **writer** task drains the session's queue. The queue closes when
//!   the service drops the session, which ends the writer and closes the
//!   socket's write half.
//!
//! Sessions get their [`PeerId`] from a process-wide counter.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use lattice_protocol::network::{
    Connector, NetworkHandle, PeerId, PeerLink, PeerMessage, PeerSession, TransportError,
};

/// Encodes one frame: the JSON message followed by `\n`.
pub fn encode_frame(message: &PeerMessage) -> Result<Vec<u8>, TransportError> {
    let mut frame = serde_json::to_vec(message).map_err(|e| TransportError::Encode(e.to_string()))?;
    frame.push(b'\n');
    Ok(frame)
}

/// Write side of one TCP session.
pub struct TcpLink {
    peer: PeerId,
    frames: mpsc::UnboundedSender<Vec<u8>>,
}

impl PeerLink for TcpLink {
    fn send(&self, message: PeerMessage) -> Result<(), TransportError> {
        let frame = encode_frame(&message)?;
        self.frames
            .send(frame)
            .map_err(|_| TransportError::Disconnected(self.peer))
    }
}

/// Accepts and dials connections, reporting every lifecycle event to the
/// event loop.
pub struct Transport {
    handle: NetworkHandle,
    next_id: AtomicU64,
}

impl Transport {
    pub fn new(handle: NetworkHandle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            next_id: AtomicU64::new(1),
        })
    }

    /// Accepts inbound peers until shutdown.
    pub async fn listen(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => self.attach(stream, remote, None),
                    Err(e) => warn!(error = %e, "failed to accept peer connection"),
                },
                _ = shutdown.changed() => {
                    debug!("p2p listener stopping");
                    return;
                }
            }
        }
    }

    /// Dials `host:port`, reporting the outcome to the event loop.
    pub async fn dial(self: Arc<Self>, host: String, port: u16) {
        self.report(self.handle.started_connecting(host.as_str()));

        let connected = TcpStream::connect((host.as_str(), port)).await;
        match connected {
            Ok(stream) => match stream.peer_addr() {
                Ok(remote) => self.attach(stream, remote, Some(host)),
                Err(e) => self.report(self.handle.connection_failed(host, e.to_string())),
            },
            Err(e) => self.report(self.handle.connection_failed(host, e.to_string())),
        }
    }

    /// `dialed` is the configured address for outbound sessions.
    fn attach(self: &Arc<Self>, stream: TcpStream, remote: SocketAddr, dialed: Option<String>) {
        let peer = PeerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reader, writer) = stream.into_split();
        let (frames, queue) = mpsc::unbounded_channel();

        info!(%peer, %remote, "peer transport attached");
        let link = Arc::new(TcpLink { peer, frames });
        let mut session = PeerSession::new(peer, remote, link);
        if let Some(address) = dialed {
            session = session.with_dialed_address(address);
        }
        self.report(self.handle.connection_made(session));

        tokio::spawn(write_frames(peer, writer, queue));
        tokio::spawn(Arc::clone(self).read_frames(peer, reader));
    }

    async fn read_frames(self: Arc<Self>, peer: PeerId, reader: OwnedReadHalf) {
        let mut lines = BufReader::new(reader).lines();

        let reason = loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<PeerMessage>(&line) {
                    Ok(message) => {
                        if self.handle.deliver(peer, message).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(%peer, error = %e, "dropping malformed frame"),
                },
                Ok(None) => break "closed by peer".to_string(),
                Err(e) => break e.to_string(),
            }
        };

        self.report(self.handle.connection_lost(peer, reason));
    }

    fn report(&self, posted: Result<(), lattice_protocol::network::PropagationError>) {
        if let Err(e) = posted {
            debug!(error = %e, "connection event not delivered");
        }
    }
}

async fn write_frames(peer: PeerId, mut writer: OwnedWriteHalf, mut queue: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            warn!(%peer, error = %e, "peer write failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// [`Connector`] that dials on a fresh task. Must be called from inside the
/// tokio runtime.
pub struct TcpConnector {
    transport: Arc<Transport>,
}

impl TcpConnector {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, host: &str, port: u16) {
        tokio::spawn(Arc::clone(&self.transport).dial(host.to_string(), port));
    }
}
