//! # Gossip Broadcaster
//!
//! Announce-by-hash fan-out. Locally originated data is registered as fully
//! known *before* any peer hears about it, so a full-message request that
//! races the announce can always be answered.
//!
//! Peers that announced the same hash to us are skipped: they already hold
//! it. Those are exactly the candidate peers of the hash's request state.

use tracing::debug;

use crate::network::context::NetworkContext;
use crate::network::message::{AnnounceRecord, BlockFields, MessageHash, MessageType, PeerMessage};
use crate::network::peers::PeerId;
use crate::network::timer::Scheduler;

/// Running totals for announce fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Announces handed to a peer link successfully.
    pub announces_sent: u64,
    /// Per-peer write failures during fan-out.
    pub send_failures: u64,
}

#[derive(Debug, Default)]
pub struct GossipBroadcaster {
    stats: BroadcastStats,
}

impl GossipBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats
    }

    /// Registers `payload` under `hash`, then announces it to every peer.
    ///
    /// `extra` carries block fields; hash and type always come from the
    /// arguments.
    pub fn register_and_broadcast<S: Scheduler>(
        &mut self,
        ctx: &mut NetworkContext<S>,
        msg_type: MessageType,
        hash: MessageHash,
        payload: Vec<u8>,
        extra: Option<BlockFields>,
    ) {
        ctx.registry.register(hash.clone(), payload, msg_type);

        let record = AnnounceRecord::with_fields(hash.clone(), msg_type, extra);
        self.broadcast(ctx, &hash, msg_type, Some(record));
    }

    /// Sends the announce for `hash` to every connected peer that did not
    /// announce it to us. A minimal record is built when `record` is `None`.
    pub fn broadcast<S: Scheduler>(
        &mut self,
        ctx: &NetworkContext<S>,
        hash: &MessageHash,
        msg_type: MessageType,
        record: Option<AnnounceRecord>,
    ) {
        let ignore: &[PeerId] = ctx
            .registry
            .request_state(hash)
            .map(|state| state.peers())
            .unwrap_or(&[]);

        let record = record.unwrap_or_else(|| AnnounceRecord::new(hash.clone(), msg_type));
        let message = PeerMessage::Announce(record);
        let report = ctx.peers.send_all(&message, |session| ignore.contains(&session.id()));

        self.stats.announces_sent += report.delivered as u64;
        self.stats.send_failures += report.failed as u64;

        debug!(
            %hash,
            msg_type = %msg_type,
            delivered = report.delivered,
            failed = report.failed,
            skipped = ignore.len(),
            "announce broadcast"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::{context, hash, session, BrokenLink, RecordingLink};
    use std::sync::Arc;

    #[test]
    fn broadcast_skips_peers_that_announced_the_hash() {
        let (mut ctx, links) = context(&[1, 2, 3]);
        let record = AnnounceRecord::new(hash(9), MessageType::Transaction);
        ctx.registry.add_peer(record.clone(), PeerId::new(1));
        ctx.registry.add_peer(record, PeerId::new(3));

        let mut broadcaster = GossipBroadcaster::new();
        broadcaster.broadcast(&ctx, &hash(9), MessageType::Transaction, None);

        assert_eq!(links[0].announces(), 0);
        assert_eq!(links[1].announces(), 1);
        assert_eq!(links[2].announces(), 0);
        assert_eq!(broadcaster.stats().announces_sent, 1);
    }

    #[test]
    fn broadcast_without_request_state_reaches_everyone() {
        let (ctx, links) = context(&[1, 2]);
        let mut broadcaster = GossipBroadcaster::new();
        broadcaster.broadcast(&ctx, &hash(4), MessageType::Vote, None);

        for link in &links {
            let sent = link.sent();
            assert_eq!(sent.len(), 1);
            match &sent[0] {
                PeerMessage::Announce(record) => {
                    assert_eq!(record.hash(), &hash(4));
                    assert_eq!(record.msg_type(), MessageType::Vote);
                }
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[test]
    fn register_happens_before_announce() {
        let (mut ctx, links) = context(&[1]);
        let mut broadcaster = GossipBroadcaster::new();
        broadcaster.register_and_broadcast(
            &mut ctx,
            MessageType::Stake,
            hash(5),
            b"stake".to_vec(),
            None,
        );

        assert!(ctx.registry.is_fully_known(&hash(5)));
        assert_eq!(ctx.registry.get(&hash(5)).unwrap().payload, b"stake");
        assert_eq!(links[0].announces(), 1);
    }

    #[test]
    fn block_fields_travel_with_the_announce() {
        let (mut ctx, links) = context(&[1]);
        let mut broadcaster = GossipBroadcaster::new();
        let fields = BlockFields {
            stake_selector: "Q01".to_string(),
            block_number: 7,
            prev_header_hash: hash(6),
            reveal_hash: Some(hash(8)),
        };
        broadcaster.register_and_broadcast(&mut ctx, MessageType::Block, hash(7), vec![], Some(fields));

        match &links[0].sent()[0] {
            PeerMessage::Announce(record) => {
                assert_eq!(record.hash(), &hash(7));
                assert_eq!(record.msg_type(), MessageType::Block);
                assert_eq!(record.block_number(), Some(7));
                assert_eq!(record.reveal_hash(), Some(&hash(8)));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn broken_peer_is_isolated() {
        let (mut ctx, links) = context(&[1]);
        ctx.peers
            .connection_made(session(2, Arc::new(BrokenLink(PeerId::new(2)))));
        let late = Arc::new(RecordingLink::default());
        ctx.peers.connection_made(session(3, late.clone()));

        let mut broadcaster = GossipBroadcaster::new();
        broadcaster.broadcast(&ctx, &hash(1), MessageType::Transaction, None);

        assert_eq!(links[0].announces(), 1);
        assert_eq!(late.announces(), 1);
        assert_eq!(
            broadcaster.stats(),
            BroadcastStats {
                announces_sent: 2,
                send_failures: 1
            }
        );
    }
}
