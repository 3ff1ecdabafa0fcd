//! # Announce Records & Peer Messages
//!
//! Everything that crosses the wire between two peers at this layer. Byte
//! encoding is the connection layer's business; these types only derive
//! `serde` so any framing can carry them.
//!
//! The protocol is announce-first: a node advertises what it holds with a
//! small [`AnnounceRecord`] and peers pull the payload with a
//! [`PeerMessage::FullMessageRequest`] when they do not have it yet.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MessageHash
// ---------------------------------------------------------------------------

/// Identifier of a gossiped payload. Opaque bytes, printed as hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageHash(Vec<u8>);

impl MessageHash {
    /// Wraps raw hash bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw hash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Vec<u8>> for MessageHash {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for MessageHash {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<[u8; 32]> for MessageHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageHash({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Kind of payload an announce refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "TX")]
    Transaction,
    #[serde(rename = "BK")]
    Block,
    #[serde(rename = "ST")]
    Stake,
    #[serde(rename = "VT")]
    Vote,
    #[serde(rename = "DST")]
    Destake,
}

impl MessageType {
    /// Short wire code, also used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transaction => "TX",
            Self::Block => "BK",
            Self::Stake => "ST",
            Self::Vote => "VT",
            Self::Destake => "DST",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// AnnounceRecord
// ---------------------------------------------------------------------------

/// Block-specific announce fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFields {
    /// Address of the staker that produced the block.
    pub stake_selector: String,
    /// Height of the announced block.
    pub block_number: u64,
    /// Header hash of the parent block.
    pub prev_header_hash: MessageHash,
    /// Hash-chain reveal. Dropped for blocks at height 1 or below.
    pub reveal_hash: Option<MessageHash>,
}

/// "A peer may fetch this by hash."
///
/// Immutable once built: the constructors are the only way to set fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceRecord {
    hash: MessageHash,
    msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stake_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prev_header_hash: Option<MessageHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reveal_hash: Option<MessageHash>,
}

impl AnnounceRecord {
    /// Minimal record carrying only hash and type.
    pub fn new(hash: MessageHash, msg_type: MessageType) -> Self {
        Self {
            hash,
            msg_type,
            stake_selector: None,
            block_number: None,
            prev_header_hash: None,
            reveal_hash: None,
        }
    }

    /// Record for `hash`/`msg_type`, populated from `extra` when given.
    ///
    /// The reveal hash is only kept for blocks above height 1.
    pub fn with_fields(hash: MessageHash, msg_type: MessageType, extra: Option<BlockFields>) -> Self {
        let mut record = Self::new(hash, msg_type);
        if let Some(fields) = extra {
            record.reveal_hash = fields.reveal_hash.filter(|_| fields.block_number > 1);
            record.stake_selector = Some(fields.stake_selector);
            record.block_number = Some(fields.block_number);
            record.prev_header_hash = Some(fields.prev_header_hash);
        }
        record
    }

    pub fn hash(&self) -> &MessageHash {
        &self.hash
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn stake_selector(&self) -> Option<&str> {
        self.stake_selector.as_deref()
    }

    pub fn block_number(&self) -> Option<u64> {
        self.block_number
    }

    pub fn prev_header_hash(&self) -> Option<&MessageHash> {
        self.prev_header_hash.as_ref()
    }

    pub fn reveal_hash(&self) -> Option<&MessageHash> {
        self.reveal_hash.as_ref()
    }
}

// ---------------------------------------------------------------------------
// PeerMessage
// ---------------------------------------------------------------------------

/// Every message kind exchanged with peers by the propagation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Announce (MR): the sender holds the payload for this hash.
    Announce(AnnounceRecord),
    /// Ask the receiver for the full payload of `hash`.
    FullMessageRequest { hash: MessageHash },
    /// Full payload answering a request.
    FullMessage {
        hash: MessageHash,
        msg_type: MessageType,
        payload: Vec<u8>,
    },
    /// Ask the receiver to report whether it is synced.
    SyncStatusRequest,
    /// Answer to [`PeerMessage::SyncStatusRequest`].
    SyncStatus { synced: bool },
    /// Liveness probe.
    Ping,
    /// Answer to [`PeerMessage::Ping`].
    Pong,
}

impl PeerMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Announce(_) => "MR",
            Self::FullMessageRequest { .. } => "SFM",
            Self::FullMessage { .. } => "FM",
            Self::SyncStatusRequest => "SYNC",
            Self::SyncStatus { .. } => "SYNC_STATUS",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_fields(block_number: u64) -> BlockFields {
        BlockFields {
            stake_selector: "Q0105".to_string(),
            block_number,
            prev_header_hash: MessageHash::new(vec![0xaa; 4]),
            reveal_hash: Some(MessageHash::new(vec![0xbb; 4])),
        }
    }

    #[test]
    fn hash_displays_as_hex() {
        let hash = MessageHash::new(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(hash.to_string(), "deadbeef");
        assert_eq!(format!("{:?}", hash), "MessageHash(deadbeef)");
    }

    #[test]
    fn minimal_record_has_no_block_fields() {
        let record = AnnounceRecord::new(MessageHash::new(vec![1]), MessageType::Vote);
        assert_eq!(record.msg_type(), MessageType::Vote);
        assert!(record.block_number().is_none());
        assert!(record.stake_selector().is_none());
        assert!(record.reveal_hash().is_none());
    }

    #[test]
    fn reveal_hash_kept_above_height_one() {
        let record = AnnounceRecord::with_fields(
            MessageHash::new(vec![1]),
            MessageType::Block,
            Some(block_fields(2)),
        );
        assert_eq!(record.block_number(), Some(2));
        assert_eq!(record.stake_selector(), Some("Q0105"));
        assert!(record.reveal_hash().is_some());
    }

    #[test]
    fn reveal_hash_dropped_for_first_block() {
        let record = AnnounceRecord::with_fields(
            MessageHash::new(vec![1]),
            MessageType::Block,
            Some(block_fields(1)),
        );
        assert_eq!(record.block_number(), Some(1));
        assert!(record.prev_header_hash().is_some());
        assert!(record.reveal_hash().is_none());
    }

    #[test]
    fn message_type_uses_short_wire_codes() {
        let json = serde_json::to_string(&MessageType::Destake).unwrap();
        assert_eq!(json, "\"DST\"");
        let parsed: MessageType = serde_json::from_str("\"BK\"").unwrap();
        assert_eq!(parsed, MessageType::Block);
    }

    #[test]
    fn announce_serializes_with_kind_tag() {
        let msg = PeerMessage::Announce(AnnounceRecord::new(
            MessageHash::new(vec![7]),
            MessageType::Transaction,
        ));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "announce");
        assert_eq!(json["msg_type"], "TX");
        assert!(json.get("block_number").is_none());

        let back: PeerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
