//! Chain view consumed by the consensus selector, plus an in-memory score
//! ledger used by the node binary and tests.

use parking_lot::RwLock;
use thiserror::Error;

/// Cumulative score of an accepted block. Lower is better.
pub type BlockScore = u64;

/// Read-only view of the locally accepted chain.
pub trait ChainView: Send + Sync {
    /// Block number of the current chain tip. Zero when only genesis exists.
    fn height(&self) -> u64;

    /// Score of the accepted block at `height`.
    fn score_at(&self, height: u64) -> Result<BlockScore, ChainError>;
}

/// Errors surfaced by a [`ChainView`].
#[derive(Debug, Error)]
pub enum ChainError {
    /// No accepted block exists at this height.
    #[error("no accepted block at height {0}")]
    MissingBlock(u64),
    /// The backing store could not answer.
    #[error("chain store unavailable: {0}")]
    Unavailable(String),
}

/// Accepted block scores indexed by block number. Height 0 is genesis.
#[derive(Debug, Clone)]
pub struct Chain {
    scores: Vec<BlockScore>,
}

impl Chain {
    /// Chain holding only the genesis block.
    pub fn new(genesis_score: BlockScore) -> Self {
        Self {
            scores: vec![genesis_score],
        }
    }

    /// Appends the score of the next accepted block.
    pub fn append(&mut self, score: BlockScore) {
        self.scores.push(score);
    }

    /// Score of the tip. Genesis when nothing else was accepted.
    pub fn tip(&self) -> BlockScore {
        self.scores.last().copied().unwrap_or(GENESIS_SCORE)
    }

    /// Block number of the tip.
    pub fn height(&self) -> u64 {
        self.scores.len().saturating_sub(1) as u64
    }

    /// Score at `height`, if accepted.
    pub fn score(&self, height: u64) -> Option<BlockScore> {
        let index = usize::try_from(height).ok()?;
        self.scores.get(index).copied()
    }
}

/// Genesis carries the worst possible score, so no candidate for height 0
/// is ever beaten by it.
pub const GENESIS_SCORE: BlockScore = BlockScore::MAX;

impl Default for Chain {
    fn default() -> Self {
        Self::new(GENESIS_SCORE)
    }
}

impl ChainView for RwLock<Chain> {
    fn height(&self) -> u64 {
        self.read().height()
    }

    fn score_at(&self, height: u64) -> Result<BlockScore, ChainError> {
        self.read()
            .score(height)
            .ok_or(ChainError::MissingBlock(height))
    }
}
