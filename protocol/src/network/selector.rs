//! # Consensus Record Selector (bkmr)
//!
//! Holds block-consensus candidates for the contested height and, every
//! `consensus_reselect_delay`, pulls the best one from the network.
//!
//! ```text
//!            push_candidate                 step: popped, not beaten
//!   Idle ───────────────────> Scheduled ───────────────────> Scheduled
//!     ^                          │   │
//!     │   queue empty / pruned   │   │ track_block_number(new) / shutdown
//!     └──────────────────────────┘───┘
//! ```
//!
//! Lower scores win. When the best queued candidate already scores worse
//! than the block accepted at the tracked height, nothing left in the queue
//! can beat it and the whole queue is dropped.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use tracing::{debug, error, trace};

use crate::network::context::NetworkContext;
use crate::network::error::PropagationError;
use crate::network::message::MessageHash;
use crate::network::request::FullMessageRequester;
use crate::network::timer::{Scheduler, TimerEvent, TimerId};
use crate::storage::{BlockScore, ChainView};

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A scored block hash competing for the tracked height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusCandidate {
    pub score: BlockScore,
    pub hash: MessageHash,
}

impl Ord for ConsensusCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for ConsensusCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Timer state of the selection schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Idle,
    Scheduled(TimerId),
}

/// What one selection step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Nothing queued; the schedule stopped.
    Empty,
    /// The best candidate is beaten by the accepted block; the queue was
    /// dropped and the schedule stopped.
    Pruned { discarded: usize },
    /// The candidate's payload was requested; the next step is armed.
    Requested(MessageHash),
    /// The step failed and was skipped; the next step is armed.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectorStats {
    pub candidates_queued: u64,
    pub prunes: u64,
    pub step_failures: u64,
    pub stale_timers: u64,
}

// ---------------------------------------------------------------------------
// ConsensusRecordSelector
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ConsensusRecordSelector {
    tracked_block_number: u64,
    queue: BinaryHeap<Reverse<ConsensusCandidate>>,
    state: SelectorState,
    reselect_delay: Duration,
    stats: SelectorStats,
}

impl ConsensusRecordSelector {
    pub fn new(reselect_delay: Duration) -> Self {
        Self {
            tracked_block_number: 0,
            queue: BinaryHeap::new(),
            state: SelectorState::Idle,
            reselect_delay,
            stats: SelectorStats::default(),
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    pub fn tracked_block_number(&self) -> u64 {
        self.tracked_block_number
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Best queued candidate without removing it.
    pub fn peek(&self) -> Option<&ConsensusCandidate> {
        self.queue.peek().map(|Reverse(candidate)| candidate)
    }

    pub fn stats(&self) -> SelectorStats {
        self.stats
    }

    /// Sets the contested height. A new height drops the previous height's
    /// candidates and stops the schedule.
    pub fn track_block_number<S: Scheduler>(&mut self, ctx: &mut NetworkContext<S>, block_number: u64) {
        if block_number == self.tracked_block_number {
            return;
        }
        debug!(
            from = self.tracked_block_number,
            to = block_number,
            dropped = self.queue.len(),
            "tracking new block number"
        );
        self.tracked_block_number = block_number;
        self.queue.clear();
        self.cancel(ctx);
    }

    /// Queues a candidate and starts the schedule if it is idle.
    pub fn push_candidate<S: Scheduler>(
        &mut self,
        ctx: &mut NetworkContext<S>,
        score: BlockScore,
        hash: MessageHash,
    ) {
        trace!(score, %hash, "consensus candidate queued");
        self.queue.push(Reverse(ConsensusCandidate { score, hash }));
        self.stats.candidates_queued += 1;

        if self.state == SelectorState::Idle {
            self.arm(ctx);
        }
    }

    /// Runs one selection step now, replacing any armed step.
    pub fn select_best<S: Scheduler>(
        &mut self,
        ctx: &mut NetworkContext<S>,
        requester: &mut FullMessageRequester,
        chain: &dyn ChainView,
    ) -> SelectionOutcome {
        self.cancel(ctx);
        self.step(ctx, requester, chain)
    }

    /// Handles a fired reselect timer. Returns `None` for a stale firing.
    pub fn on_timer<S: Scheduler>(
        &mut self,
        ctx: &mut NetworkContext<S>,
        requester: &mut FullMessageRequester,
        chain: &dyn ChainView,
        timer: TimerId,
    ) -> Option<SelectionOutcome> {
        if self.state != SelectorState::Scheduled(timer) {
            self.stats.stale_timers += 1;
            trace!(%timer, "ignoring stale reselect timer");
            return None;
        }
        self.state = SelectorState::Idle;
        Some(self.step(ctx, requester, chain))
    }

    /// Cancels the armed step. Queued candidates are kept.
    pub fn shutdown<S: Scheduler>(&mut self, ctx: &mut NetworkContext<S>) {
        self.cancel(ctx);
    }

    fn step<S: Scheduler>(
        &mut self,
        ctx: &mut NetworkContext<S>,
        requester: &mut FullMessageRequester,
        chain: &dyn ChainView,
    ) -> SelectionOutcome {
        let Some(Reverse(candidate)) = self.queue.pop() else {
            self.state = SelectorState::Idle;
            return SelectionOutcome::Empty;
        };

        match self.evaluate(ctx, requester, chain, &candidate) {
            Ok(true) => {
                let discarded = self.queue.len() + 1;
                self.queue.clear();
                self.state = SelectorState::Idle;
                self.stats.prunes += 1;
                debug!(
                    block_number = self.tracked_block_number,
                    score = candidate.score,
                    discarded,
                    "accepted block beats every candidate, queue dropped"
                );
                SelectionOutcome::Pruned { discarded }
            }
            Ok(false) => {
                self.arm(ctx);
                SelectionOutcome::Requested(candidate.hash)
            }
            Err(e) => {
                self.stats.step_failures += 1;
                error!(
                    block_number = self.tracked_block_number,
                    hash = %candidate.hash,
                    error = %e,
                    "consensus selection step failed"
                );
                self.arm(ctx);
                SelectionOutcome::Failed
            }
        }
    }

    /// Returns `true` when the accepted block beats `candidate`; otherwise
    /// requests the candidate's payload.
    fn evaluate<S: Scheduler>(
        &self,
        ctx: &mut NetworkContext<S>,
        requester: &mut FullMessageRequester,
        chain: &dyn ChainView,
        candidate: &ConsensusCandidate,
    ) -> Result<bool, PropagationError> {
        let height = self.tracked_block_number;
        if height <= chain.height() {
            let accepted = chain.score_at(height)?;
            if candidate.score > accepted {
                return Ok(true);
            }
        }

        requester.request(ctx, &candidate.hash)?;
        Ok(false)
    }

    fn arm<S: Scheduler>(&mut self, ctx: &mut NetworkContext<S>) {
        let id = ctx.scheduler.schedule(self.reselect_delay, TimerEvent::Reselect);
        self.state = SelectorState::Scheduled(id);
    }

    fn cancel<S: Scheduler>(&mut self, ctx: &mut NetworkContext<S>) {
        if let SelectorState::Scheduled(id) = self.state {
            ctx.scheduler.cancel(id);
        }
        self.state = SelectorState::Idle;
    }
}
