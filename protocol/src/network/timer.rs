//! # Cancelable Timers
//!
//! Retries and the consensus reselect step are delayed callbacks that
//! re-enter the single event loop. A [`Scheduler`] hands out a [`TimerId`]
//! per armed timer; the owner records that id and compares it when the
//! timer fires, so a firing that raced with a cancel (or whose owner is
//! gone) is recognised and dropped.
//!
//! Two schedulers ship with the crate:
//!
//! - [`TokioScheduler`] — one `tokio::time::sleep` task per timer, posting
//!   `(TimerId, TimerEvent)` back into the event loop's channel. Cancel
//!   aborts the task.
//! - [`ManualScheduler`] — logical clock, fired explicitly. Used by tests
//!   and simulations to step timers in a deterministic order.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::network::message::MessageHash;

/// Handle of one armed timer. Never reused by a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// What to do when a timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// The outstanding full-message request for this hash timed out.
    RequestTimeout(MessageHash),
    /// Run the next consensus selection step.
    Reselect,
}

/// Source of cancelable delayed events.
pub trait Scheduler {
    /// Arms a timer that delivers `event` after `delay`.
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerId;

    /// Disarms `id`. Cancelling an unknown or already fired id is a no-op.
    fn cancel(&mut self, id: TimerId);

    /// Called by the service when `id` has been delivered, so the scheduler
    /// can release bookkeeping for it.
    fn fired(&mut self, _id: TimerId) {}
}

// ---------------------------------------------------------------------------
// TokioScheduler
// ---------------------------------------------------------------------------

/// Fired timers as received by the event loop.
pub type TimerReceiver = mpsc::UnboundedReceiver<(TimerId, TimerEvent)>;

/// Scheduler backed by tokio sleep tasks. Must be used inside a runtime.
pub struct TokioScheduler {
    next_id: u64,
    sink: mpsc::UnboundedSender<(TimerId, TimerEvent)>,
    pending: HashMap<TimerId, AbortHandle>,
}

impl TokioScheduler {
    /// Creates the scheduler and the receiver its timers fire into.
    pub fn new() -> (Self, TimerReceiver) {
        let (sink, fired) = mpsc::unbounded_channel();
        let scheduler = Self {
            next_id: 0,
            sink,
            pending: HashMap::new(),
        };
        (scheduler, fired)
    }

    /// Number of armed timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let sink = self.sink.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A closed receiver means the event loop already stopped.
            let _ = sink.send((id, event));
        });

        self.pending.insert(id, task.abort_handle());
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.pending.remove(&id) {
            handle.abort();
            trace!(%id, "timer cancelled");
        }
    }

    fn fired(&mut self, id: TimerId) {
        self.pending.remove(&id);
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending", &self.pending.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

/// A timer armed on a [`ManualScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub id: TimerId,
    /// Logical time at which the timer is due.
    pub due: Duration,
    pub event: TimerEvent,
}

/// Deterministic scheduler driven by an explicit logical clock.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    now: Duration,
    timers: Vec<ScheduledTimer>,
    cancelled: Vec<TimerId>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Armed timers, in arming order.
    pub fn pending(&self) -> &[ScheduledTimer] {
        &self.timers
    }

    /// Whether `id` is still armed.
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.timers.iter().any(|t| t.id == id)
    }

    /// Ids cancelled so far, in order.
    pub fn cancelled(&self) -> &[TimerId] {
        &self.cancelled
    }

    /// Advances the clock to the earliest due timer and removes it.
    pub fn fire_next(&mut self) -> Option<(TimerId, TimerEvent)> {
        let index = self
            .timers
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (t.due, t.id))
            .map(|(i, _)| i)?;
        let timer = self.timers.remove(index);
        self.now = self.now.max(timer.due);
        Some((timer.id, timer.event))
    }

    /// Advances the clock by `by` and removes every timer now due, in due
    /// order.
    pub fn advance(&mut self, by: Duration) -> Vec<(TimerId, TimerEvent)> {
        self.now += by;
        let now = self.now;
        let mut due: Vec<ScheduledTimer> = Vec::new();
        self.timers.retain(|t| {
            if t.due <= now {
                due.push(t.clone());
                false
            } else {
                true
            }
        });
        due.sort_by_key(|t| (t.due, t.id));
        due.into_iter().map(|t| (t.id, t.event)).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.push(ScheduledTimer {
            id,
            due: self.now + delay,
            event,
        });
        id
    }

    fn cancel(&mut self, id: TimerId) {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        if self.timers.len() != before {
            self.cancelled.push(id);
        }
    }
}
