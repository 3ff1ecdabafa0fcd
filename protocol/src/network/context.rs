//! The owning context shared by every propagation component.
//!
//! One `NetworkContext` per service. Components receive it by `&mut` on each
//! call instead of holding references to each other, so there is exactly one
//! owner for the peer set, the receipt registry, and the timer source.

use crate::network::message::MessageHash;
use crate::network::peers::PeerRegistry;
use crate::network::receipt::MessageReceiptRegistry;
use crate::network::timer::Scheduler;

#[derive(Debug)]
pub struct NetworkContext<S: Scheduler> {
    pub(crate) registry: MessageReceiptRegistry,
    pub(crate) peers: PeerRegistry,
    pub(crate) scheduler: S,
}

impl<S: Scheduler> NetworkContext<S> {
    pub fn new(registry: MessageReceiptRegistry, peers: PeerRegistry, scheduler: S) -> Self {
        Self {
            registry,
            peers,
            scheduler,
        }
    }

    pub fn registry(&self) -> &MessageReceiptRegistry {
        &self.registry
    }

    /// Mutable registry access for the protocol layer (announce intake).
    pub fn registry_mut(&mut self) -> &mut MessageReceiptRegistry {
        &mut self.registry
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut PeerRegistry {
        &mut self.peers
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Deletes the request state for `hash`, cancelling its timer first.
    /// Returns whether a state existed.
    pub fn discard_request(&mut self, hash: &MessageHash) -> bool {
        match self.registry.delete_request_state(hash) {
            Some(state) => {
                if let Some(timer) = state.timer() {
                    self.scheduler.cancel(timer);
                }
                true
            }
            None => false,
        }
    }
}
