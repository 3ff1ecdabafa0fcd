//! # Storage Module
//!
//! The propagation layer does not persist chain state. It only needs a
//! read-only view of the accepted chain (tip height and per-height score) to
//! decide whether a consensus candidate can still win.
//!
//! ```text
//! chain.rs  — ChainView trait and the in-memory score ledger
//! ```

pub mod chain;

pub use chain::{BlockScore, Chain, ChainError, ChainView, GENESIS_SCORE};
