//! # agentvault-policy
//!
//! The authorization brain of the pipeline. [`PolicyEngine`] evaluates an
//! [`Operation`](agentvault_types::Operation) against the wallet's
//! applicable policies and either denies it (first violation wins) or
//! assigns an execution [`Tier`](agentvault_types::Tier).
//!
//! Three entry points:
//! - [`PolicyEngine::evaluate`] — read-only classification.
//! - [`PolicyEngine::evaluate_and_reserve`] — classification plus the
//!   spending reservation, atomically under the ledger's write lock, with
//!   the in-flight reserved total folded into the limit comparison.
//! - [`PolicyEngine::evaluate_batch_and_reserve`] — all-or-nothing batch
//!   evaluation with a single summed reservation.

pub mod domains;
pub mod engine;

pub use domains::match_domain;
pub use engine::{Decision, PolicyEngine};
