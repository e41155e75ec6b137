//! # agentvault-pipeline
//!
//! The execution plane: takes an authorized request from intake to
//! on-chain confirmation.
//!
//! - [`Pipeline`] — the six-stage sequencer (validate, authenticate,
//!   authorize, wait, execute, confirm). Stages 1–4 run synchronously in
//!   [`Pipeline::submit`]; if the wait gate falls through, stages 5–6
//!   continue on a spawned task and report only to the ledger row.
//!   [`Pipeline::sign_only`] signs externally-built transactions without
//!   broadcasting them.
//! - [`DelayQueue`] — timestamp-driven cool-off for DELAY-tier rows.
//! - [`ApprovalWorkflow`] — owner approval with expiry for APPROVAL-tier
//!   rows.
//! - [`Scheduler`] — the periodic tick that releases due delays and
//!   expires stale approvals.
//! - [`ChainAdapter`] / [`KeyStore`] — the injected seams to the chain
//!   and the key material.

pub mod adapter;
pub mod approval;
pub mod delay_queue;
pub mod pipeline;
pub mod scheduler;

pub use adapter::{
    ChainAdapter, ConfirmationStatus, KeyHandle, KeyStore, SignedPayload, SubmitReceipt, UnsignedTx,
};
pub use approval::ApprovalWorkflow;
pub use delay_queue::DelayQueue;
pub use pipeline::{Pipeline, SignOutcome, SignRequest, SubmitRequest};
pub use scheduler::Scheduler;
