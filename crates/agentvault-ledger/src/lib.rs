//! # agentvault-ledger
//!
//! The persistence plane of the AgentVault pipeline:
//!
//! - [`Ledger`] — the transaction table and the pending-approval table under
//!   one write lock, so reservation math, status transitions, and approval
//!   resolution are atomic with respect to each other.
//! - [`PolicyStore`] — stored policies with the applicable-set query
//!   (wallet-scoped ∪ global, enabled, network-matched).
//! - [`WalletRegistry`] — wallet records and the owner lifecycle
//!   (NONE → GRACE → LOCKED).
//!
//! Everything here is synchronous and in-process. Callers needing a
//! multi-step atomic section take a [`LedgerTxn`] via [`Ledger::begin`] and
//! do all reads and writes through it before dropping the guard.

pub mod ledger;
pub mod policy_store;
pub mod wallets;

pub use ledger::{ApprovalResolution, Ledger, LedgerTxn};
pub use policy_store::PolicyStore;
pub use wallets::WalletRegistry;
