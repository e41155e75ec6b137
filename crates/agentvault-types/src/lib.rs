//! # agentvault-types
//!
//! Shared types, errors, and configuration for the **AgentVault** transaction
//! authorization pipeline.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`TxId`], [`WalletId`], [`PolicyId`], [`ApprovalId`], [`SessionId`]
//! - **Transaction model**: [`TransactionRecord`], [`TxKind`], [`TxStatus`]
//! - **Tiering**: [`Tier`] — the ordered execution-friction levels
//! - **Policy model**: [`Policy`], [`PolicyType`], [`PolicyRules`]
//! - **Approval model**: [`PendingApproval`]
//! - **Wallet model**: [`Wallet`], [`Chain`], [`WalletStatus`], [`OwnerState`]
//! - **Operations**: [`Operation`] — the policy engine's evaluation input
//! - **Configuration**: [`PipelineConfig`]
//! - **Errors**: [`VaultError`] with `AV_ERR_` prefix codes
//! - **Constants**: system-wide timeouts and defaults

pub mod approval;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod operation;
pub mod policy;
pub mod tier;
pub mod transaction;
pub mod wallet;

// Re-export all primary types at crate root for ergonomic imports:
//   use agentvault_types::{TransactionRecord, Tier, Policy, ...};

pub use approval::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use operation::*;
pub use policy::*;
pub use tier::*;
pub use transaction::*;
pub use wallet::*;

// Constants are accessed via `agentvault_types::constants::FOO`
// (not re-exported to avoid name collisions).
