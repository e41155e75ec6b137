//! Error types for the AgentVault pipeline.
//!
//! All errors use the `AV_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Transaction errors
//! - 2xx: Policy / authorization errors
//! - 3xx: Approval workflow errors
//! - 4xx: Wallet / owner errors
//! - 5xx: Chain adapter errors
//! - 6xx: Key store errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{ApprovalId, TxId, TxStatus, WalletId};

/// Central error enum for all AgentVault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    // =================================================================
    // Transaction Errors (1xx)
    // =================================================================
    /// The requested transaction was not found in the ledger.
    #[error("AV_ERR_100: Transaction not found: {0}")]
    TxNotFound(TxId),

    /// The transfer request failed validation (missing fields, bad values).
    #[error("AV_ERR_101: Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The transaction is no longer in a state where the operation applies.
    #[error("AV_ERR_102: Transaction {tx_id} already processed: status is {status}")]
    TxAlreadyProcessed { tx_id: TxId, status: TxStatus },

    /// A status transition violated the transaction state machine.
    #[error("AV_ERR_103: Invalid transition for {tx_id}: {from} -> {to}")]
    InvalidTransition {
        tx_id: TxId,
        from: TxStatus,
        to: TxStatus,
    },

    // =================================================================
    // Policy Errors (2xx)
    // =================================================================
    /// The policy engine denied the operation. The reason is the first
    /// violation found and is propagated verbatim to the transaction row.
    #[error("AV_ERR_200: Policy denied: {reason}")]
    PolicyDenied { reason: String },

    /// The requested policy was not found in the store.
    #[error("AV_ERR_201: Policy not found: {0}")]
    PolicyNotFound(crate::PolicyId),

    // =================================================================
    // Approval Errors (3xx)
    // =================================================================
    /// No unresolved approval exists for the transaction. Also returned to
    /// the loser of an approve/reject/expire race: once one of them wins,
    /// the row is no longer unresolved.
    #[error("AV_ERR_300: No pending approval for transaction {0}")]
    ApprovalNotFound(TxId),

    /// approve() was called after the approval's expiry timestamp.
    #[error("AV_ERR_301: Approval {0} has expired")]
    ApprovalTimeout(ApprovalId),

    // =================================================================
    // Wallet / Owner Errors (4xx)
    // =================================================================
    /// The referenced wallet does not exist.
    #[error("AV_ERR_400: Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// The wallet is suspended; no new transactions are accepted.
    #[error("AV_ERR_401: Wallet {0} is suspended")]
    WalletSuspended(WalletId),

    /// Owner mutation blocked: the owner is verified (LOCKED state).
    #[error("AV_ERR_402: Owner already connected and verified for wallet {0}")]
    OwnerAlreadyConnected(WalletId),

    /// Owner verification requested but no owner address is registered.
    #[error("AV_ERR_403: No owner registered for wallet {0}")]
    OwnerNotConnected(WalletId),

    // =================================================================
    // Chain Errors (5xx)
    // =================================================================
    /// The chain adapter failed during build/sign/submit/confirm.
    /// Retryable at the caller's discretion via a new transaction.
    #[error("AV_ERR_500: Chain error: {reason}")]
    ChainError { reason: String },

    /// The confirmation wait exceeded its bounded timeout.
    #[error("AV_ERR_501: Confirmation timed out for tx hash {tx_hash}")]
    ConfirmationTimeout { tx_hash: String },

    // =================================================================
    // Key Store Errors (6xx)
    // =================================================================
    /// The key store failed to decrypt or release key material.
    #[error("AV_ERR_600: Key store error: {reason}")]
    KeyStore { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("AV_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("AV_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid values, missing fields).
    #[error("AV_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    /// Whether the failure is worth retrying with a fresh transaction.
    ///
    /// Policy denials and approval outcomes are final; chain errors are the
    /// only retryable kind in the taxonomy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChainError { .. } | Self::ConfirmationTimeout { .. }
        )
    }
}
