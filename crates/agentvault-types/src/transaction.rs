//! Transaction records and the status state machine.
//!
//! A [`TransactionRecord`] is the durable row every pipeline stage reads and
//! writes. Its [`TxStatus`] follows a strict state machine:
//!
//! ```text
//!   PENDING ──> QUEUED ──> EXECUTING ──> CONFIRMED
//!      │           │            ├──> SIGNED  (sign-only, no broadcast)
//!      │           └─> EXPIRED  └──> FAILED
//!      ├──> EXECUTING  (INSTANT / NOTIFY skip the queue)
//!      └──> CANCELLED  (policy denial, owner cancel; also from QUEUED)
//! ```
//!
//! `reserved_amount` is `Some` exactly while the status is PENDING or QUEUED;
//! every transition into a terminal state clears it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Chain, Operation, SessionId, Tier, TxId, WalletId};

// ---------------------------------------------------------------------------
// TxKind
// ---------------------------------------------------------------------------

/// What the transaction does on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxKind {
    /// Native-asset transfer.
    Transfer,
    /// Fungible-token transfer (token address in the operation).
    TokenTransfer,
    /// Arbitrary contract invocation.
    ContractCall,
    /// Spender allowance grant.
    Approve,
    /// Multiple operations evaluated and executed as one unit.
    Batch,
    /// Signature produced without broadcasting.
    SignOnly,
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transfer => write!(f, "TRANSFER"),
            Self::TokenTransfer => write!(f, "TOKEN_TRANSFER"),
            Self::ContractCall => write!(f, "CONTRACT_CALL"),
            Self::Approve => write!(f, "APPROVE"),
            Self::Batch => write!(f, "BATCH"),
            Self::SignOnly => write!(f, "SIGN_ONLY"),
        }
    }
}

// ---------------------------------------------------------------------------
// TxStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    /// Inserted, not yet authorized.
    Pending,
    /// Held in the delay queue or awaiting owner approval.
    Queued,
    /// Released for execution; key material may be in use.
    Executing,
    /// On-chain confirmation observed. Terminal.
    Confirmed,
    /// Signature returned to the caller without broadcast. Terminal.
    Signed,
    /// Execution or confirmation failed. Terminal.
    Failed,
    /// Denied by policy or cancelled by the owner. Terminal.
    Cancelled,
    /// Approval window lapsed without a decision. Terminal.
    Expired,
}

impl TxStatus {
    /// Valid transitions of the transaction state machine.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Queued | Self::Executing | Self::Cancelled)
                | (Self::Queued, Self::Executing | Self::Cancelled | Self::Expired)
                | (Self::Executing, Self::Confirmed | Self::Signed | Self::Failed)
        )
    }

    /// Terminal statuses accept no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::Signed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Statuses that hold a spending reservation.
    #[must_use]
    pub fn holds_reservation(self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Queued => write!(f, "QUEUED"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Signed => write!(f, "SIGNED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionRecord
// ---------------------------------------------------------------------------

/// The durable transaction row.
///
/// Created by Stage 1 (validate) in `Pending`, then mutated by each stage
/// through the ledger's conditional writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TxId,
    pub wallet_id: WalletId,
    /// Agent session that submitted the request, attached by Stage 2.
    pub session_id: Option<SessionId>,
    pub kind: TxKind,
    pub status: TxStatus,
    /// Assigned by Stage 3; `None` until authorization ran.
    pub tier: Option<Tier>,
    pub chain: Chain,
    pub network: String,
    /// Native amount. For batches, the sum of member native amounts.
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub to_address: String,
    /// Member operations as submitted, full kind-specific detail. This is
    /// what the adapter builds from at signing time; `amount` and
    /// `to_address` above are denormalized summaries.
    pub operations: Vec<Operation>,
    /// Held spending reservation. `Some` iff status is PENDING or QUEUED.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub reserved_amount: Option<Decimal>,
    /// Cool-off length, persisted when queued for the DELAY tier.
    pub delay_seconds: Option<u64>,
    /// When the row entered the delay queue.
    pub queued_at: Option<DateTime<Utc>>,
    /// On-chain hash, recorded by Stage 5 after submission.
    pub tx_hash: Option<String>,
    /// Failure or denial reason, verbatim.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the transaction confirmed.
    pub executed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// New `Pending` row, as inserted by Stage 1. `amount` is the sum of
    /// the member native amounts and `to_address` the first member's
    /// destination.
    #[must_use]
    pub fn new(
        wallet_id: WalletId,
        kind: TxKind,
        chain: Chain,
        network: String,
        operations: Vec<Operation>,
    ) -> Self {
        let amount = operations.iter().map(|op| op.amount).sum();
        let to_address = operations
            .first()
            .map(|op| op.to_address.clone())
            .unwrap_or_default();
        Self {
            id: TxId::new(),
            wallet_id,
            session_id: None,
            kind,
            status: TxStatus::Pending,
            tier: None,
            chain,
            network,
            amount,
            to_address,
            operations,
            reserved_amount: None,
            delay_seconds: None,
            queued_at: None,
            tx_hash: None,
            error: None,
            created_at: Utc::now(),
            executed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A plausible native transfer row for tests.
#[cfg(any(test, feature = "test-helpers"))]
#[must_use]
pub fn dummy_transaction(wallet_id: WalletId, amount: Decimal) -> TransactionRecord {
    TransactionRecord::new(
        wallet_id,
        TxKind::Transfer,
        Chain::Evm,
        "base-sepolia".to_owned(),
        vec![Operation::transfer(
            amount,
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
        )],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn happy_path_transitions() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Queued));
        assert!(TxStatus::Queued.can_transition_to(TxStatus::Executing));
        assert!(TxStatus::Executing.can_transition_to(TxStatus::Confirmed));
    }

    #[test]
    fn instant_skips_the_queue() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Executing));
    }

    #[test]
    fn sign_only_finishes_without_broadcast_status() {
        assert!(TxStatus::Executing.can_transition_to(TxStatus::Signed));
        assert!(TxStatus::Signed.is_terminal());
        assert!(!TxStatus::Queued.can_transition_to(TxStatus::Signed));
    }

    #[test]
    fn exit_transitions() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Cancelled));
        assert!(TxStatus::Queued.can_transition_to(TxStatus::Cancelled));
        assert!(TxStatus::Queued.can_transition_to(TxStatus::Expired));
        assert!(TxStatus::Executing.can_transition_to(TxStatus::Failed));
    }

    #[test]
    fn invalid_transitions_rejected() {
        assert!(!TxStatus::Pending.can_transition_to(TxStatus::Confirmed));
        assert!(!TxStatus::Pending.can_transition_to(TxStatus::Expired));
        assert!(!TxStatus::Queued.can_transition_to(TxStatus::Confirmed));
        assert!(!TxStatus::Executing.can_transition_to(TxStatus::Cancelled));
        assert!(!TxStatus::Executing.can_transition_to(TxStatus::Expired));
        assert!(!TxStatus::Confirmed.can_transition_to(TxStatus::Pending));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let all = [
            TxStatus::Pending,
            TxStatus::Queued,
            TxStatus::Executing,
            TxStatus::Confirmed,
            TxStatus::Signed,
            TxStatus::Failed,
            TxStatus::Cancelled,
            TxStatus::Expired,
        ];
        for from in all {
            if !from.is_terminal() {
                continue;
            }
            for to in all {
                assert!(
                    !from.can_transition_to(to),
                    "terminal {from} must not transition to {to}"
                );
            }
        }
    }

    #[test]
    fn reservation_statuses() {
        assert!(TxStatus::Pending.holds_reservation());
        assert!(TxStatus::Queued.holds_reservation());
        assert!(!TxStatus::Executing.holds_reservation());
        assert!(!TxStatus::Confirmed.holds_reservation());
    }

    #[test]
    fn new_record_starts_pending_without_reservation() {
        let tx = dummy_transaction(WalletId::new(), Decimal::from(100));
        assert_eq!(tx.status, TxStatus::Pending);
        assert!(tx.reserved_amount.is_none());
        assert!(tx.tier.is_none());
        assert!(tx.error.is_none());
    }

    #[test]
    fn new_record_summarizes_its_operations() {
        let ops = vec![
            Operation::transfer(Decimal::from(60), "0xfirst"),
            Operation::transfer(Decimal::from(40), "0xsecond"),
        ];
        let tx = TransactionRecord::new(
            WalletId::new(),
            TxKind::Batch,
            Chain::Evm,
            "base-sepolia".to_owned(),
            ops,
        );
        assert_eq!(tx.amount, Decimal::from(100));
        assert_eq!(tx.to_address, "0xfirst");
        assert_eq!(tx.operations.len(), 2);
    }

    #[test]
    fn record_serde_roundtrip() {
        let tx = dummy_transaction(WalletId::new(), Decimal::new(7005, 1));
        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains("\"700.5\""), "amount serialized as string: {json}");
        let back: TransactionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, tx.id);
        assert_eq!(back.amount, tx.amount);
        assert_eq!(back.status, TxStatus::Pending);
    }

    #[test]
    fn status_display_is_upper_case() {
        assert_eq!(TxStatus::Pending.to_string(), "PENDING");
        assert_eq!(TxStatus::Cancelled.to_string(), "CANCELLED");
        assert_eq!(TxKind::TokenTransfer.to_string(), "TOKEN_TRANSFER");
    }
}
