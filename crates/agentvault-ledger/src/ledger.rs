//! The transaction ledger.
//!
//! One mutex guards both the transaction table and the pending-approval
//! table. That single lock domain is the defense against the
//! check-then-reserve race: the policy engine evaluates spending limits and
//! writes the reservation inside one [`LedgerTxn`], and approve / reject /
//! expire contend on the same guard, so exactly one of them can resolve an
//! approval.
//!
//! Status changes go through [`LedgerTxn::transition`], which enforces the
//! state machine and hands the loser of any race an error instead of
//! silently re-applying the write. Every transition into a terminal state
//! clears the row's reservation in the same critical section.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use agentvault_types::{
    ApprovalId, PendingApproval, Result, SessionId, Tier, TransactionRecord, TxId, TxStatus,
    VaultError, WalletId,
};

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    transactions: HashMap<TxId, TransactionRecord>,
    approvals: HashMap<ApprovalId, PendingApproval>,
    /// Index: transaction -> its approval (at most one per transaction).
    approval_by_tx: HashMap<TxId, ApprovalId>,
}

/// Shared transaction + approval store.
#[derive(Default)]
pub struct Ledger {
    tables: Mutex<Tables>,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an atomic section over both tables. All reads and writes made
    /// through the returned guard commit together when it drops.
    pub fn begin(&self) -> LedgerTxn<'_> {
        LedgerTxn {
            tables: self.tables.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    // Single-call conveniences. Each takes the lock once.

    pub fn insert(&self, tx: TransactionRecord) -> Result<TxId> {
        self.begin().insert(tx)
    }

    pub fn get(&self, tx_id: TxId) -> Result<TransactionRecord> {
        self.begin().get(tx_id)
    }

    pub fn transition(
        &self,
        tx_id: TxId,
        expected: &[TxStatus],
        to: TxStatus,
    ) -> Result<TransactionRecord> {
        self.begin().transition(tx_id, expected, to)
    }

    #[must_use]
    pub fn reserved_total(&self, wallet_id: WalletId) -> Decimal {
        self.begin().reserved_total(wallet_id)
    }
}

// ---------------------------------------------------------------------------
// LedgerTxn
// ---------------------------------------------------------------------------

/// How an approval row gets resolved.
#[derive(Debug, Clone)]
pub enum ApprovalResolution {
    Approved {
        at: DateTime<Utc>,
        signature: String,
    },
    Rejected {
        at: DateTime<Utc>,
    },
}

/// An open atomic section over the ledger tables.
pub struct LedgerTxn<'a> {
    tables: MutexGuard<'a, Tables>,
}

impl LedgerTxn<'_> {
    // -- transaction rows ---------------------------------------------------

    pub fn insert(&mut self, tx: TransactionRecord) -> Result<TxId> {
        let id = tx.id;
        if self.tables.transactions.contains_key(&id) {
            return Err(VaultError::Internal(format!(
                "duplicate transaction id {id}"
            )));
        }
        self.tables.transactions.insert(id, tx);
        Ok(id)
    }

    pub fn get(&self, tx_id: TxId) -> Result<TransactionRecord> {
        self.tables
            .transactions
            .get(&tx_id)
            .cloned()
            .ok_or(VaultError::TxNotFound(tx_id))
    }

    fn row_mut(&mut self, tx_id: TxId) -> Result<&mut TransactionRecord> {
        self.tables
            .transactions
            .get_mut(&tx_id)
            .ok_or(VaultError::TxNotFound(tx_id))
    }

    /// Conditional status transition.
    ///
    /// The row must currently be in one of `expected`; otherwise the caller
    /// lost a race and gets [`VaultError::TxAlreadyProcessed`]. A transition
    /// the state machine forbids returns [`VaultError::InvalidTransition`].
    /// Only PENDING and QUEUED rows hold a reservation, so any transition
    /// out of those states clears it.
    pub fn transition(
        &mut self,
        tx_id: TxId,
        expected: &[TxStatus],
        to: TxStatus,
    ) -> Result<TransactionRecord> {
        let row = self.row_mut(tx_id)?;
        let from = row.status;
        if !expected.contains(&from) {
            return Err(VaultError::TxAlreadyProcessed { tx_id, status: from });
        }
        if !from.can_transition_to(to) {
            return Err(VaultError::InvalidTransition { tx_id, from, to });
        }
        row.status = to;
        if !to.holds_reservation() {
            row.reserved_amount = None;
        }
        debug!(%tx_id, %from, %to, "status transition");
        Ok(row.clone())
    }

    pub fn set_session(&mut self, tx_id: TxId, session_id: SessionId) -> Result<()> {
        self.row_mut(tx_id)?.session_id = Some(session_id);
        Ok(())
    }

    pub fn set_tier(&mut self, tx_id: TxId, tier: Tier) -> Result<()> {
        self.row_mut(tx_id)?.tier = Some(tier);
        Ok(())
    }

    pub fn set_tx_hash(&mut self, tx_id: TxId, tx_hash: String) -> Result<()> {
        self.row_mut(tx_id)?.tx_hash = Some(tx_hash);
        Ok(())
    }

    pub fn set_error(&mut self, tx_id: TxId, error: String) -> Result<()> {
        self.row_mut(tx_id)?.error = Some(error);
        Ok(())
    }

    pub fn set_executed_at(&mut self, tx_id: TxId, at: DateTime<Utc>) -> Result<()> {
        self.row_mut(tx_id)?.executed_at = Some(at);
        Ok(())
    }

    /// Record the cool-off parameters when a row enters the delay queue.
    pub fn mark_queued(
        &mut self,
        tx_id: TxId,
        delay_seconds: u64,
        queued_at: DateTime<Utc>,
    ) -> Result<()> {
        let row = self.row_mut(tx_id)?;
        row.delay_seconds = Some(delay_seconds);
        row.queued_at = Some(queued_at);
        Ok(())
    }

    // -- reservations -------------------------------------------------------

    /// Write a spending reservation. Only PENDING and QUEUED rows hold one.
    pub fn reserve(&mut self, tx_id: TxId, amount: Decimal) -> Result<()> {
        let row = self.row_mut(tx_id)?;
        if !row.status.holds_reservation() {
            return Err(VaultError::TxAlreadyProcessed {
                tx_id,
                status: row.status,
            });
        }
        row.reserved_amount = Some(amount);
        Ok(())
    }

    pub fn release_reservation(&mut self, tx_id: TxId) -> Result<()> {
        self.row_mut(tx_id)?.reserved_amount = None;
        Ok(())
    }

    /// Sum of reservations currently held by a wallet's PENDING and QUEUED
    /// rows. This is the in-flight amount the spending-limit comparison adds
    /// to a new request.
    #[must_use]
    pub fn reserved_total(&self, wallet_id: WalletId) -> Decimal {
        self.tables
            .transactions
            .values()
            .filter(|tx| tx.wallet_id == wallet_id && tx.status.holds_reservation())
            .filter_map(|tx| tx.reserved_amount)
            .sum()
    }

    /// All of a wallet's rows, sorted by id (UUIDv7, so creation order).
    #[must_use]
    pub fn transactions_for_wallet(&self, wallet_id: WalletId) -> Vec<TransactionRecord> {
        let mut rows: Vec<TransactionRecord> = self
            .tables
            .transactions
            .values()
            .filter(|tx| tx.wallet_id == wallet_id)
            .cloned()
            .collect();
        rows.sort_by_key(|tx| tx.id);
        rows
    }

    /// Submissions by this wallet since `since`, excluding cancelled rows.
    /// Used by rate-limit policies.
    #[must_use]
    pub fn submission_count_since(&self, wallet_id: WalletId, since: DateTime<Utc>) -> u32 {
        let n = self
            .tables
            .transactions
            .values()
            .filter(|tx| {
                tx.wallet_id == wallet_id
                    && tx.created_at >= since
                    && tx.status != TxStatus::Cancelled
            })
            .count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    // -- delay queue selection ---------------------------------------------

    /// QUEUED rows whose cool-off has elapsed: `queued_at + delay <= now`.
    /// Rows queued for approval carry no `delay_seconds` and never match.
    #[must_use]
    pub fn due_delayed(&self, now: DateTime<Utc>) -> Vec<TransactionRecord> {
        self.tables
            .transactions
            .values()
            .filter(|tx| tx.status == TxStatus::Queued)
            .filter(|tx| match (tx.queued_at, tx.delay_seconds) {
                (Some(queued_at), Some(delay)) => {
                    queued_at + Duration::seconds(i64::try_from(delay).unwrap_or(i64::MAX))
                        <= now
                }
                _ => false,
            })
            .cloned()
            .collect()
    }

    // -- approvals ----------------------------------------------------------

    /// Register the approval for a transaction. A transaction gets at most
    /// one approval row for its lifetime.
    pub fn insert_approval(&mut self, approval: PendingApproval) -> Result<ApprovalId> {
        let tx_id = approval.tx_id;
        if self.tables.approval_by_tx.contains_key(&tx_id) {
            return Err(VaultError::Internal(format!(
                "approval already exists for transaction {tx_id}"
            )));
        }
        let id = approval.id;
        self.tables.approval_by_tx.insert(tx_id, id);
        self.tables.approvals.insert(id, approval);
        Ok(id)
    }

    /// The transaction's approval row, only while it is unresolved.
    #[must_use]
    pub fn unresolved_approval(&self, tx_id: TxId) -> Option<PendingApproval> {
        let id = self.tables.approval_by_tx.get(&tx_id)?;
        self.tables
            .approvals
            .get(id)
            .filter(|a| a.is_unresolved())
            .cloned()
    }

    /// Resolve an approval row. Fails if it was already resolved — the
    /// caller lost the approve/reject race.
    pub fn resolve_approval(
        &mut self,
        approval_id: ApprovalId,
        resolution: ApprovalResolution,
    ) -> Result<PendingApproval> {
        let approval = self
            .tables
            .approvals
            .get_mut(&approval_id)
            .ok_or_else(|| VaultError::Internal(format!("approval {approval_id} not found")))?;
        if !approval.is_unresolved() {
            return Err(VaultError::ApprovalNotFound(approval.tx_id));
        }
        match resolution {
            ApprovalResolution::Approved { at, signature } => {
                approval.approved_at = Some(at);
                approval.owner_signature = Some(signature);
            }
            ApprovalResolution::Rejected { at } => {
                approval.rejected_at = Some(at);
            }
        }
        Ok(approval.clone())
    }

    /// Unresolved approvals whose deadline has passed and whose transaction
    /// is still live. Approvals the sweep already acted on sit on a terminal
    /// transaction and are not selected again, so the sweep set stays
    /// bounded by the in-flight rows.
    #[must_use]
    pub fn expired_approvals(&self, now: DateTime<Utc>) -> Vec<PendingApproval> {
        self.tables
            .approvals
            .values()
            .filter(|a| a.is_expired(now))
            .filter(|a| {
                self.tables
                    .transactions
                    .get(&a.tx_id)
                    .is_some_and(|tx| !tx.status.is_terminal())
            })
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
