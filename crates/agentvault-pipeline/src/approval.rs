//! Owner approval workflow for APPROVAL-tier transactions.
//!
//! Every step runs inside one ledger guard, so approve, reject, and the
//! expiry sweep contend on the same lock: exactly one of them resolves an
//! approval, and the losers see `ApprovalNotFound`.
//!
//! An approval that lapses is *expired*, not rejected: the sweep moves the
//! transaction to EXPIRED and leaves `rejected_at` unset.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use agentvault_ledger::{ApprovalResolution, Ledger};
use agentvault_types::{
    ApprovalId, PendingApproval, Result, TransactionRecord, TxId, TxStatus, VaultError,
};

pub struct ApprovalWorkflow {
    ledger: Arc<Ledger>,
    /// Applied when the request carries no timeout of its own.
    default_timeout_seconds: u64,
}

impl ApprovalWorkflow {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, default_timeout_seconds: u64) -> Self {
        Self { ledger, default_timeout_seconds }
    }

    /// Create the approval row and park the transaction.
    ///
    /// Timeout precedence: the per-request override, else the configured
    /// default.
    pub fn request(
        &self,
        tx_id: TxId,
        timeout_override_seconds: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalId> {
        let timeout = timeout_override_seconds.unwrap_or(self.default_timeout_seconds);
        let expires_at = now + Duration::seconds(i64::try_from(timeout).unwrap_or(i64::MAX));

        let mut txn = self.ledger.begin();
        let approval_id = txn.insert_approval(PendingApproval::new(tx_id, expires_at))?;
        txn.transition(tx_id, &[TxStatus::Pending], TxStatus::Queued)?;
        info!(%tx_id, %approval_id, %expires_at, "approval requested");
        Ok(approval_id)
    }

    /// Owner sign-off. Returns the transaction, already moved to EXECUTING,
    /// for the caller to run.
    ///
    /// A lapsed approval fails with `ApprovalTimeout` and changes nothing;
    /// the sweep will expire it.
    pub fn approve(
        &self,
        tx_id: TxId,
        signature: String,
        now: DateTime<Utc>,
    ) -> Result<TransactionRecord> {
        let mut txn = self.ledger.begin();
        let approval = txn
            .unresolved_approval(tx_id)
            .ok_or(VaultError::ApprovalNotFound(tx_id))?;
        if now > approval.expires_at {
            return Err(VaultError::ApprovalTimeout(approval.id));
        }
        txn.resolve_approval(
            approval.id,
            ApprovalResolution::Approved { at: now, signature },
        )?;
        let row = txn.transition(tx_id, &[TxStatus::Queued], TxStatus::Executing)?;
        info!(%tx_id, "approval granted, transaction released");
        Ok(row)
    }

    /// Owner rejection: resolves the approval and cancels the transaction.
    pub fn reject(&self, tx_id: TxId, now: DateTime<Utc>) -> Result<()> {
        let mut txn = self.ledger.begin();
        let approval = txn
            .unresolved_approval(tx_id)
            .ok_or(VaultError::ApprovalNotFound(tx_id))?;
        txn.resolve_approval(approval.id, ApprovalResolution::Rejected { at: now })?;
        txn.transition(tx_id, &[TxStatus::Queued], TxStatus::Cancelled)?;
        info!(%tx_id, "approval rejected, transaction cancelled");
        Ok(())
    }

    /// Expire every unresolved approval whose deadline has passed: the
    /// transaction goes to EXPIRED and its reservation is released. Returns
    /// how many rows were expired; a repeated sweep with the same `now`
    /// finds nothing left to do.
    pub fn process_expired(&self, now: DateTime<Utc>) -> usize {
        let mut txn = self.ledger.begin();
        let mut expired = 0;
        for approval in txn.expired_approvals(now) {
            match txn.transition(approval.tx_id, &[TxStatus::Queued], TxStatus::Expired) {
                Ok(_) => expired += 1,
                // Already resolved or raced away; nothing to do.
                Err(_) => continue,
            }
        }
        if expired > 0 {
            warn!(count = expired, "expired stale approvals");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentvault_types::transaction::dummy_transaction;
    use agentvault_types::WalletId;
    use rust_decimal::Decimal;

    fn setup() -> (Arc<Ledger>, ApprovalWorkflow, TxId, DateTime<Utc>) {
        let ledger = Arc::new(Ledger::new());
        let workflow = ApprovalWorkflow::new(Arc::clone(&ledger), 3600);
        let tx_id = ledger
            .insert(dummy_transaction(WalletId::new(), Decimal::from(1500)))
            .unwrap();
        ledger.begin().reserve(tx_id, Decimal::from(1500)).unwrap();
        let now = Utc::now();
        workflow.request(tx_id, None, now).unwrap();
        (ledger, workflow, tx_id, now)
    }

    #[test]
    fn request_parks_the_transaction() {
        let (ledger, _, tx_id, _) = setup();
        let row = ledger.get(tx_id).unwrap();
        assert_eq!(row.status, TxStatus::Queued);
        assert_eq!(row.reserved_amount, Some(Decimal::from(1500)));
    }

    #[test]
    fn timeout_override_beats_default() {
        let ledger = Arc::new(Ledger::new());
        let workflow = ApprovalWorkflow::new(Arc::clone(&ledger), 3600);
        let tx_id = ledger
            .insert(dummy_transaction(WalletId::new(), Decimal::ONE))
            .unwrap();
        let now = Utc::now();
        workflow.request(tx_id, Some(60), now).unwrap();

        // Expired one second after the 60s override, far before the default.
        assert_eq!(workflow.process_expired(now + Duration::seconds(61)), 1);
    }

    #[test]
    fn approve_releases_for_execution() {
        let (ledger, workflow, tx_id, now) = setup();
        let row = workflow.approve(tx_id, "0xsig".to_owned(), now).unwrap();
        assert_eq!(row.status, TxStatus::Executing);
        // Reservation released on exit from QUEUED.
        assert!(ledger.get(tx_id).unwrap().reserved_amount.is_none());
    }

    #[test]
    fn approve_after_deadline_times_out() {
        let (ledger, workflow, tx_id, now) = setup();
        let late = now + Duration::seconds(3601);
        let err = workflow.approve(tx_id, "0xsig".to_owned(), late).unwrap_err();
        assert!(matches!(err, VaultError::ApprovalTimeout(_)));
        // State untouched: still queued, still reserved.
        let row = ledger.get(tx_id).unwrap();
        assert_eq!(row.status, TxStatus::Queued);
        assert!(row.reserved_amount.is_some());
    }

    #[test]
    fn reject_cancels() {
        let (ledger, workflow, tx_id, now) = setup();
        workflow.reject(tx_id, now).unwrap();
        let row = ledger.get(tx_id).unwrap();
        assert_eq!(row.status, TxStatus::Cancelled);
        assert!(row.reserved_amount.is_none());
    }

    #[test]
    fn resolution_happens_at_most_once() {
        let (_, workflow, tx_id, now) = setup();
        workflow.approve(tx_id, "0xsig".to_owned(), now).unwrap();

        // Both a second approve and a reject lose.
        assert!(matches!(
            workflow.approve(tx_id, "0xsig2".to_owned(), now),
            Err(VaultError::ApprovalNotFound(_))
        ));
        assert!(matches!(
            workflow.reject(tx_id, now),
            Err(VaultError::ApprovalNotFound(_))
        ));
    }

    #[test]
    fn expiry_sweep_is_idempotent() {
        let (ledger, workflow, tx_id, now) = setup();
        let later = now + Duration::seconds(3601);
        assert_eq!(workflow.process_expired(later), 1);
        assert_eq!(workflow.process_expired(later), 0);

        let row = ledger.get(tx_id).unwrap();
        assert_eq!(row.status, TxStatus::Expired);
        assert!(row.reserved_amount.is_none());
        // Expired is not rejected.
        let txn = ledger.begin();
        assert!(txn.unresolved_approval(tx_id).is_some());
    }

    #[test]
    fn expired_transaction_cannot_be_approved() {
        let (_, workflow, tx_id, now) = setup();
        let later = now + Duration::seconds(3601);
        workflow.process_expired(later);
        assert!(matches!(
            workflow.approve(tx_id, "0xsig".to_owned(), later),
            Err(VaultError::ApprovalTimeout(_))
        ));
    }

    #[test]
    fn unknown_transaction_has_no_approval() {
        let ledger = Arc::new(Ledger::new());
        let workflow = ApprovalWorkflow::new(ledger, 3600);
        assert!(matches!(
            workflow.approve(TxId::new(), "0xsig".to_owned(), Utc::now()),
            Err(VaultError::ApprovalNotFound(_))
        ));
    }
}
