//! Timestamp-driven cool-off queue for DELAY-tier transactions.
//!
//! There are no in-memory timers: a queued row records `queued_at` and
//! `delay_seconds`, and [`DelayQueue::process_due`] selects rows whose
//! deadline has passed. A process restart loses nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use agentvault_ledger::Ledger;
use agentvault_types::{Result, TxId, TxStatus};

pub struct DelayQueue {
    ledger: Arc<Ledger>,
}

impl DelayQueue {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Move a PENDING row into the queue with its cool-off parameters.
    pub fn queue(&self, tx_id: TxId, delay_seconds: u64, now: DateTime<Utc>) -> Result<()> {
        let mut txn = self.ledger.begin();
        txn.transition(tx_id, &[TxStatus::Pending], TxStatus::Queued)?;
        txn.mark_queued(tx_id, delay_seconds, now)?;
        info!(%tx_id, delay_seconds, "transaction queued for cool-off");
        Ok(())
    }

    /// Owner intervention during the cool-off window. Only QUEUED rows can
    /// be cancelled; the reservation is released with the transition.
    pub fn cancel(&self, tx_id: TxId) -> Result<()> {
        self.ledger
            .transition(tx_id, &[TxStatus::Queued], TxStatus::Cancelled)?;
        info!(%tx_id, "queued transaction cancelled");
        Ok(())
    }

    /// Release every row whose cool-off has elapsed.
    ///
    /// Each due row is conditionally moved QUEUED -> EXECUTING; rows that
    /// lost a concurrent cancel are skipped. Returns the released ids for
    /// the caller to execute.
    pub fn process_due(&self, now: DateTime<Utc>) -> Vec<TxId> {
        let mut txn = self.ledger.begin();
        let due = txn.due_delayed(now);
        let mut released = Vec::new();
        for row in due {
            if txn
                .transition(row.id, &[TxStatus::Queued], TxStatus::Executing)
                .is_ok()
            {
                released.push(row.id);
            }
        }
        if !released.is_empty() {
            info!(count = released.len(), "released delayed transactions");
        }
        released
    }
}
