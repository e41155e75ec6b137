//! Pending owner approvals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ApprovalId, TxId};

/// An owner-approval request for an APPROVAL-tier transaction.
///
/// At most one approval exists per transaction, and it resolves at most
/// once: `approved_at` and `rejected_at` are never both set. An approval
/// that lapses past `expires_at` stays unresolved on the row (expired is
/// not rejected); the sweep transitions the transaction instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: ApprovalId,
    pub tx_id: TxId,
    pub expires_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    /// Owner signature captured on approve.
    pub owner_signature: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingApproval {
    #[must_use]
    pub fn new(tx_id: TxId, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: ApprovalId::new(),
            tx_id,
            expires_at,
            approved_at: None,
            rejected_at: None,
            owner_signature: None,
            created_at: Utc::now(),
        }
    }

    /// Neither approved nor rejected yet.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.approved_at.is_none() && self.rejected_at.is_none()
    }

    /// Unresolved and past its deadline.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_unresolved() && self.expires_at < now
    }
}
