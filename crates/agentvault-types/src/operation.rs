//! The policy engine's evaluation input.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::TxKind;

/// One operation as seen by the policy engine.
///
/// Optional fields carry kind-specific detail: `token_address` for token
/// transfers, `contract_address`/`selector` for contract calls,
/// `spender_address`/`approve_amount` for approves, `payment_domain` for
/// external payment flows. `approve_amount: None` on an approve means an
/// unlimited allowance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub kind: TxKind,
    /// Native amount spent by this operation.
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub to_address: String,
    pub network: Option<String>,
    pub token_address: Option<String>,
    pub contract_address: Option<String>,
    /// Function selector (e.g. `0xa9059cbb`) for contract calls.
    pub selector: Option<String>,
    pub spender_address: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub approve_amount: Option<Decimal>,
    /// Destination domain for external payment flows.
    pub payment_domain: Option<String>,
}

impl Operation {
    /// A plain native transfer.
    #[must_use]
    pub fn transfer(amount: Decimal, to_address: impl Into<String>) -> Self {
        Self {
            kind: TxKind::Transfer,
            amount,
            to_address: to_address.into(),
            network: None,
            token_address: None,
            contract_address: None,
            selector: None,
            spender_address: None,
            approve_amount: None,
            payment_domain: None,
        }
    }

    /// An allowance grant. `approve_amount: None` means unlimited.
    #[must_use]
    pub fn approve(
        spender: impl Into<String>,
        approve_amount: Option<Decimal>,
    ) -> Self {
        let spender = spender.into();
        Self {
            kind: TxKind::Approve,
            amount: Decimal::ZERO,
            to_address: spender.clone(),
            network: None,
            token_address: None,
            contract_address: None,
            selector: None,
            spender_address: Some(spender),
            approve_amount,
            payment_domain: None,
        }
    }

    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Whether this is an unlimited-allowance approve.
    #[must_use]
    pub fn is_unlimited_approve(&self) -> bool {
        self.kind == TxKind::Approve && self.approve_amount.is_none()
    }
}
