//! Wallet model and the owner lifecycle.
//!
//! Owner state is never stored directly; it is derived from two wallet
//! fields (`owner_address`, `owner_verified`):
//!
//! - **None**: no owner address registered. APPROVAL-tier transactions are
//!   downgraded to DELAY because nobody could approve them.
//! - **Grace**: an address is registered but not yet verified. Tiers apply
//!   as written; the owner binding can still be changed or removed.
//! - **Locked**: the address is verified. The binding is immutable.

use serde::{Deserialize, Serialize};

use crate::{Tier, WalletId};

// ---------------------------------------------------------------------------
// Chain / WalletStatus
// ---------------------------------------------------------------------------

/// Chain family a wallet lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Evm,
    Solana,
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evm => write!(f, "evm"),
            Self::Solana => write!(f, "solana"),
        }
    }
}

/// Administrative wallet status. Suspended wallets accept no submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    Active,
    Suspended,
}

// ---------------------------------------------------------------------------
// OwnerState
// ---------------------------------------------------------------------------

/// Derived owner lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerState {
    /// No owner registered.
    None,
    /// Owner registered, not verified. Binding still mutable.
    Grace,
    /// Owner verified. Binding immutable.
    Locked,
}

impl std::fmt::Display for OwnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Grace => write!(f, "GRACE"),
            Self::Locked => write!(f, "LOCKED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// A custodied wallet record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub chain: Chain,
    pub network: String,
    pub status: WalletStatus,
    /// On-chain address of the custodied key.
    pub address: String,
    /// Registered owner address, if any.
    pub owner_address: Option<String>,
    /// Whether the owner proved control of `owner_address`.
    pub owner_verified: bool,
}

impl Wallet {
    /// Derive the owner lifecycle state from the owner fields.
    #[must_use]
    pub fn owner_state(&self) -> OwnerState {
        match (&self.owner_address, self.owner_verified) {
            (None, _) => OwnerState::None,
            (Some(_), false) => OwnerState::Grace,
            (Some(_), true) => OwnerState::Locked,
        }
    }
}

/// Owner-aware tier downgrade, applied after policy tiering.
///
/// An APPROVAL decision is meaningless when no owner exists to approve it,
/// so it degrades to DELAY. Grace and Locked leave the tier untouched: an
/// unverified owner can still act on approvals.
///
/// Returns the effective tier and whether a downgrade happened.
#[must_use]
pub fn downgrade_if_no_owner(owner_state: OwnerState, tier: Tier) -> (Tier, bool) {
    if tier == Tier::Approval && owner_state == OwnerState::None {
        (Tier::Delay, true)
    } else {
        (tier, false)
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// An active EVM wallet with no owner.
#[cfg(any(test, feature = "test-helpers"))]
#[must_use]
pub fn dummy_wallet() -> Wallet {
    Wallet {
        id: WalletId::new(),
        chain: Chain::Evm,
        network: "base-sepolia".to_owned(),
        status: WalletStatus::Active,
        address: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_owned(),
        owner_address: None,
        owner_verified: false,
    }
}
