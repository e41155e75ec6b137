//! Policy records and the twelve rule bodies.
//!
//! Rule bodies are a serde tagged union so a stored policy round-trips as
//! `{"type": "SPENDING_LIMIT", ...}`. Rule shapes are validated by the admin
//! layer at write time; this crate trusts what it reads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{PolicyId, Tier, WalletId};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// A stored authorization policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    /// `None` makes the policy global (applies to every wallet).
    pub wallet_id: Option<WalletId>,
    pub rules: PolicyRules,
    /// Evaluation-order hint among policies of the same type.
    pub priority: i32,
    pub enabled: bool,
    /// `None` applies on every network; `Some` restricts to one.
    pub network: Option<String>,
}

impl Policy {
    /// A wallet-scoped, enabled, any-network policy.
    #[must_use]
    pub fn for_wallet(wallet_id: WalletId, rules: PolicyRules) -> Self {
        Self {
            id: PolicyId::new(),
            wallet_id: Some(wallet_id),
            rules,
            priority: 0,
            enabled: true,
            network: None,
        }
    }

    /// A global, enabled, any-network policy.
    #[must_use]
    pub fn global(rules: PolicyRules) -> Self {
        Self {
            id: PolicyId::new(),
            wallet_id: None,
            rules,
            priority: 0,
            enabled: true,
            network: None,
        }
    }

    #[must_use]
    pub fn policy_type(&self) -> PolicyType {
        self.rules.policy_type()
    }
}

// ---------------------------------------------------------------------------
// PolicyType
// ---------------------------------------------------------------------------

/// Discriminant of the rule union, for store queries and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyType {
    SpendingLimit,
    AddressWhitelist,
    TokenWhitelist,
    ContractWhitelist,
    MethodWhitelist,
    ApprovedSpenders,
    ApproveAmountLimit,
    ApproveTierOverride,
    RateLimit,
    TimeRestriction,
    AllowedDomains,
    AllowedNetworks,
}

impl std::fmt::Display for PolicyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SpendingLimit => "SPENDING_LIMIT",
            Self::AddressWhitelist => "ADDRESS_WHITELIST",
            Self::TokenWhitelist => "TOKEN_WHITELIST",
            Self::ContractWhitelist => "CONTRACT_WHITELIST",
            Self::MethodWhitelist => "METHOD_WHITELIST",
            Self::ApprovedSpenders => "APPROVED_SPENDERS",
            Self::ApproveAmountLimit => "APPROVE_AMOUNT_LIMIT",
            Self::ApproveTierOverride => "APPROVE_TIER_OVERRIDE",
            Self::RateLimit => "RATE_LIMIT",
            Self::TimeRestriction => "TIME_RESTRICTION",
            Self::AllowedDomains => "ALLOWED_DOMAINS",
            Self::AllowedNetworks => "ALLOWED_NETWORKS",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// PolicyRules
// ---------------------------------------------------------------------------

/// Per-contract selector narrowing for method whitelists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodRule {
    pub contract: String,
    /// Allowed function selectors (e.g. `0xa9059cbb`) on this contract.
    pub selectors: Vec<String>,
}

/// The twelve rule bodies, tagged by policy type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyRules {
    /// Tier thresholds over the native amount. `delay_seconds` overrides the
    /// configured default cool-off for DELAY-tier transactions.
    SpendingLimit {
        #[serde(with = "rust_decimal::serde::str")]
        instant_max: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        notify_max: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        delay_max: Decimal,
        delay_seconds: Option<u64>,
    },
    /// Destination allow-list. An empty list means the policy is inactive.
    AddressWhitelist { addresses: Vec<String> },
    /// Token mint/contract allow-list for token transfers.
    TokenWhitelist { tokens: Vec<String> },
    /// Callable-contract allow-list for contract calls.
    ContractWhitelist { contracts: Vec<String> },
    /// Optional per-contract selector narrowing on top of the contract
    /// whitelist.
    MethodWhitelist { methods: Vec<MethodRule> },
    /// Allowance-recipient allow-list for approve operations.
    ApprovedSpenders { spenders: Vec<String> },
    /// Caps on approve amounts. `block_unlimited` denies unlimited approves
    /// even when `max_amount` is absent.
    ApproveAmountLimit {
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            with = "rust_decimal::serde::str_option"
        )]
        max_amount: Option<Decimal>,
        block_unlimited: bool,
    },
    /// Forced tier for approve operations (defaults to APPROVAL when no
    /// such policy exists).
    ApproveTierOverride { tier: Tier },
    /// At most `max_count` submissions inside a rolling window.
    RateLimit { max_count: u32, window_seconds: u64 },
    /// Allowed UTC submission window. `start_hour > end_hour` wraps
    /// around midnight.
    TimeRestriction {
        allowed_weekdays: Vec<chrono::Weekday>,
        start_hour: u32,
        end_hour: u32,
    },
    /// Allowed external-payment domains; entries may use a leading
    /// `*.` wildcard.
    AllowedDomains { domains: Vec<String> },
    /// Allowed networks for submission. Permissive when no such policy
    /// exists.
    AllowedNetworks { networks: Vec<String> },
}

impl PolicyRules {
    #[must_use]
    pub fn policy_type(&self) -> PolicyType {
        match self {
            Self::SpendingLimit { .. } => PolicyType::SpendingLimit,
            Self::AddressWhitelist { .. } => PolicyType::AddressWhitelist,
            Self::TokenWhitelist { .. } => PolicyType::TokenWhitelist,
            Self::ContractWhitelist { .. } => PolicyType::ContractWhitelist,
            Self::MethodWhitelist { .. } => PolicyType::MethodWhitelist,
            Self::ApprovedSpenders { .. } => PolicyType::ApprovedSpenders,
            Self::ApproveAmountLimit { .. } => PolicyType::ApproveAmountLimit,
            Self::ApproveTierOverride { .. } => PolicyType::ApproveTierOverride,
            Self::RateLimit { .. } => PolicyType::RateLimit,
            Self::TimeRestriction { .. } => PolicyType::TimeRestriction,
            Self::AllowedDomains { .. } => PolicyType::AllowedDomains,
            Self::AllowedNetworks { .. } => PolicyType::AllowedNetworks,
        }
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// The canonical 100 / 500 / 1000 spending-limit policy.
#[cfg(any(test, feature = "test-helpers"))]
#[must_use]
pub fn dummy_spending_limit(wallet_id: WalletId) -> Policy {
    Policy::for_wallet(
        wallet_id,
        PolicyRules::SpendingLimit {
            instant_max: Decimal::from(100),
            notify_max: Decimal::from(500),
            delay_max: Decimal::from(1000),
            delay_seconds: None,
        },
    )
}
