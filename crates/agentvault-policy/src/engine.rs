//! Policy evaluation and tier classification.
//!
//! Evaluation runs in two halves:
//!
//! 1. **Vetoes** — every applicable policy of every veto type must pass
//!    (AND semantics). The first violation denies the operation with a
//!    verbatim reason. Veto order: address whitelist, allowed networks,
//!    token whitelist, contract whitelist, method whitelist, approved
//!    spenders, approve amount limit, rate limit, time restriction,
//!    allowed payment domains.
//! 2. **Tiering** — approves take the highest approve-tier override
//!    (default APPROVAL); everything else is classified by spending
//!    limits. When several spending limits apply, the most restrictive
//!    threshold of each bound wins. With no applicable spending limit the
//!    operation is INSTANT.
//!
//! The reserving variants fold the wallet's in-flight reserved total into
//! the limit comparison and write the new reservation before the ledger
//! lock drops, which closes the window where two concurrent requests could
//! each pass the limit alone.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use agentvault_ledger::{Ledger, LedgerTxn, PolicyStore};
use agentvault_types::{
    MethodRule, Operation, Policy, PolicyRules, Result, Tier, TxId, TxKind, VaultError, Wallet,
    wallet::downgrade_if_no_owner,
};

use crate::domains::match_domain;

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// The outcome of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub tier: Tier,
    /// Policy-specified cool-off for DELAY; `None` means use the configured
    /// default.
    pub delay_seconds: Option<u64>,
    /// APPROVAL was demoted to DELAY because the wallet has no owner.
    pub downgraded: bool,
}

// ---------------------------------------------------------------------------
// PolicyEngine
// ---------------------------------------------------------------------------

/// Evaluates operations against the wallet's applicable policies.
pub struct PolicyEngine {
    ledger: Arc<Ledger>,
    policies: Arc<PolicyStore>,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, policies: Arc<PolicyStore>) -> Self {
        Self { ledger, policies }
    }

    /// Read-only evaluation: vetoes plus tier classification over the bare
    /// operation amount. No reservation is taken.
    pub fn evaluate(
        &self,
        wallet: &Wallet,
        op: &Operation,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let applicable = self.applicable_for(wallet, op);
        let txn = self.ledger.begin();
        check_vetoes(&txn, wallet, op, &applicable, now, false)?;
        Ok(classify(wallet, op, &applicable, op.amount))
    }

    /// Evaluation plus reservation, atomically.
    ///
    /// The spending-limit comparison uses
    /// `effective = reserved_total(wallet) + amount`, and on allow the
    /// reservation is written to `tx_id` under the same ledger guard.
    pub fn evaluate_and_reserve(
        &self,
        wallet: &Wallet,
        op: &Operation,
        tx_id: TxId,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let applicable = self.applicable_for(wallet, op);
        let mut txn = self.ledger.begin();
        check_vetoes(&txn, wallet, op, &applicable, now, true)?;
        let effective = txn.reserved_total(wallet.id) + op.amount;
        let decision = classify(wallet, op, &applicable, effective);
        txn.reserve(tx_id, op.amount)?;
        debug!(
            %tx_id,
            tier = %decision.tier,
            amount = %op.amount,
            effective = %effective,
            "operation authorized, reservation written"
        );
        Ok(decision)
    }

    /// All-or-nothing batch evaluation.
    ///
    /// Phase A: every operation must individually pass its vetoes; a single
    /// violation denies the whole batch with an indexed reason. Phase B:
    /// native amounts are summed for the spending-limit classification, and
    /// if the batch contains an approve the final tier is the stricter of
    /// the amount tier and the approve-override tier.
    pub fn evaluate_batch(
        &self,
        wallet: &Wallet,
        ops: &[Operation],
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let txn = self.ledger.begin();
        self.batch_in_txn(&txn, wallet, ops, now, false, Decimal::ZERO)
    }

    /// Batch evaluation plus a single summed reservation on `tx_id`, under
    /// one ledger guard.
    pub fn evaluate_batch_and_reserve(
        &self,
        wallet: &Wallet,
        ops: &[Operation],
        tx_id: TxId,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let mut txn = self.ledger.begin();
        let reserved = txn.reserved_total(wallet.id);
        let decision = self.batch_in_txn(&txn, wallet, ops, now, true, reserved)?;
        let total: Decimal = ops.iter().map(|op| op.amount).sum();
        txn.reserve(tx_id, total)?;
        Ok(decision)
    }

    fn batch_in_txn(
        &self,
        txn: &LedgerTxn<'_>,
        wallet: &Wallet,
        ops: &[Operation],
        now: DateTime<Utc>,
        in_pipeline: bool,
        reserved: Decimal,
    ) -> Result<Decision> {
        if ops.is_empty() {
            return Err(VaultError::InvalidRequest {
                reason: "batch contains no operations".to_owned(),
            });
        }
        // One batch, one network: mixed networks would let spending limits
        // scoped to another member's network go unchecked in Phase B.
        let network = ops[0].network.as_deref();
        if ops.iter().any(|op| op.network.as_deref() != network) {
            return Err(VaultError::InvalidRequest {
                reason: "batch operations must target a single network".to_owned(),
            });
        }

        // Phase A: per-operation vetoes, all-or-nothing.
        for (index, op) in ops.iter().enumerate() {
            let applicable = self.applicable_for(wallet, op);
            check_vetoes(txn, wallet, op, &applicable, now, in_pipeline).map_err(|err| {
                match err {
                    VaultError::PolicyDenied { reason } => VaultError::PolicyDenied {
                        reason: format!("Batch operation {index} denied: {reason}"),
                    },
                    other => other,
                }
            })?;
        }

        // Phase B: summed classification. Members were checked to share a
        // network, so the first operation's applicable set carries the
        // spending limits.
        let applicable = self.applicable_for(wallet, &ops[0]);
        let total: Decimal = ops.iter().map(|op| op.amount).sum();
        let (mut tier, mut delay_seconds) = amount_tier(&applicable, reserved + total);
        if ops.iter().any(|op| op.kind == TxKind::Approve) {
            tier = tier.stricter(approve_tier(&applicable));
        }
        if tier != Tier::Delay {
            delay_seconds = None;
        }
        let (tier, downgraded) = downgrade_if_no_owner(wallet.owner_state(), tier);
        if downgraded {
            warn!(wallet_id = %wallet.id, "batch downgraded APPROVAL -> DELAY: wallet has no owner");
        }
        Ok(Decision { tier, delay_seconds, downgraded })
    }

    fn applicable_for(&self, wallet: &Wallet, op: &Operation) -> Vec<Policy> {
        let network = op.network.as_deref().unwrap_or(&wallet.network);
        self.policies.applicable(wallet.id, Some(network))
    }
}

// ---------------------------------------------------------------------------
// Vetoes
// ---------------------------------------------------------------------------

fn deny(reason: String) -> VaultError {
    warn!(%reason, "policy denial");
    VaultError::PolicyDenied { reason }
}

#[allow(clippy::too_many_lines)]
fn check_vetoes(
    txn: &LedgerTxn<'_>,
    wallet: &Wallet,
    op: &Operation,
    applicable: &[Policy],
    now: DateTime<Utc>,
    in_pipeline: bool,
) -> Result<()> {
    let resolved_network = op.network.as_deref().unwrap_or(&wallet.network);

    // Address whitelist (transfers). An empty list leaves the policy
    // inactive rather than denying everything.
    if matches!(op.kind, TxKind::Transfer | TxKind::TokenTransfer) {
        for policy in applicable {
            if let PolicyRules::AddressWhitelist { addresses } = &policy.rules {
                if !addresses.is_empty() && !addresses.contains(&op.to_address) {
                    return Err(deny(format!(
                        "Address {} not in whitelist",
                        op.to_address
                    )));
                }
            }
        }
    }

    // Allowed networks.
    for policy in applicable {
        if let PolicyRules::AllowedNetworks { networks } = &policy.rules {
            if !networks.iter().any(|n| n == resolved_network) {
                return Err(deny(format!(
                    "Network '{resolved_network}' not in allowed networks list"
                )));
            }
        }
    }

    // Token whitelist: default deny for token transfers.
    if op.kind == TxKind::TokenTransfer {
        let lists: Vec<&Vec<String>> = applicable
            .iter()
            .filter_map(|p| match &p.rules {
                PolicyRules::TokenWhitelist { tokens } => Some(tokens),
                _ => None,
            })
            .collect();
        if lists.is_empty() {
            return Err(deny(
                "Token transfer not allowed: no TOKEN_WHITELIST policy configured".to_owned(),
            ));
        }
        let Some(token) = op.token_address.as_deref() else {
            return Err(deny("Token transfer missing token address".to_owned()));
        };
        if !lists.iter().all(|tokens| tokens.iter().any(|t| t == token)) {
            return Err(deny(format!("Token not in allowed list: {token}")));
        }
    }

    // Contract whitelist: default deny for contract calls.
    if op.kind == TxKind::ContractCall {
        let lists: Vec<&Vec<String>> = applicable
            .iter()
            .filter_map(|p| match &p.rules {
                PolicyRules::ContractWhitelist { contracts } => Some(contracts),
                _ => None,
            })
            .collect();
        if lists.is_empty() {
            return Err(deny(
                "Contract calls disabled: no CONTRACT_WHITELIST policy configured".to_owned(),
            ));
        }
        let Some(contract) = op.contract_address.as_deref() else {
            return Err(deny("Contract call missing contract address".to_owned()));
        };
        if !lists.iter().all(|cs| cs.iter().any(|c| c == contract)) {
            return Err(deny(format!("Contract not whitelisted: {contract}")));
        }

        // Method whitelist: optional narrowing on top of the contract
        // whitelist. A contract with no method rules stays unrestricted.
        let method_rules: Vec<&MethodRule> = applicable
            .iter()
            .filter_map(|p| match &p.rules {
                PolicyRules::MethodWhitelist { methods } => Some(methods.iter()),
                _ => None,
            })
            .flatten()
            .filter(|rule| rule.contract == contract)
            .collect();
        if !method_rules.is_empty() {
            let Some(selector) = op.selector.as_deref() else {
                return Err(deny(format!(
                    "Method not whitelisted: missing selector on contract {contract}"
                )));
            };
            let allowed = method_rules
                .iter()
                .any(|rule| rule.selectors.iter().any(|s| s == selector));
            if !allowed {
                return Err(deny(format!(
                    "Method not whitelisted: {selector} on contract {contract}"
                )));
            }
        }
    }

    // Approve vetoes: spender allow-list, then amount limits.
    if op.kind == TxKind::Approve {
        let lists: Vec<&Vec<String>> = applicable
            .iter()
            .filter_map(|p| match &p.rules {
                PolicyRules::ApprovedSpenders { spenders } => Some(spenders),
                _ => None,
            })
            .collect();
        if lists.is_empty() {
            return Err(deny(
                "Token approvals disabled: no APPROVED_SPENDERS policy configured".to_owned(),
            ));
        }
        let Some(spender) = op.spender_address.as_deref() else {
            return Err(deny("Approve missing spender address".to_owned()));
        };
        if !lists.iter().all(|ss| ss.iter().any(|s| s == spender)) {
            return Err(deny(format!("Spender not in approved list: {spender}")));
        }

        // Unlimited approvals are blocked even without an amount-limit
        // policy.
        match op.approve_amount {
            None => {
                return Err(deny("Unlimited token approval is blocked".to_owned()));
            }
            Some(amount) => {
                for policy in applicable {
                    if let PolicyRules::ApproveAmountLimit {
                        max_amount: Some(max),
                        ..
                    } = &policy.rules
                    {
                        if amount > *max {
                            return Err(deny("Approve amount exceeds limit".to_owned()));
                        }
                    }
                }
            }
        }
    }

    // Rate limit: submissions inside the rolling window.
    for policy in applicable {
        if let PolicyRules::RateLimit { max_count, window_seconds } = &policy.rules {
            let since = now - Duration::seconds(i64::try_from(*window_seconds).unwrap_or(i64::MAX));
            let mut count = txn.submission_count_since(wallet.id, since);
            if in_pipeline {
                // The row under evaluation was already inserted by the
                // validate stage; it does not count against itself.
                count = count.saturating_sub(1);
            }
            if count >= *max_count {
                return Err(deny(format!(
                    "Rate limit exceeded: {count} transactions in the last {window_seconds}s"
                )));
            }
        }
    }

    // Time restriction: UTC weekday and hour window.
    for policy in applicable {
        if let PolicyRules::TimeRestriction {
            allowed_weekdays,
            start_hour,
            end_hour,
        } = &policy.rules
        {
            if !in_time_window(now, allowed_weekdays, *start_hour, *end_hour) {
                return Err(deny(format!(
                    "Submission outside allowed time window ({start_hour}:00-{end_hour}:00 UTC)"
                )));
            }
        }
    }

    // Allowed payment domains: default deny when a payment domain is
    // present and no policy covers it.
    if let Some(domain) = op.payment_domain.as_deref() {
        let lists: Vec<&Vec<String>> = applicable
            .iter()
            .filter_map(|p| match &p.rules {
                PolicyRules::AllowedDomains { domains } => Some(domains),
                _ => None,
            })
            .collect();
        if lists.is_empty() {
            return Err(deny(
                "External payments disabled: no ALLOWED_DOMAINS policy configured".to_owned(),
            ));
        }
        let allowed = lists
            .iter()
            .all(|patterns| patterns.iter().any(|p| match_domain(p, domain)));
        if !allowed {
            return Err(deny(format!("Domain '{domain}' not in allowed domains list")));
        }
    }

    Ok(())
}

/// Hour windows are half-open (`start <= h < end`); `start > end` wraps
/// around midnight. An empty weekday list allows every day.
fn in_time_window(
    now: DateTime<Utc>,
    allowed_weekdays: &[Weekday],
    start_hour: u32,
    end_hour: u32,
) -> bool {
    if !allowed_weekdays.is_empty() && !allowed_weekdays.contains(&now.weekday()) {
        return false;
    }
    let h = now.hour();
    if start_hour <= end_hour {
        start_hour <= h && h < end_hour
    } else {
        h >= start_hour || h < end_hour
    }
}

// ---------------------------------------------------------------------------
// Tiering
// ---------------------------------------------------------------------------

fn classify(wallet: &Wallet, op: &Operation, applicable: &[Policy], effective: Decimal) -> Decision {
    let (tier, delay_seconds) = if op.kind == TxKind::Approve {
        (approve_tier(applicable), None)
    } else {
        amount_tier(applicable, effective)
    };
    let (tier, downgraded) = downgrade_if_no_owner(wallet.owner_state(), tier);
    if downgraded {
        warn!(wallet_id = %wallet.id, "downgraded APPROVAL -> DELAY: wallet has no owner");
    }
    Decision { tier, delay_seconds, downgraded }
}

/// Merged spending-limit classification. With several policies the most
/// restrictive threshold of each bound applies. No spending limit at all
/// means INSTANT passthrough.
fn amount_tier(applicable: &[Policy], effective: Decimal) -> (Tier, Option<u64>) {
    let mut merged: Option<(Decimal, Decimal, Decimal, Option<u64>)> = None;
    for policy in applicable {
        if let PolicyRules::SpendingLimit {
            instant_max,
            notify_max,
            delay_max,
            delay_seconds,
        } = &policy.rules
        {
            merged = Some(match merged {
                None => (*instant_max, *notify_max, *delay_max, *delay_seconds),
                Some((i, n, d, ds)) => (
                    i.min(*instant_max),
                    n.min(*notify_max),
                    d.min(*delay_max),
                    match (ds, delay_seconds) {
                        (Some(a), Some(b)) => Some(a.min(*b)),
                        (a, b) => a.or(*b),
                    },
                ),
            });
        }
    }

    let Some((instant_max, notify_max, delay_max, delay_seconds)) = merged else {
        return (Tier::Instant, None);
    };
    if effective <= instant_max {
        (Tier::Instant, None)
    } else if effective <= notify_max {
        (Tier::Notify, None)
    } else if effective <= delay_max {
        (Tier::Delay, delay_seconds)
    } else {
        (Tier::Approval, None)
    }
}

/// Forced tier for approve operations: the strictest override present,
/// defaulting to APPROVAL when none is configured.
fn approve_tier(applicable: &[Policy]) -> Tier {
    applicable
        .iter()
        .filter_map(|p| match &p.rules {
            PolicyRules::ApproveTierOverride { tier } => Some(*tier),
            _ => None,
        })
        .fold(None, |acc: Option<Tier>, t| {
            Some(acc.map_or(t, |a| a.stricter(t)))
        })
        .unwrap_or(Tier::Approval)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agentvault_types::policy::dummy_spending_limit;
    use agentvault_types::transaction::dummy_transaction;
    use agentvault_types::wallet::dummy_wallet;
    use chrono::TimeZone;

    struct Fixture {
        ledger: Arc<Ledger>,
        policies: Arc<PolicyStore>,
        engine: PolicyEngine,
        wallet: Wallet,
    }

    /// Wallet with an owner in GRACE so tier assignments come through
    /// without the no-owner downgrade.
    fn fixture() -> Fixture {
        let ledger = Arc::new(Ledger::new());
        let policies = Arc::new(PolicyStore::new());
        let engine = PolicyEngine::new(Arc::clone(&ledger), Arc::clone(&policies));
        let mut wallet = dummy_wallet();
        wallet.owner_address = Some("0xowner".to_owned());
        Fixture { ledger, policies, engine, wallet }
    }

    fn transfer(amount: i64) -> Operation {
        Operation::transfer(Decimal::from(amount), "0xdest")
    }

    #[test]
    fn no_policies_means_instant_passthrough() {
        let f = fixture();
        let decision = f.engine.evaluate(&f.wallet, &transfer(1_000_000), Utc::now()).unwrap();
        assert_eq!(decision.tier, Tier::Instant);
        assert!(!decision.downgraded);
    }

    #[test]
    fn spending_limit_thresholds() {
        let f = fixture();
        f.policies.insert(dummy_spending_limit(f.wallet.id));
        let now = Utc::now();

        let cases = [
            (50, Tier::Instant),
            (100, Tier::Instant),
            (300, Tier::Notify),
            (700, Tier::Delay),
            (1000, Tier::Delay),
            (1500, Tier::Approval),
        ];
        for (amount, expected) in cases {
            let decision = f.engine.evaluate(&f.wallet, &transfer(amount), now).unwrap();
            assert_eq!(decision.tier, expected, "amount {amount}");
        }
    }

    #[test]
    fn most_restrictive_spending_limit_wins() {
        let f = fixture();
        f.policies.insert(dummy_spending_limit(f.wallet.id));
        let mut stricter = dummy_spending_limit(f.wallet.id);
        stricter.rules = PolicyRules::SpendingLimit {
            instant_max: Decimal::from(10),
            notify_max: Decimal::from(600),
            delay_max: Decimal::from(800),
            delay_seconds: Some(120),
        };
        f.policies.insert(stricter);

        let now = Utc::now();
        // 50 passes the looser instant_max but not the stricter one.
        let d = f.engine.evaluate(&f.wallet, &transfer(50), now).unwrap();
        assert_eq!(d.tier, Tier::Notify);
        // notify bound is min(500, 600) = 500.
        let d = f.engine.evaluate(&f.wallet, &transfer(550), now).unwrap();
        assert_eq!(d.tier, Tier::Delay);
        assert_eq!(d.delay_seconds, Some(120));
        // delay bound is min(1000, 800) = 800.
        let d = f.engine.evaluate(&f.wallet, &transfer(900), now).unwrap();
        assert_eq!(d.tier, Tier::Approval);
    }

    #[test]
    fn reservation_raises_effective_amount() {
        let f = fixture();
        f.policies.insert(dummy_spending_limit(f.wallet.id));
        let now = Utc::now();

        let first = f.ledger.insert(dummy_transaction(f.wallet.id, Decimal::from(700))).unwrap();
        let d = f
            .engine
            .evaluate_and_reserve(&f.wallet, &transfer(700), first, now)
            .unwrap();
        assert_eq!(d.tier, Tier::Delay);
        assert_eq!(
            f.ledger.get(first).unwrap().reserved_amount,
            Some(Decimal::from(700))
        );

        // A second 700 now sees effective 1400 and lands on APPROVAL.
        let second = f.ledger.insert(dummy_transaction(f.wallet.id, Decimal::from(700))).unwrap();
        let d = f
            .engine
            .evaluate_and_reserve(&f.wallet, &transfer(700), second, now)
            .unwrap();
        assert_eq!(d.tier, Tier::Approval);
    }

    #[test]
    fn whitelist_denial_carries_reason() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::AddressWhitelist { addresses: vec!["0xgood".to_owned()] },
        ));
        let err = f
            .engine
            .evaluate(&f.wallet, &transfer(10), Utc::now())
            .unwrap_err();
        match err {
            VaultError::PolicyDenied { reason } => {
                assert_eq!(reason, "Address 0xdest not in whitelist");
            }
            other => panic!("expected PolicyDenied, got {other:?}"),
        }
    }

    #[test]
    fn empty_whitelist_is_inactive() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::AddressWhitelist { addresses: vec![] },
        ));
        f.engine.evaluate(&f.wallet, &transfer(10), Utc::now()).unwrap();
    }

    #[test]
    fn denial_reservation_not_written() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::AddressWhitelist { addresses: vec!["0xgood".to_owned()] },
        ));
        let tx_id = f.ledger.insert(dummy_transaction(f.wallet.id, Decimal::from(10))).unwrap();
        let err = f
            .engine
            .evaluate_and_reserve(&f.wallet, &transfer(10), tx_id, Utc::now())
            .unwrap_err();
        assert!(matches!(err, VaultError::PolicyDenied { .. }));
        assert!(f.ledger.get(tx_id).unwrap().reserved_amount.is_none());
        assert_eq!(f.ledger.reserved_total(f.wallet.id), Decimal::ZERO);
    }

    #[test]
    fn network_veto() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::AllowedNetworks { networks: vec!["mainnet".to_owned()] },
        ));
        // Wallet network is base-sepolia; the operation inherits it.
        let err = f.engine.evaluate(&f.wallet, &transfer(10), Utc::now()).unwrap_err();
        assert!(matches!(err, VaultError::PolicyDenied { .. }));

        let op = transfer(10).with_network("mainnet");
        f.engine.evaluate(&f.wallet, &op, Utc::now()).unwrap();
    }

    #[test]
    fn token_transfers_default_deny() {
        let f = fixture();
        let mut op = transfer(10);
        op.kind = TxKind::TokenTransfer;
        op.token_address = Some("0xtoken".to_owned());

        let err = f.engine.evaluate(&f.wallet, &op, Utc::now()).unwrap_err();
        match err {
            VaultError::PolicyDenied { reason } => assert!(reason.contains("TOKEN_WHITELIST")),
            other => panic!("{other:?}"),
        }

        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::TokenWhitelist { tokens: vec!["0xtoken".to_owned()] },
        ));
        f.engine.evaluate(&f.wallet, &op, Utc::now()).unwrap();
    }

    #[test]
    fn contract_and_method_whitelists() {
        let f = fixture();
        let mut op = transfer(0);
        op.kind = TxKind::ContractCall;
        op.contract_address = Some("0xc0ffee".to_owned());
        op.selector = Some("0xa9059cbb".to_owned());

        // Default deny without a contract whitelist.
        assert!(f.engine.evaluate(&f.wallet, &op, Utc::now()).is_err());

        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::ContractWhitelist { contracts: vec!["0xc0ffee".to_owned()] },
        ));
        f.engine.evaluate(&f.wallet, &op, Utc::now()).unwrap();

        // Method narrowing kicks in for this contract.
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::MethodWhitelist {
                methods: vec![MethodRule {
                    contract: "0xc0ffee".to_owned(),
                    selectors: vec!["0x095ea7b3".to_owned()],
                }],
            },
        ));
        let err = f.engine.evaluate(&f.wallet, &op, Utc::now()).unwrap_err();
        match err {
            VaultError::PolicyDenied { reason } => {
                assert!(reason.contains("0xa9059cbb"), "{reason}");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn unlimited_approve_blocked_by_default() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::ApprovedSpenders { spenders: vec!["0xspender".to_owned()] },
        ));
        let op = Operation::approve("0xspender", None);
        let err = f.engine.evaluate(&f.wallet, &op, Utc::now()).unwrap_err();
        match err {
            VaultError::PolicyDenied { reason } => {
                assert_eq!(reason, "Unlimited token approval is blocked");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn capped_approve_respects_amount_limit() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::ApprovedSpenders { spenders: vec!["0xspender".to_owned()] },
        ));
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::ApproveAmountLimit {
                max_amount: Some(Decimal::from(1000)),
                block_unlimited: true,
            },
        ));

        let ok = Operation::approve("0xspender", Some(Decimal::from(500)));
        let d = f.engine.evaluate(&f.wallet, &ok, Utc::now()).unwrap();
        // No override policy: approves default to APPROVAL.
        assert_eq!(d.tier, Tier::Approval);

        let too_big = Operation::approve("0xspender", Some(Decimal::from(5000)));
        assert!(f.engine.evaluate(&f.wallet, &too_big, Utc::now()).is_err());
    }

    #[test]
    fn approve_tier_override_takes_strictest() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::ApprovedSpenders { spenders: vec!["0xspender".to_owned()] },
        ));
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::ApproveTierOverride { tier: Tier::Notify },
        ));
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::ApproveTierOverride { tier: Tier::Delay },
        ));
        let op = Operation::approve("0xspender", Some(Decimal::from(10)));
        let d = f.engine.evaluate(&f.wallet, &op, Utc::now()).unwrap();
        assert_eq!(d.tier, Tier::Delay);
    }

    #[test]
    fn rate_limit_counts_window() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::RateLimit { max_count: 2, window_seconds: 3600 },
        ));
        let now = Utc::now();

        for _ in 0..2 {
            f.ledger.insert(dummy_transaction(f.wallet.id, Decimal::ONE)).unwrap();
        }
        let err = f.engine.evaluate(&f.wallet, &transfer(1), now).unwrap_err();
        match err {
            VaultError::PolicyDenied { reason } => assert!(reason.contains("Rate limit")),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn rate_limit_excludes_row_under_evaluation() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::RateLimit { max_count: 1, window_seconds: 3600 },
        ));
        let tx_id = f.ledger.insert(dummy_transaction(f.wallet.id, Decimal::ONE)).unwrap();
        // The only submission in the window is the row being evaluated.
        f.engine
            .evaluate_and_reserve(&f.wallet, &transfer(1), tx_id, Utc::now())
            .unwrap();
    }

    #[test]
    fn time_restriction_plain_window() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::TimeRestriction {
                allowed_weekdays: vec![Weekday::Mon],
                start_hour: 9,
                end_hour: 17,
            },
        ));
        // 2026-01-05 is a Monday.
        let monday_noon = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        f.engine.evaluate(&f.wallet, &transfer(1), monday_noon).unwrap();

        let monday_night = Utc.with_ymd_and_hms(2026, 1, 5, 20, 0, 0).unwrap();
        assert!(f.engine.evaluate(&f.wallet, &transfer(1), monday_night).is_err());

        let tuesday_noon = Utc.with_ymd_and_hms(2026, 1, 6, 12, 0, 0).unwrap();
        assert!(f.engine.evaluate(&f.wallet, &transfer(1), tuesday_noon).is_err());
    }

    #[test]
    fn time_restriction_wraps_midnight() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::TimeRestriction {
                allowed_weekdays: vec![],
                start_hour: 22,
                end_hour: 6,
            },
        ));
        let late = Utc.with_ymd_and_hms(2026, 1, 5, 23, 0, 0).unwrap();
        f.engine.evaluate(&f.wallet, &transfer(1), late).unwrap();
        let early = Utc.with_ymd_and_hms(2026, 1, 5, 5, 0, 0).unwrap();
        f.engine.evaluate(&f.wallet, &transfer(1), early).unwrap();
        let noon = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        assert!(f.engine.evaluate(&f.wallet, &transfer(1), noon).is_err());
    }

    #[test]
    fn payment_domain_default_deny_and_wildcard() {
        let f = fixture();
        let mut op = transfer(1);
        op.payment_domain = Some("api.example.com".to_owned());

        let err = f.engine.evaluate(&f.wallet, &op, Utc::now()).unwrap_err();
        match err {
            VaultError::PolicyDenied { reason } => {
                assert!(reason.contains("ALLOWED_DOMAINS"), "{reason}");
            }
            other => panic!("{other:?}"),
        }

        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::AllowedDomains { domains: vec!["*.example.com".to_owned()] },
        ));
        f.engine.evaluate(&f.wallet, &op, Utc::now()).unwrap();

        op.payment_domain = Some("example.com".to_owned());
        assert!(f.engine.evaluate(&f.wallet, &op, Utc::now()).is_err());
    }

    #[test]
    fn approval_downgrades_without_owner() {
        let f = fixture();
        let mut ownerless = f.wallet.clone();
        ownerless.owner_address = None;
        f.policies.insert(dummy_spending_limit(f.wallet.id));

        let d = f.engine.evaluate(&ownerless, &transfer(5000), Utc::now()).unwrap();
        assert_eq!(d.tier, Tier::Delay);
        assert!(d.downgraded);

        // With an owner in GRACE the tier stands.
        let d = f.engine.evaluate(&f.wallet, &transfer(5000), Utc::now()).unwrap();
        assert_eq!(d.tier, Tier::Approval);
        assert!(!d.downgraded);
    }

    #[test]
    fn batch_denial_is_indexed_and_all_or_nothing() {
        let f = fixture();
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::AddressWhitelist { addresses: vec!["0xdest".to_owned()] },
        ));
        let ops = vec![
            transfer(10),
            Operation::transfer(Decimal::from(10), "0xbad"),
        ];
        let err = f.engine.evaluate_batch(&f.wallet, &ops, Utc::now()).unwrap_err();
        match err {
            VaultError::PolicyDenied { reason } => {
                assert!(reason.starts_with("Batch operation 1 denied:"), "{reason}");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn batch_sums_amounts_for_tiering() {
        let f = fixture();
        f.policies.insert(dummy_spending_limit(f.wallet.id));
        // Individually INSTANT, together NOTIFY.
        let ops = vec![transfer(80), transfer(80)];
        let d = f.engine.evaluate_batch(&f.wallet, &ops, Utc::now()).unwrap();
        assert_eq!(d.tier, Tier::Notify);
    }

    #[test]
    fn batch_with_approve_takes_stricter_tier() {
        let f = fixture();
        f.policies.insert(dummy_spending_limit(f.wallet.id));
        f.policies.insert(Policy::for_wallet(
            f.wallet.id,
            PolicyRules::ApprovedSpenders { spenders: vec!["0xspender".to_owned()] },
        ));
        let ops = vec![
            transfer(10),
            Operation::approve("0xspender", Some(Decimal::from(5))),
        ];
        let d = f.engine.evaluate_batch(&f.wallet, &ops, Utc::now()).unwrap();
        // Amount tier is INSTANT but the approve forces APPROVAL.
        assert_eq!(d.tier, Tier::Approval);
    }

    #[test]
    fn batch_reserves_summed_amount() {
        let f = fixture();
        f.policies.insert(dummy_spending_limit(f.wallet.id));
        let tx_id = f.ledger.insert(dummy_transaction(f.wallet.id, Decimal::from(160))).unwrap();
        let ops = vec![transfer(80), transfer(80)];
        f.engine
            .evaluate_batch_and_reserve(&f.wallet, &ops, tx_id, Utc::now())
            .unwrap();
        assert_eq!(
            f.ledger.get(tx_id).unwrap().reserved_amount,
            Some(Decimal::from(160))
        );
    }

    #[test]
    fn empty_batch_rejected() {
        let f = fixture();
        let err = f.engine.evaluate_batch(&f.wallet, &[], Utc::now()).unwrap_err();
        assert!(matches!(err, VaultError::InvalidRequest { .. }));
    }

    #[test]
    fn mixed_network_batch_rejected() {
        let f = fixture();
        f.policies.insert(dummy_spending_limit(f.wallet.id));
        let ops = vec![transfer(10), transfer(10).with_network("mainnet")];
        let err = f.engine.evaluate_batch(&f.wallet, &ops, Utc::now()).unwrap_err();
        match err {
            VaultError::InvalidRequest { reason } => {
                assert!(reason.contains("single network"), "{reason}");
            }
            other => panic!("{other:?}"),
        }
    }
}
