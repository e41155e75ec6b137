//! The six-stage sequencer.
//!
//! [`Pipeline::submit`] runs stages 1–4 synchronously and returns the
//! transaction id:
//!
//! 1. **Validate** — request sanity, wallet active, insert the PENDING row.
//! 2. **Authenticate** — attach the submitting session for audit.
//! 3. **Authorize** — policy evaluation with the reservation written under
//!    the ledger lock; denials cancel the row with the verbatim reason.
//! 4. **Wait** — INSTANT and NOTIFY fall through; DELAY and APPROVAL park
//!    the row and halt. The halt is a gate outcome, not an error.
//!
//! When the gate falls through (or a parked row is later released), stages
//! 5–6 run on a spawned task:
//!
//! 5. **Execute** — acquire the key, build, sign, submit. The key handle
//!    drops on every exit path.
//! 6. **Confirm** — bounded confirmation wait; CONFIRMED or FAILED, the
//!    reservation is gone either way.
//!
//! A failure in stages 5–6 has no caller to report to; it is recorded on
//! the row.
//!
//! [`Pipeline::sign_only`] is the separate entry point for externally-built
//! transactions: same validation and authorization, but the signature is
//! handed back to the caller and nothing is broadcast. Tiers that would
//! park the row are rejected outright, since there is no later execution to
//! release.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use agentvault_ledger::{Ledger, PolicyStore, WalletRegistry};
use agentvault_policy::{Decision, PolicyEngine};
use agentvault_types::{
    Operation, PipelineConfig, Result, SessionId, Tier, TransactionRecord, TxId, TxKind, TxStatus,
    VaultError, Wallet, WalletId, WalletStatus,
};

use crate::adapter::{ChainAdapter, ConfirmationStatus, KeyStore, SignedPayload, UnsignedTx};
use crate::approval::ApprovalWorkflow;
use crate::delay_queue::DelayQueue;

// ---------------------------------------------------------------------------
// SubmitRequest
// ---------------------------------------------------------------------------

/// An agent's transaction request. One operation is a plain submission;
/// several make a batch, evaluated all-or-nothing.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub wallet_id: WalletId,
    pub session_id: Option<SessionId>,
    pub operations: Vec<Operation>,
    /// Overrides the configured approval timeout for this submission.
    pub approval_timeout_seconds: Option<u64>,
}

impl SubmitRequest {
    #[must_use]
    pub fn single(wallet_id: WalletId, operation: Operation) -> Self {
        Self {
            wallet_id,
            session_id: None,
            operations: vec![operation],
            approval_timeout_seconds: None,
        }
    }
}

/// Outcome of the wait gate: continue into execution, or stop here with
/// the row parked.
enum Gate {
    Proceed,
    Held,
}

// ---------------------------------------------------------------------------
// SignRequest
// ---------------------------------------------------------------------------

/// Request to sign an externally-built transaction without broadcasting.
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub wallet_id: WalletId,
    pub session_id: Option<SessionId>,
    /// Raw unsigned transaction in the chain's wire encoding.
    pub transaction: String,
    pub network: Option<String>,
}

/// What a granted sign-only request hands back.
#[derive(Debug, Clone)]
pub struct SignOutcome {
    pub tx_id: TxId,
    pub signed_transaction: String,
    pub tx_hash: Option<String>,
    pub tier: Tier,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    ledger: Arc<Ledger>,
    wallets: Arc<WalletRegistry>,
    engine: PolicyEngine,
    delay_queue: DelayQueue,
    approvals: ApprovalWorkflow,
    chain: Arc<dyn ChainAdapter>,
    keys: Arc<dyn KeyStore>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        ledger: Arc<Ledger>,
        wallets: Arc<WalletRegistry>,
        policies: Arc<PolicyStore>,
        chain: Arc<dyn ChainAdapter>,
        keys: Arc<dyn KeyStore>,
        config: PipelineConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            engine: PolicyEngine::new(Arc::clone(&ledger), policies),
            delay_queue: DelayQueue::new(Arc::clone(&ledger)),
            approvals: ApprovalWorkflow::new(
                Arc::clone(&ledger),
                config.default_approval_timeout_seconds,
            ),
            ledger,
            wallets,
            chain,
            keys,
            config,
        }))
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn delay_queue(&self) -> &DelayQueue {
        &self.delay_queue
    }

    pub fn approvals(&self) -> &ApprovalWorkflow {
        &self.approvals
    }

    // -----------------------------------------------------------------------
    // Intake: stages 1-4
    // -----------------------------------------------------------------------

    /// Run stages 1–4 and return the transaction id.
    ///
    /// On an INSTANT or NOTIFY decision the execution continues in the
    /// background; a DELAY or APPROVAL decision leaves the row QUEUED. The
    /// returned id is valid either way.
    pub fn submit(self: &Arc<Self>, request: SubmitRequest) -> Result<TxId> {
        // Stage 1: validate.
        let wallet = self.validate(&request)?;
        let tx_id = self.insert_row(&wallet, &request)?;

        match self.intake(&wallet, &request, tx_id) {
            Ok(Gate::Proceed) => {
                let pipeline = Arc::clone(self);
                tokio::spawn(async move {
                    pipeline.run_execution(tx_id).await;
                });
                Ok(tx_id)
            }
            Ok(Gate::Held) => Ok(tx_id),
            Err(err) => {
                self.record_failure(tx_id, &err);
                Err(err)
            }
        }
    }

    /// Stages 2–4. Errors here are funneled to the row by the caller.
    fn intake(&self, wallet: &Wallet, request: &SubmitRequest, tx_id: TxId) -> Result<Gate> {
        // Stage 2: authenticate.
        if let Some(session_id) = request.session_id {
            self.ledger.begin().set_session(tx_id, session_id)?;
        }

        // Stage 3: authorize (evaluation + reservation, atomically), then
        // persist the tier.
        let now = Utc::now();
        let decision = self.authorize(wallet, &request.operations, tx_id, now)?;
        self.ledger.begin().set_tier(tx_id, decision.tier)?;
        info!(%tx_id, tier = %decision.tier, downgraded = decision.downgraded, "transaction authorized");

        // Stage 4: wait gate.
        match decision.tier {
            Tier::Instant | Tier::Notify => Ok(Gate::Proceed),
            Tier::Delay => {
                let delay = decision
                    .delay_seconds
                    .unwrap_or(self.config.default_delay_seconds);
                self.delay_queue.queue(tx_id, delay, now)?;
                Ok(Gate::Held)
            }
            Tier::Approval => {
                self.approvals
                    .request(tx_id, request.approval_timeout_seconds, now)?;
                Ok(Gate::Held)
            }
        }
    }

    fn validate(&self, request: &SubmitRequest) -> Result<Wallet> {
        if request.operations.is_empty() {
            return Err(VaultError::InvalidRequest {
                reason: "request contains no operations".to_owned(),
            });
        }
        for op in &request.operations {
            if op.kind == TxKind::SignOnly {
                return Err(VaultError::InvalidRequest {
                    reason: "externally-built transactions go through the signing entry point"
                        .to_owned(),
                });
            }
            if op.amount < Decimal::ZERO {
                return Err(VaultError::InvalidRequest {
                    reason: format!("negative amount {}", op.amount),
                });
            }
            if matches!(op.kind, TxKind::Transfer | TxKind::TokenTransfer)
                && op.amount == Decimal::ZERO
            {
                return Err(VaultError::InvalidRequest {
                    reason: "transfer amount must be positive".to_owned(),
                });
            }
            if op.to_address.is_empty() {
                return Err(VaultError::InvalidRequest {
                    reason: "missing destination address".to_owned(),
                });
            }
        }

        let wallet = self.wallets.get(request.wallet_id)?;
        if wallet.status == WalletStatus::Suspended {
            return Err(VaultError::WalletSuspended(wallet.id));
        }
        Ok(wallet)
    }

    fn insert_row(&self, wallet: &Wallet, request: &SubmitRequest) -> Result<TxId> {
        let ops = request.operations.clone();
        let kind = if ops.len() == 1 { ops[0].kind } else { TxKind::Batch };
        let network = ops[0]
            .network
            .clone()
            .unwrap_or_else(|| wallet.network.clone());
        let row = TransactionRecord::new(wallet.id, kind, wallet.chain, network, ops);
        self.ledger.insert(row)
    }

    fn authorize(
        &self,
        wallet: &Wallet,
        operations: &[Operation],
        tx_id: TxId,
        now: chrono::DateTime<Utc>,
    ) -> Result<Decision> {
        let result = if operations.len() == 1 {
            self.engine
                .evaluate_and_reserve(wallet, &operations[0], tx_id, now)
        } else {
            self.engine
                .evaluate_batch_and_reserve(wallet, operations, tx_id, now)
        };
        result.inspect_err(|err| {
            if matches!(err, VaultError::PolicyDenied { .. }) {
                warn!(%tx_id, %err, "authorization denied");
            }
        })
    }

    // -----------------------------------------------------------------------
    // Execution: stages 5-6
    // -----------------------------------------------------------------------

    /// Run stages 5–6 for a row that cleared the gate (PENDING) or was
    /// released from it (already EXECUTING). Failures are recorded on the
    /// row; this never panics the task.
    pub async fn run_execution(self: Arc<Self>, tx_id: TxId) {
        if let Err(err) = self.execute_and_confirm(tx_id).await {
            self.record_failure(tx_id, &err);
        }
    }

    async fn execute_and_confirm(&self, tx_id: TxId) -> Result<()> {
        let row = self.ledger.get(tx_id)?;
        // Direct INSTANT/NOTIFY executions still sit in PENDING; released
        // rows were already moved by their gatekeeper.
        let row = if row.status == TxStatus::Pending {
            self.ledger
                .transition(tx_id, &[TxStatus::Pending], TxStatus::Executing)?
        } else if row.status == TxStatus::Executing {
            row
        } else {
            return Err(VaultError::TxAlreadyProcessed { tx_id, status: row.status });
        };
        let wallet = self.wallets.get(row.wallet_id)?;

        // Stage 5: execute. The key handle drops at the end of this block,
        // success or error.
        let receipt = {
            let key = self.keys.acquire(wallet.id).await?;
            let unsigned = UnsignedTx {
                chain: row.chain,
                network: row.network.clone(),
                kind: row.kind,
                from_address: wallet.address.clone(),
                operations: row.operations.clone(),
            };
            let signed = self.chain.build_and_sign(&unsigned, &key).await?;
            self.chain.submit(&signed).await?
        };
        self.ledger
            .begin()
            .set_tx_hash(tx_id, receipt.tx_hash.clone())?;
        info!(%tx_id, tx_hash = %receipt.tx_hash, "transaction submitted");

        // Stage 6: bounded confirmation wait.
        self.wait_for_confirmation(&receipt.tx_hash).await?;

        let mut txn = self.ledger.begin();
        txn.set_executed_at(tx_id, Utc::now())?;
        txn.transition(tx_id, &[TxStatus::Executing], TxStatus::Confirmed)?;
        info!(%tx_id, "transaction confirmed");
        Ok(())
    }

    async fn wait_for_confirmation(&self, tx_hash: &str) -> Result<()> {
        let timeout = std::time::Duration::from_millis(self.config.confirmation_timeout_ms);
        let poll = std::time::Duration::from_millis(self.config.confirmation_poll_interval_ms);
        let started = tokio::time::Instant::now();
        loop {
            match self.chain.confirmation_status(tx_hash).await? {
                ConfirmationStatus::Confirmed => return Ok(()),
                ConfirmationStatus::Failed(reason) => {
                    return Err(VaultError::ChainError { reason });
                }
                ConfirmationStatus::Pending => {
                    if started.elapsed() >= timeout {
                        return Err(VaultError::ConfirmationTimeout {
                            tx_hash: tx_hash.to_owned(),
                        });
                    }
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }

    /// Funnel an error onto the row: EXECUTING rows fail, rows that never
    /// left the gate are cancelled, terminal rows are left alone.
    fn record_failure(&self, tx_id: TxId, err: &VaultError) {
        let mut txn = self.ledger.begin();
        let Ok(row) = txn.get(tx_id) else {
            return;
        };
        if row.status.is_terminal() {
            return;
        }
        if let Err(write_err) = txn.set_error(tx_id, err.to_string()) {
            error!(%tx_id, %write_err, "failed to record error on row");
            return;
        }
        let target = if row.status == TxStatus::Executing {
            TxStatus::Failed
        } else {
            TxStatus::Cancelled
        };
        if let Err(transition_err) = txn.transition(tx_id, &[row.status], target) {
            error!(%tx_id, %transition_err, "failed to finalize errored row");
        }
    }

    // -----------------------------------------------------------------------
    // Sign-only
    // -----------------------------------------------------------------------

    /// Sign an externally-built transaction after full policy evaluation,
    /// without broadcasting it.
    ///
    /// The decoded operations go through the same vetoes and tiering as a
    /// send. INSTANT and NOTIFY sign immediately; DELAY and APPROVAL are
    /// rejected, because a handed-back signature cannot be parked behind a
    /// gate.
    pub async fn sign_only(&self, request: SignRequest) -> Result<SignOutcome> {
        let wallet = self.wallets.get(request.wallet_id)?;
        if wallet.status == WalletStatus::Suspended {
            return Err(VaultError::WalletSuspended(wallet.id));
        }

        let mut operations = self
            .chain
            .parse_transaction(&request.transaction)
            .await
            .map_err(|err| VaultError::InvalidRequest {
                reason: format!("unparseable transaction: {err}"),
            })?;
        if operations.is_empty() {
            return Err(VaultError::InvalidRequest {
                reason: "transaction decodes to no operations".to_owned(),
            });
        }
        if let Some(network) = &request.network {
            for op in &mut operations {
                op.network.get_or_insert_with(|| network.clone());
            }
        }

        let network = request
            .network
            .clone()
            .unwrap_or_else(|| wallet.network.clone());
        let row =
            TransactionRecord::new(wallet.id, TxKind::SignOnly, wallet.chain, network, operations);
        let tx_id = self.ledger.insert(row)?;

        match self.sign_stages(&wallet, &request, tx_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.record_failure(tx_id, &err);
                Err(err)
            }
        }
    }

    async fn sign_stages(
        &self,
        wallet: &Wallet,
        request: &SignRequest,
        tx_id: TxId,
    ) -> Result<SignOutcome> {
        if let Some(session_id) = request.session_id {
            self.ledger.begin().set_session(tx_id, session_id)?;
        }

        let row = self.ledger.get(tx_id)?;
        let decision = self.authorize(wallet, &row.operations, tx_id, Utc::now())?;
        self.ledger.begin().set_tier(tx_id, decision.tier)?;
        if decision.tier.requires_wait() {
            return Err(VaultError::PolicyDenied {
                reason: format!("Sign-only does not support {} tier", decision.tier),
            });
        }

        self.ledger
            .transition(tx_id, &[TxStatus::Pending], TxStatus::Executing)?;
        let payload: SignedPayload = {
            let key = self.keys.acquire(wallet.id).await?;
            self.chain.sign_external(&request.transaction, &key).await?
        };

        let mut txn = self.ledger.begin();
        if let Some(tx_hash) = &payload.tx_hash {
            txn.set_tx_hash(tx_id, tx_hash.clone())?;
        }
        txn.set_executed_at(tx_id, Utc::now())?;
        txn.transition(tx_id, &[TxStatus::Executing], TxStatus::Signed)?;
        drop(txn);
        info!(%tx_id, tier = %decision.tier, "transaction signed without broadcast");

        Ok(SignOutcome {
            tx_id,
            signed_transaction: payload.signed_transaction,
            tx_hash: payload.tx_hash,
            tier: decision.tier,
        })
    }

    // -----------------------------------------------------------------------
    // Owner actions and maintenance
    // -----------------------------------------------------------------------

    /// Owner sign-off on an APPROVAL-tier row; execution continues in the
    /// background.
    pub fn approve(self: &Arc<Self>, tx_id: TxId, signature: String) -> Result<()> {
        self.approvals.approve(tx_id, signature, Utc::now())?;
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run_execution(tx_id).await;
        });
        Ok(())
    }

    pub fn reject(&self, tx_id: TxId) -> Result<()> {
        self.approvals.reject(tx_id, Utc::now())
    }

    /// Owner cancel during the delay cool-off.
    pub fn cancel_delayed(&self, tx_id: TxId) -> Result<()> {
        self.delay_queue.cancel(tx_id)
    }

    /// One maintenance pass: release due delays into execution and expire
    /// stale approvals. Called by the scheduler; harmless to call directly.
    pub fn tick(self: &Arc<Self>) {
        let now = Utc::now();
        for tx_id in self.delay_queue.process_due(now) {
            let pipeline = Arc::clone(self);
            tokio::spawn(async move {
                pipeline.run_execution(tx_id).await;
            });
        }
        self.approvals.process_expired(now);
    }
}
