//! Seams to the chain and the key material.
//!
//! The pipeline never talks to a chain or touches key bytes directly; it is
//! handed a [`ChainAdapter`] and a [`KeyStore`] as trait objects. Per-chain
//! construction, signing, and broadcast live behind the adapter.

use async_trait::async_trait;

use agentvault_types::{Chain, Operation, Result, TxKind, WalletId};

/// Chain-agnostic description of what to put on chain, assembled from the
/// ledger row.
#[derive(Debug, Clone)]
pub struct UnsignedTx {
    pub chain: Chain,
    pub network: String,
    pub kind: TxKind,
    pub from_address: String,
    /// The member operations, full kind-specific detail: token address for
    /// token transfers, contract and selector for calls, spender and
    /// allowance for approves. The adapter builds per operation kind.
    pub operations: Vec<Operation>,
}

/// Result of broadcasting a signed transaction.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub tx_hash: String,
}

/// Signature over an externally-built transaction, handed back to the
/// caller instead of being broadcast.
#[derive(Debug, Clone)]
pub struct SignedPayload {
    pub signed_transaction: String,
    /// Known before broadcast on chains that derive the hash from the
    /// signed bytes.
    pub tx_hash: Option<String>,
}

/// One poll of a submitted transaction's fate.
#[derive(Debug, Clone)]
pub enum ConfirmationStatus {
    /// Still in flight; poll again.
    Pending,
    Confirmed,
    Failed(String),
}

/// Decrypted signing material, scoped to one execution.
///
/// The handle is the release mechanism: dropping it ends the key's
/// lifetime on every exit path of the execute stage, success or error.
/// The buffer is wiped on drop.
pub struct KeyHandle {
    material: Vec<u8>,
}

impl KeyHandle {
    #[must_use]
    pub fn new(material: Vec<u8>) -> Self {
        Self { material }
    }

    #[must_use]
    pub fn material(&self) -> &[u8] {
        &self.material
    }
}

impl Drop for KeyHandle {
    fn drop(&mut self) {
        self.material.fill(0);
    }
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key bytes.
        f.debug_struct("KeyHandle").finish_non_exhaustive()
    }
}

/// Builds, signs, broadcasts, and tracks transactions on one chain family.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Build and sign the transaction with the provided key.
    async fn build_and_sign(&self, tx: &UnsignedTx, key: &KeyHandle) -> Result<Vec<u8>>;

    /// Broadcast signed bytes and return the transaction hash.
    async fn submit(&self, signed: &[u8]) -> Result<SubmitReceipt>;

    /// One confirmation poll for a submitted hash.
    async fn confirmation_status(&self, tx_hash: &str) -> Result<ConfirmationStatus>;

    /// Decode an externally-built unsigned transaction into its member
    /// operations, for policy evaluation ahead of a sign-only request.
    async fn parse_transaction(&self, raw: &str) -> Result<Vec<Operation>>;

    /// Sign an externally-built transaction without broadcasting it.
    async fn sign_external(&self, raw: &str, key: &KeyHandle) -> Result<SignedPayload>;
}

/// Hands out decrypted signing material for a wallet.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn acquire(&self, wallet_id: WalletId) -> Result<KeyHandle>;
}
