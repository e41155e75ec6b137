//! Stored policies and the applicable-set query.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use agentvault_types::{Policy, PolicyId, Result, VaultError, WalletId};

/// In-process policy store.
///
/// The query the engine cares about is [`applicable`](Self::applicable):
/// wallet-scoped plus global policies, enabled only, restricted to the
/// operation's network (a policy with `network: None` applies everywhere).
#[derive(Default)]
pub struct PolicyStore {
    policies: Mutex<HashMap<PolicyId, Policy>>,
}

impl PolicyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, policy: Policy) -> PolicyId {
        let id = policy.id;
        self.lock().insert(id, policy);
        id
    }

    pub fn get(&self, id: PolicyId) -> Result<Policy> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or(VaultError::PolicyNotFound(id))
    }

    pub fn remove(&self, id: PolicyId) -> Result<Policy> {
        self.lock().remove(&id).ok_or(VaultError::PolicyNotFound(id))
    }

    pub fn set_enabled(&self, id: PolicyId, enabled: bool) -> Result<()> {
        let mut policies = self.lock();
        let policy = policies.get_mut(&id).ok_or(VaultError::PolicyNotFound(id))?;
        policy.enabled = enabled;
        Ok(())
    }

    /// Policies that apply to this wallet and network, ordered by priority
    /// (highest first) then by id for a stable evaluation order.
    #[must_use]
    pub fn applicable(&self, wallet_id: WalletId, network: Option<&str>) -> Vec<Policy> {
        let policies = self.lock();
        let mut out: Vec<Policy> = policies
            .values()
            .filter(|p| p.enabled)
            .filter(|p| p.wallet_id.is_none() || p.wallet_id == Some(wallet_id))
            .filter(|p| match (&p.network, network) {
                (None, _) => true,
                (Some(policy_net), Some(op_net)) => policy_net == op_net,
                (Some(_), None) => false,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PolicyId, Policy>> {
        self.policies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
