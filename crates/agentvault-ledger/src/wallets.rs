//! Wallet registry and the owner lifecycle.
//!
//! Owner binding rules:
//! - NONE: `set_owner` allowed; `remove_owner` is a no-op;
//!   `mark_owner_verified` fails (nothing to verify).
//! - GRACE: binding still mutable — `set_owner` replaces the address (and
//!   resets verification), `remove_owner` clears it, `mark_owner_verified`
//!   promotes to LOCKED.
//! - LOCKED: the binding is immutable; `set_owner` and `remove_owner` fail.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::info;

use agentvault_types::{OwnerState, Result, VaultError, Wallet, WalletId, WalletStatus};

/// In-process wallet store with owner lifecycle enforcement.
#[derive(Default)]
pub struct WalletRegistry {
    wallets: Mutex<HashMap<WalletId, Wallet>>,
}

impl WalletRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, wallet: Wallet) -> WalletId {
        let id = wallet.id;
        self.lock().insert(id, wallet);
        id
    }

    pub fn get(&self, id: WalletId) -> Result<Wallet> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or(VaultError::WalletNotFound(id))
    }

    pub fn set_status(&self, id: WalletId, status: WalletStatus) -> Result<()> {
        let mut wallets = self.lock();
        let wallet = wallets.get_mut(&id).ok_or(VaultError::WalletNotFound(id))?;
        wallet.status = status;
        Ok(())
    }

    /// Register or replace the owner address. Blocked once the owner is
    /// verified (LOCKED). Replacing during GRACE resets verification.
    pub fn set_owner(&self, id: WalletId, owner_address: String) -> Result<()> {
        let mut wallets = self.lock();
        let wallet = wallets.get_mut(&id).ok_or(VaultError::WalletNotFound(id))?;
        if wallet.owner_state() == OwnerState::Locked {
            return Err(VaultError::OwnerAlreadyConnected(id));
        }
        wallet.owner_address = Some(owner_address);
        wallet.owner_verified = false;
        info!(wallet_id = %id, "owner registered, grace period started");
        Ok(())
    }

    /// Clear the owner binding. Blocked in LOCKED; a no-op in NONE.
    pub fn remove_owner(&self, id: WalletId) -> Result<()> {
        let mut wallets = self.lock();
        let wallet = wallets.get_mut(&id).ok_or(VaultError::WalletNotFound(id))?;
        match wallet.owner_state() {
            OwnerState::Locked => Err(VaultError::OwnerAlreadyConnected(id)),
            OwnerState::None => Ok(()),
            OwnerState::Grace => {
                wallet.owner_address = None;
                wallet.owner_verified = false;
                Ok(())
            }
        }
    }

    /// Promote GRACE to LOCKED after the owner proved control of the
    /// address. Idempotent once LOCKED.
    pub fn mark_owner_verified(&self, id: WalletId) -> Result<()> {
        let mut wallets = self.lock();
        let wallet = wallets.get_mut(&id).ok_or(VaultError::WalletNotFound(id))?;
        match wallet.owner_state() {
            OwnerState::None => Err(VaultError::OwnerNotConnected(id)),
            OwnerState::Locked => Ok(()),
            OwnerState::Grace => {
                wallet.owner_verified = true;
                info!(wallet_id = %id, "owner verified, binding locked");
                Ok(())
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<WalletId, Wallet>> {
        self.wallets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentvault_types::wallet::dummy_wallet;

    fn registry_with_wallet() -> (WalletRegistry, WalletId) {
        let registry = WalletRegistry::new();
        let id = registry.insert(dummy_wallet());
        (registry, id)
    }

    #[test]
    fn lifecycle_none_to_grace_to_locked() {
        let (registry, id) = registry_with_wallet();
        assert_eq!(registry.get(id).unwrap().owner_state(), OwnerState::None);

        registry.set_owner(id, "0xowner".into()).unwrap();
        assert_eq!(registry.get(id).unwrap().owner_state(), OwnerState::Grace);

        registry.mark_owner_verified(id).unwrap();
        assert_eq!(registry.get(id).unwrap().owner_state(), OwnerState::Locked);
    }

    #[test]
    fn locked_binding_is_immutable() {
        let (registry, id) = registry_with_wallet();
        registry.set_owner(id, "0xowner".into()).unwrap();
        registry.mark_owner_verified(id).unwrap();

        assert!(matches!(
            registry.set_owner(id, "0xother".into()),
            Err(VaultError::OwnerAlreadyConnected(_))
        ));
        assert!(matches!(
            registry.remove_owner(id),
            Err(VaultError::OwnerAlreadyConnected(_))
        ));
        // Re-verifying an already locked binding is harmless.
        registry.mark_owner_verified(id).unwrap();
    }

    #[test]
    fn grace_binding_is_mutable() {
        let (registry, id) = registry_with_wallet();
        registry.set_owner(id, "0xfirst".into()).unwrap();
        registry.set_owner(id, "0xsecond".into()).unwrap();
        assert_eq!(
            registry.get(id).unwrap().owner_address.as_deref(),
            Some("0xsecond")
        );

        registry.remove_owner(id).unwrap();
        assert_eq!(registry.get(id).unwrap().owner_state(), OwnerState::None);
    }

    #[test]
    fn verify_without_owner_fails() {
        let (registry, id) = registry_with_wallet();
        assert!(matches!(
            registry.mark_owner_verified(id),
            Err(VaultError::OwnerNotConnected(_))
        ));
    }

    #[test]
    fn remove_owner_is_noop_in_none() {
        let (registry, id) = registry_with_wallet();
        registry.remove_owner(id).unwrap();
    }

    #[test]
    fn unknown_wallet_errors() {
        let registry = WalletRegistry::new();
        assert!(matches!(
            registry.get(WalletId::new()),
            Err(VaultError::WalletNotFound(_))
        ));
    }
}
