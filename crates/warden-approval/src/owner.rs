use tracing::info;

use warden_core::{OwnerState, Result, Tier, WalletId, WardenError};
use warden_store::Store;

/// NONE → GRACE → LOCKED, persisted on the wallet row.
///
/// A verified owner can no longer be replaced or removed through this
/// service; GRACE owners can.
#[derive(Clone)]
pub struct OwnerLifecycle {
    store: Store,
}

impl OwnerLifecycle {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn state(&self, wallet_id: WalletId) -> Result<OwnerState> {
        Ok(self.store.get_wallet(wallet_id)?.owner_state())
    }

    pub fn set_owner(&self, wallet_id: WalletId, owner_address: &str) -> Result<()> {
        let address = owner_address.trim();
        if address.is_empty() {
            return Err(WardenError::Validation("owner address is empty".into()));
        }
        if self.state(wallet_id)? == OwnerState::Locked {
            return Err(WardenError::OwnerLocked(wallet_id));
        }
        self.store.set_owner(wallet_id, address)?;
        info!(%wallet_id, owner = address, "owner registered");
        Ok(())
    }

    /// Remove a GRACE owner. A wallet without an owner is left alone.
    pub fn remove_owner(&self, wallet_id: WalletId) -> Result<()> {
        match self.state(wallet_id)? {
            OwnerState::Locked => Err(WardenError::OwnerLocked(wallet_id)),
            OwnerState::None => Ok(()),
            OwnerState::Grace => {
                self.store.clear_owner(wallet_id)?;
                info!(%wallet_id, "owner removed");
                Ok(())
            }
        }
    }

    /// GRACE → LOCKED after the owner signed something. Already LOCKED is a no-op.
    pub fn mark_verified(&self, wallet_id: WalletId) -> Result<()> {
        match self.state(wallet_id)? {
            OwnerState::None => Err(WardenError::OwnerNotSet(wallet_id)),
            OwnerState::Locked => Ok(()),
            OwnerState::Grace => {
                if self.store.mark_owner_verified(wallet_id)? {
                    info!(%wallet_id, "owner verified");
                }
                Ok(())
            }
        }
    }
}

/// APPROVAL cannot be honoured without an owner to ask; fall back to DELAY.
/// Returns the tier to use and whether it was downgraded.
pub fn downgrade_if_no_owner(tier: Tier, owner: OwnerState) -> (Tier, bool) {
    if tier == Tier::Approval && owner == OwnerState::None {
        (Tier::Delay, true)
    } else {
        (tier, false)
    }
}
