use chrono::{DateTime, Utc};
use tracing::{debug, info};

use warden_core::{
    Event, EventBus, Result, SessionInfo, Tier, Transaction, TxId, TxStatus, WardenError,
    after_seconds,
};
use warden_store::Store;

/// DELAY-tier transactions waiting out their timer.
///
/// Entries are QUEUED rows with `queued_at` and `delay_seconds` set; there is
/// no in-memory queue to lose on restart.
#[derive(Clone)]
pub struct DelayQueue {
    store: Store,
    bus: EventBus,
}

impl DelayQueue {
    pub fn new(store: Store, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// PENDING → QUEUED with a release timer. Returns the release time.
    ///
    /// A delay too large to schedule is refused before the row changes.
    pub fn queue_delay(
        &self,
        tx: &Transaction,
        delay_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let release_at = after_seconds(now, delay_seconds)?;
        if !self.store.mark_queued(tx.id, now, Some(delay_seconds))? {
            let current = self.store.get_transaction(tx.id)?.status;
            return Err(WardenError::InvalidTransition {
                id: tx.id,
                from: current.to_string(),
                to: TxStatus::Queued.to_string(),
            });
        }
        info!(tx_id = %tx.id, delay_seconds, %release_at, "transaction delayed");
        self.bus.publish(Event::TransactionQueued {
            tx_id: tx.id,
            wallet_id: tx.wallet_id,
            tier: Tier::Delay,
        });
        Ok(release_at)
    }

    /// When a delayed row becomes due, if it is one. A stored delay past the
    /// timestamp range never comes due.
    pub fn release_at(tx: &Transaction) -> Option<DateTime<Utc>> {
        match (tx.status, tx.queued_at, tx.delay_seconds) {
            (TxStatus::Queued, Some(at), Some(delay)) => {
                Some(after_seconds(at, delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
            }
            _ => None,
        }
    }

    /// QUEUED → CANCELLED for a delayed transaction.
    ///
    /// Only a session scoped to the transaction's wallet may cancel. Cancelling
    /// something no longer waiting (released, already cancelled, never
    /// delayed) is a no-op returning false.
    pub fn cancel_delay(&self, tx_id: TxId, session: &SessionInfo) -> Result<bool> {
        let tx = self.store.get_transaction(tx_id)?;
        if session.wallet_id != tx.wallet_id {
            return Err(WardenError::Unauthorized(
                "session is not scoped to this transaction's wallet".into(),
            ));
        }
        if Self::release_at(&tx).is_none() {
            debug!(%tx_id, status = %tx.status, "nothing to cancel");
            return Ok(false);
        }
        let cancelled = self
            .store
            .transition(tx_id, &[TxStatus::Queued], TxStatus::Cancelled)?;
        if cancelled {
            info!(%tx_id, session_id = %session.session_id, "delayed transaction cancelled");
            self.bus.publish(Event::TransactionCancelled {
                tx_id,
                wallet_id: tx.wallet_id,
            });
        }
        Ok(cancelled)
    }

    /// Ids whose delay has elapsed, oldest first.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<TxId>> {
        self.store.due_delayed(now)
    }
}
