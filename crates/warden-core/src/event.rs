use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{KillSwitchState, Tier, TxId, TxType, WalletId};

/// Domain events published by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Transaction lifecycle ──────────────────────────────────
    TransactionRequested {
        tx_id: TxId,
        wallet_id: WalletId,
        tx_type: TxType,
    },
    TransactionTiered {
        tx_id: TxId,
        wallet_id: WalletId,
        tier: Tier,
    },
    TransactionQueued {
        tx_id: TxId,
        wallet_id: WalletId,
        tier: Tier,
    },
    TransactionSubmitted {
        tx_id: TxId,
        wallet_id: WalletId,
        tx_hash: String,
    },
    TransactionConfirmed {
        tx_id: TxId,
        wallet_id: WalletId,
    },
    TransactionFailed {
        tx_id: TxId,
        wallet_id: WalletId,
        error: String,
    },
    TransactionCancelled {
        tx_id: TxId,
        wallet_id: WalletId,
    },
    TransactionExpired {
        tx_id: TxId,
        wallet_id: WalletId,
    },
    CumulativeLimitWarning {
        wallet_id: WalletId,
        window: String,
        ratio: f64,
    },

    // ── Approval lifecycle ─────────────────────────────────────
    ApprovalRequested {
        tx_id: TxId,
        wallet_id: WalletId,
        channel: String,
        expires_at: DateTime<Utc>,
    },
    ApprovalGranted {
        tx_id: TxId,
        wallet_id: WalletId,
    },
    ApprovalRejected {
        tx_id: TxId,
        wallet_id: WalletId,
    },
    ApprovalExpired {
        tx_id: TxId,
        wallet_id: WalletId,
    },

    // ── Safety ─────────────────────────────────────────────────
    KillSwitchChanged {
        from: KillSwitchState,
        to: KillSwitchState,
        by: String,
    },
    AutoStopTriggered {
        rule: String,
        wallet_id: Option<WalletId>,
        reason: String,
    },

    // ── System ─────────────────────────────────────────────────
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Shutdown,
}

/// A broadcast-based event bus for system-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}
