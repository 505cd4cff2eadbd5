//! Traits for the collaborators the daemon consumes but does not implement:
//! session verification, chain adapters, the price oracle, and notification
//! transports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::request::{TokenRef, TransactionRequest};
use crate::types::{Chain, SessionId, Wallet, WalletId};

// ── Sessions ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub wallet_id: WalletId,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Validates agent session tokens.
///
/// Errors: `SessionRevoked`, `TokenExpired`, `Unauthorized` (wrong wallet or scope).
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify_session(&self, token: &str, wallet_id: WalletId) -> crate::Result<SessionInfo>;
}

// ── Chain adapters ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub from: String,
    pub network: String,
    pub request: TransactionRequest,
}

#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub chain: Chain,
    pub network: String,
    /// Chain-specific serialized payload; opaque to the daemon.
    pub payload: Vec<u8>,
    pub estimated_fee: Option<u128>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub success: bool,
    pub logs: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Submitted,
    Confirmed,
    Finalized,
}

#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub tx_hash: String,
    pub status: SubmitStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Confirmed,
    Failed,
    /// Not final yet when the wait ended.
    Pending,
}

#[derive(Debug, Clone)]
pub struct ConfirmationResult {
    pub status: ConfirmationStatus,
    pub confirmations: u64,
}

/// Builds, signs, and submits transactions for one chain.
///
/// Key custody lives behind `sign_transaction`; the daemon never sees key material.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain(&self) -> Chain;

    async fn build_transaction(&self, request: &BuildRequest) -> crate::Result<UnsignedTransaction>;

    async fn simulate_transaction(&self, tx: &UnsignedTransaction) -> crate::Result<SimulationResult>;

    async fn sign_transaction(
        &self,
        tx: &UnsignedTransaction,
        wallet: &Wallet,
    ) -> crate::Result<SignedTransaction>;

    async fn submit_transaction(&self, tx: &SignedTransaction) -> crate::Result<SubmitResult>;

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> crate::Result<ConfirmationResult>;
}

// ── Price oracle ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceInfo {
    pub usd_price: f64,
    pub is_stale: bool,
}

/// Errors: `PriceNotAvailable` when the asset is not listed anywhere,
/// anything else when the oracle itself is down.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_native_price(&self, chain: Chain) -> crate::Result<PriceInfo>;

    async fn get_price(
        &self,
        token: &TokenRef,
        chain: Chain,
        network: &str,
    ) -> crate::Result<PriceInfo>;
}

/// Outcome of converting a request to USD. Unknown is never zero.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceResult {
    Success { usd_amount: f64, is_stale: bool },
    OracleDown,
    NotListed {
        token_address: String,
        chain: Chain,
        failed_count: usize,
    },
}

impl PriceResult {
    pub fn usd_amount(&self) -> Option<f64> {
        match self {
            Self::Success { usd_amount, .. } => Some(*usd_amount),
            Self::OracleDown | Self::NotListed { .. } => None,
        }
    }
}

// ── Notifications ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEvent {
    TxNotify,
    TxQueued,
    TxApprovalRequired,
    TxConfirmed,
    TxFailed,
    TxCancelled,
    TxExpired,
    CumulativeLimitWarning,
    KillSwitchActivated,
    KillSwitchEscalated,
    KillSwitchRecovered,
    AutoStopTriggered,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TxNotify => "TX_NOTIFY",
            Self::TxQueued => "TX_QUEUED",
            Self::TxApprovalRequired => "TX_APPROVAL_REQUIRED",
            Self::TxConfirmed => "TX_CONFIRMED",
            Self::TxFailed => "TX_FAILED",
            Self::TxCancelled => "TX_CANCELLED",
            Self::TxExpired => "TX_EXPIRED",
            Self::CumulativeLimitWarning => "CUMULATIVE_LIMIT_WARNING",
            Self::KillSwitchActivated => "KILL_SWITCH_ACTIVATED",
            Self::KillSwitchEscalated => "KILL_SWITCH_ESCALATED",
            Self::KillSwitchRecovered => "KILL_SWITCH_RECOVERED",
            Self::AutoStopTriggered => "AUTO_STOP_TRIGGERED",
        }
    }

    /// Critical events go to every notifier instead of the first that succeeds.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Self::KillSwitchActivated | Self::KillSwitchEscalated | Self::AutoStopTriggered
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub wallet_id: Option<WalletId>,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(event: NotificationEvent, wallet_id: Option<WalletId>) -> Self {
        Self {
            event,
            wallet_id,
            title: event.as_str().to_string(),
            body: String::new(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_var(mut self, key: &str, value: impl ToString) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

/// A single notification transport (ntfy topic, Telegram chat, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> crate::Result<()>;
}
