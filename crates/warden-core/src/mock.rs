//! Deterministic in-process collaborators for tests and local runs.
//!
//! None of these touch the network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::adapter::*;
use crate::error::{Result, WardenError};
use crate::request::TokenRef;
use crate::types::{Chain, Wallet, WalletId};

// ── Chain adapter ──────────────────────────────────────────────

/// Stage at which [`MockChainAdapter`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Build,
    Simulate,
    Sign,
    Submit,
}

/// A chain adapter that succeeds by default and counts every call.
pub struct MockChainAdapter {
    chain: Chain,
    fail_at: Option<FailAt>,
    confirmation: ConfirmationStatus,
    confirm_delay: Option<Duration>,
    /// Hashes of every submitted transaction (for assertions in tests).
    pub submitted: Arc<Mutex<Vec<String>>>,
    builds: AtomicUsize,
    signs: AtomicUsize,
}

impl MockChainAdapter {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            fail_at: None,
            confirmation: ConfirmationStatus::Confirmed,
            confirm_delay: None,
            submitted: Arc::new(Mutex::new(vec![])),
            builds: AtomicUsize::new(0),
            signs: AtomicUsize::new(0),
        }
    }

    pub fn failing_at(mut self, stage: FailAt) -> Self {
        self.fail_at = Some(stage);
        self
    }

    pub fn with_confirmation(mut self, status: ConfirmationStatus) -> Self {
        self.confirmation = status;
        self
    }

    /// Sleep this long inside `wait_for_confirmation` before answering.
    pub fn with_confirm_delay(mut self, delay: Duration) -> Self {
        self.confirm_delay = Some(delay);
        self
    }

    pub fn build_calls(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn sign_calls(&self) -> usize {
        self.signs.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.submitted.lock().len()
    }

    fn check(&self, stage: FailAt) -> Result<()> {
        if self.fail_at == Some(stage) {
            return Err(match stage {
                FailAt::Simulate => WardenError::SimulationFailed("mock simulation failure".into()),
                other => WardenError::Chain(format!("mock {other:?} failure").to_lowercase()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn build_transaction(&self, request: &BuildRequest) -> Result<UnsignedTransaction> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.check(FailAt::Build)?;
        Ok(UnsignedTransaction {
            chain: self.chain,
            network: request.network.clone(),
            payload: serde_json::to_vec(&request.request)?,
            estimated_fee: Some(5000),
            expires_at: None,
        })
    }

    async fn simulate_transaction(&self, _tx: &UnsignedTransaction) -> Result<SimulationResult> {
        self.check(FailAt::Simulate)?;
        Ok(SimulationResult {
            success: true,
            logs: vec!["mock: simulated".into()],
            error: None,
        })
    }

    async fn sign_transaction(
        &self,
        tx: &UnsignedTransaction,
        _wallet: &Wallet,
    ) -> Result<SignedTransaction> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        self.check(FailAt::Sign)?;
        Ok(SignedTransaction {
            payload: tx.payload.clone(),
        })
    }

    async fn submit_transaction(&self, _tx: &SignedTransaction) -> Result<SubmitResult> {
        self.check(FailAt::Submit)?;
        let hash = format!("mock-{}", Uuid::new_v4().simple());
        self.submitted.lock().push(hash.clone());
        Ok(SubmitResult {
            tx_hash: hash,
            status: SubmitStatus::Submitted,
        })
    }

    async fn wait_for_confirmation(
        &self,
        _tx_hash: &str,
        timeout: Duration,
    ) -> Result<ConfirmationResult> {
        if let Some(delay) = self.confirm_delay {
            tokio::time::sleep(delay.min(timeout)).await;
            if delay > timeout {
                return Ok(ConfirmationResult {
                    status: ConfirmationStatus::Pending,
                    confirmations: 0,
                });
            }
        }
        Ok(ConfirmationResult {
            status: self.confirmation,
            confirmations: u64::from(self.confirmation == ConfirmationStatus::Confirmed),
        })
    }
}

// ── Price oracle ───────────────────────────────────────────────

/// A price oracle with fixed quotes.
#[derive(Default)]
pub struct MockPriceOracle {
    native: Mutex<HashMap<Chain, f64>>,
    tokens: Mutex<HashMap<String, f64>>,
    down: Mutex<bool>,
}

impl MockPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_native_price(self, chain: Chain, usd: f64) -> Self {
        self.native.lock().insert(chain, usd);
        self
    }

    pub fn with_token_price(self, token_address: &str, usd: f64) -> Self {
        self.tokens.lock().insert(token_address.to_lowercase(), usd);
        self
    }

    /// Every lookup fails with `OracleUnavailable` while down.
    pub fn set_down(&self, down: bool) {
        *self.down.lock() = down;
    }

    pub fn set_native_price(&self, chain: Chain, usd: f64) {
        self.native.lock().insert(chain, usd);
    }
}

#[async_trait]
impl PriceOracle for MockPriceOracle {
    async fn get_native_price(&self, chain: Chain) -> Result<PriceInfo> {
        if *self.down.lock() {
            return Err(WardenError::OracleUnavailable("mock oracle down".into()));
        }
        self.native
            .lock()
            .get(&chain)
            .map(|p| PriceInfo {
                usd_price: *p,
                is_stale: false,
            })
            .ok_or_else(|| WardenError::PriceNotAvailable(chain.native_symbol().into()))
    }

    async fn get_price(&self, token: &TokenRef, _chain: Chain, _network: &str) -> Result<PriceInfo> {
        if *self.down.lock() {
            return Err(WardenError::OracleUnavailable("mock oracle down".into()));
        }
        self.tokens
            .lock()
            .get(&token.address.to_lowercase())
            .map(|p| PriceInfo {
                usd_price: *p,
                is_stale: false,
            })
            .ok_or_else(|| WardenError::PriceNotAvailable(token.address.clone()))
    }
}

// ── Sessions ───────────────────────────────────────────────────

/// Accepts registered tokens for their wallet; everything else is unauthorized.
#[derive(Default)]
pub struct MockSessionVerifier {
    sessions: Mutex<HashMap<String, SessionInfo>>,
    revoked: Mutex<HashSet<String>>,
}

impl MockSessionVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token and return its session id.
    pub fn issue(&self, token: &str, wallet_id: WalletId) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions.lock().insert(
            token.to_string(),
            SessionInfo {
                session_id,
                wallet_id,
                expires_at: None,
            },
        );
        session_id
    }

    pub fn revoke(&self, token: &str) {
        self.revoked.lock().insert(token.to_string());
    }
}

#[async_trait]
impl SessionVerifier for MockSessionVerifier {
    async fn verify_session(&self, token: &str, wallet_id: WalletId) -> Result<SessionInfo> {
        if self.revoked.lock().contains(token) {
            return Err(WardenError::SessionRevoked);
        }
        let info = self
            .sessions
            .lock()
            .get(token)
            .cloned()
            .ok_or_else(|| WardenError::Unauthorized("unknown session token".into()))?;
        if info.expires_at.is_some_and(|t| t <= chrono::Utc::now()) {
            return Err(WardenError::TokenExpired);
        }
        if info.wallet_id != wallet_id {
            return Err(WardenError::Unauthorized(
                "session is not scoped to this wallet".into(),
            ));
        }
        Ok(info)
    }
}

// ── Notifier ───────────────────────────────────────────────────

/// Records every notification it is asked to deliver.
pub struct RecordingNotifier {
    name: String,
    fail: bool,
    pub sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail: false,
            sent: Arc::new(Mutex::new(vec![])),
        }
    }

    /// A notifier whose every delivery fails.
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.sent.lock().iter().map(|n| n.event).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        if self.fail {
            return Err(WardenError::Channel {
                channel: self.name.clone(),
                reason: "mock delivery failure".into(),
            });
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}
