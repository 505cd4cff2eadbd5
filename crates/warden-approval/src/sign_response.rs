//! Correlating SignResponses with the requests that are still open.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use warden_core::{Result, SignAction, SignRequest, SignResponse, TxId, WalletId, WardenError};
use warden_store::{Store, approvals, wallets};

use crate::verifier::VerifierRegistry;

/// How long an expired request stays registered, so late responses get
/// `SIGN_REQUEST_EXPIRED` before they start getting `SIGN_REQUEST_NOT_FOUND`.
pub const EVICTION_GRACE_SECS: i64 = 60;

struct OpenRequest {
    request: SignRequest,
    wallet_id: WalletId,
    timer: CancellationToken,
}

/// A response that passed every check and may be committed.
#[derive(Debug, Clone)]
pub struct VerifiedResponse {
    pub request_id: Uuid,
    pub tx_id: TxId,
    pub wallet_id: WalletId,
    pub action: SignAction,
    pub signature: Option<String>,
    pub signer_address: String,
}

#[derive(Clone)]
pub struct SignResponseHandler {
    store: Store,
    verifiers: VerifierRegistry,
    open: Arc<DashMap<Uuid, OpenRequest>>,
    /// request id → when it can be forgotten.
    processed: Arc<DashMap<Uuid, DateTime<Utc>>>,
}

impl SignResponseHandler {
    pub fn new(store: Store, verifiers: VerifierRegistry) -> Self {
        Self {
            store,
            verifiers,
            open: Arc::new(DashMap::new()),
            processed: Arc::new(DashMap::new()),
        }
    }

    /// Track an outgoing request until it is answered or evicted.
    ///
    /// Inside a tokio runtime a timer evicts the entry once the grace period
    /// after expiry has passed; the sweeper's [`evict_expired`](Self::evict_expired)
    /// covers the rest.
    pub fn register(&self, wallet_id: WalletId, request: SignRequest) {
        let request_id = request.request_id;
        let evict_at = request.expires_at + Duration::seconds(EVICTION_GRACE_SECS);
        let timer = CancellationToken::new();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let open = self.open.clone();
            let token = timer.clone();
            let wait = (evict_at - Utc::now()).to_std().unwrap_or_default();
            handle.spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(wait) => {
                        if open.remove(&request_id).is_some() {
                            debug!(%request_id, "sign request evicted");
                        }
                    }
                }
            });
        }

        if let Some(previous) = self.open.insert(
            request_id,
            OpenRequest {
                request,
                wallet_id,
                timer,
            },
        ) {
            previous.timer.cancel();
        }
    }

    pub fn is_open(&self, request_id: Uuid) -> bool {
        self.open.contains_key(&request_id)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// The open request for a transaction, if any.
    pub fn request_for_tx(&self, tx_id: TxId) -> Option<SignRequest> {
        self.open
            .iter()
            .find(|e| e.request.metadata.tx_id == tx_id)
            .map(|e| e.request.clone())
    }

    /// Run every check short of committing the decision.
    ///
    /// Order: shape, already processed, known request, expiry, owner address,
    /// signature.
    pub fn verify(&self, response: &SignResponse, now: DateTime<Utc>) -> Result<VerifiedResponse> {
        response.validate()?;
        let request_id = response.request_id;

        if self.processed.contains_key(&request_id) {
            return Err(WardenError::SignRequestAlreadyProcessed(request_id));
        }

        let (request, wallet_id) = match self.open.get(&request_id) {
            Some(entry) => (entry.request.clone(), entry.wallet_id),
            None => return Err(WardenError::SignRequestNotFound(request_id)),
        };
        let tx_id = request.metadata.tx_id;

        let (approval, wallet) = {
            let conn = self.store.conn();
            (
                approvals::approval_for_tx(&conn, tx_id)?,
                wallets::get_wallet(&conn, wallet_id)?,
            )
        };

        if approval.as_ref().is_some_and(|a| a.is_decided()) {
            self.mark_processed(request_id, request.expires_at);
            return Err(WardenError::SignRequestAlreadyProcessed(request_id));
        }
        let approval_expired = approval.as_ref().is_some_and(|a| a.expires_at <= now);
        if now > request.expires_at || approval_expired {
            return Err(WardenError::SignRequestExpired(request_id));
        }

        let wallet = wallet.ok_or(WardenError::WalletNotFound(wallet_id))?;
        let owner = wallet
            .owner_address
            .ok_or(WardenError::OwnerNotSet(wallet_id))?;
        if !owner.eq_ignore_ascii_case(response.signer_address.trim()) {
            return Err(WardenError::SignerAddressMismatch {
                expected: owner,
                actual: response.signer_address.clone(),
            });
        }

        let signature = response
            .signature
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(signature) = signature {
            self.verifiers
                .check(&request.chain, &owner, &request.message, signature)?;
        }

        Ok(VerifiedResponse {
            request_id,
            tx_id,
            wallet_id,
            action: response.action,
            signature: signature.map(str::to_string),
            signer_address: response.signer_address.clone(),
        })
    }

    /// Close a request after its decision was committed. Later responses get
    /// `SIGN_REQUEST_ALREADY_PROCESSED`.
    pub fn complete(&self, request_id: Uuid) {
        let expires_at = match self.open.remove(&request_id) {
            Some((_, entry)) => {
                entry.timer.cancel();
                entry.request.expires_at
            }
            None => Utc::now(),
        };
        self.mark_processed(request_id, expires_at);
    }

    /// Drop every open request for `tx_id` (decided elsewhere, expired, cancelled).
    pub fn forget_tx(&self, tx_id: TxId) -> Vec<Uuid> {
        let ids: Vec<Uuid> = self
            .open
            .iter()
            .filter(|e| e.request.metadata.tx_id == tx_id)
            .map(|e| *e.key())
            .collect();
        for id in &ids {
            self.complete(*id);
        }
        ids
    }

    /// Evict requests whose grace period ended before `now`. Returns the
    /// number of open requests removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let grace = Duration::seconds(EVICTION_GRACE_SECS);
        let before = self.open.len();
        self.open.retain(|request_id, entry| {
            let keep = entry.request.expires_at + grace > now;
            if !keep {
                entry.timer.cancel();
                debug!(%request_id, "sign request evicted");
            }
            keep
        });
        self.processed.retain(|_, forget_at| *forget_at > now);
        let evicted = before.saturating_sub(self.open.len());
        if evicted > 0 {
            info!(evicted, "expired sign requests evicted");
        }
        evicted
    }

    fn mark_processed(&self, request_id: Uuid, expires_at: DateTime<Utc>) {
        let forget_at = expires_at + Duration::seconds(EVICTION_GRACE_SECS);
        self.processed.insert(request_id, forget_at);
    }
}
