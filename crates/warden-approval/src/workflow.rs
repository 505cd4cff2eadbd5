use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_channels::{ChannelEvent, ChannelRouter};
use warden_config::WardenConfig;
use warden_config::schema::ApprovalConfig;
use warden_core::{
    ApprovalMethod, Event, EventBus, Result, SignAction, SignResponse, Tier, Transaction,
    TxId, TxStatus, Wallet, WalletId, WardenError, after_seconds,
};
use warden_store::{PendingApproval, Store, approvals, transactions, wallets};

use crate::owner::OwnerLifecycle;
use crate::sign_request::SignRequestBuilder;
use crate::sign_response::SignResponseHandler;
use crate::verifier::VerifierRegistry;

/// Used when neither the policy nor the config sets an approval timeout.
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Recorded; the transaction stays QUEUED until stage 5 claims it.
    Approved { tx_id: TxId, wallet_id: WalletId },
    /// Recorded and the transaction is CANCELLED.
    Rejected { tx_id: TxId, wallet_id: WalletId },
}

impl ApprovalOutcome {
    pub fn tx_id(&self) -> TxId {
        match self {
            Self::Approved { tx_id, .. } | Self::Rejected { tx_id, .. } => *tx_id,
        }
    }

    pub fn wallet_id(&self) -> WalletId {
        match self {
            Self::Approved { wallet_id, .. } | Self::Rejected { wallet_id, .. } => *wallet_id,
        }
    }
}

/// Holds APPROVAL-tier transactions until the owner decides or the window closes.
pub struct ApprovalWorkflow {
    store: Store,
    router: Arc<ChannelRouter>,
    builder: SignRequestBuilder,
    handler: SignResponseHandler,
    verifiers: VerifierRegistry,
    owners: OwnerLifecycle,
    bus: EventBus,
    config: ApprovalConfig,
}

impl ApprovalWorkflow {
    pub fn new(
        store: Store,
        router: Arc<ChannelRouter>,
        builder: SignRequestBuilder,
        verifiers: VerifierRegistry,
        bus: EventBus,
        config: ApprovalConfig,
    ) -> Self {
        Self {
            handler: SignResponseHandler::new(store.clone(), verifiers.clone()),
            owners: OwnerLifecycle::new(store.clone()),
            store,
            router,
            builder,
            verifiers,
            bus,
            config,
        }
    }

    pub fn from_config(
        config: &WardenConfig,
        store: Store,
        router: Arc<ChannelRouter>,
        verifiers: VerifierRegistry,
        bus: EventBus,
    ) -> Self {
        let builder = SignRequestBuilder::new(
            config.signing.clone(),
            config.channels.ntfy.clone(),
            &config.channels.telegram,
        );
        Self::new(store, router, builder, verifiers, bus, config.approval.clone())
    }

    pub fn handler(&self) -> &SignResponseHandler {
        &self.handler
    }

    pub fn owners(&self) -> &OwnerLifecycle {
        &self.owners
    }

    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.router
    }

    /// Policy timeout, else config, else one hour. Zero counts as unset.
    pub fn resolve_timeout(&self, policy_timeout: Option<u64>) -> u64 {
        policy_timeout
            .filter(|t| *t > 0)
            .or(Some(self.config.timeout_secs).filter(|t| *t > 0))
            .unwrap_or(DEFAULT_APPROVAL_TIMEOUT_SECS)
    }

    // ── Registration ───────────────────────────────────────────

    /// Open an approval slot for `tx`, park it in QUEUED, and ask the owner.
    ///
    /// A delivery failure is logged and leaves the approval pending; the
    /// owner can still decide through [`approve`](Self::approve) and the
    /// slot expires on schedule otherwise.
    pub async fn request_approval(
        &self,
        tx: &Transaction,
        wallet: &Wallet,
        policy_timeout: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval> {
        let timeout = self.resolve_timeout(policy_timeout);
        let approval = PendingApproval {
            id: Uuid::new_v4(),
            tx_id: tx.id,
            required_by: wallet.owner_address.clone().unwrap_or_default(),
            expires_at: after_seconds(now, timeout)?,
            approved_at: None,
            rejected_at: None,
            owner_signature: None,
            approval_channel: None,
            created_at: now,
        };

        self.store.with_immediate(|conn| {
            approvals::insert_approval(conn, &approval)?;
            if !transactions::mark_queued(conn, tx.id, now, None)? {
                return Err(WardenError::InvalidTransition {
                    id: tx.id,
                    from: tx.status.to_string(),
                    to: TxStatus::Queued.to_string(),
                });
            }
            Ok(())
        })?;
        info!(tx_id = %tx.id, wallet_id = %wallet.id, timeout, "approval requested");

        let channel = match self.dispatch(tx, wallet, now).await {
            Ok(method) => method.to_string(),
            Err(e) => {
                warn!(tx_id = %tx.id, error = %e, "approval request not delivered");
                "none".to_string()
            }
        };

        self.bus.publish(Event::ApprovalRequested {
            tx_id: tx.id,
            wallet_id: wallet.id,
            channel,
            expires_at: approval.expires_at,
        });
        Ok(approval)
    }

    async fn dispatch(&self, tx: &Transaction, wallet: &Wallet, now: DateTime<Utc>) -> Result<ApprovalMethod> {
        let routed = self
            .router
            .route(wallet.approval_method, |method| {
                // a channel that refused leaves a request nobody will answer
                for stale in self.handler.forget_tx(tx.id) {
                    self.router.cancel(stale);
                }
                let dispatch = self.builder.build(wallet, tx, Tier::Approval, method, now)?;
                self.handler.register(wallet.id, dispatch.request.clone());
                Ok(dispatch)
            })
            .await;

        match routed {
            Ok((used, _)) => {
                self.store.set_approval_channel(tx.id, used.as_str())?;
                Ok(used)
            }
            Err(e) => {
                for request_id in self.handler.forget_tx(tx.id) {
                    self.router.cancel(request_id);
                }
                Err(e)
            }
        }
    }

    // ── Decisions ──────────────────────────────────────────────

    /// Verify and commit a signed response from the owner's wallet.
    pub async fn handle_sign_response(
        &self,
        response: &SignResponse,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome> {
        let verified = self.handler.verify(response, now)?;
        let request_id = verified.request_id;

        let outcome = self
            .commit(verified.tx_id, verified.action, verified.signature.as_deref(), now)
            .map_err(|e| match e {
                WardenError::ApprovalNotFound(_) => WardenError::SignRequestNotFound(request_id),
                WardenError::ApprovalTimeout(_) => WardenError::SignRequestExpired(request_id),
                WardenError::SignRequestAlreadyProcessed(_) => {
                    self.handler.complete(request_id);
                    WardenError::SignRequestAlreadyProcessed(request_id)
                }
                other => other,
            })?;

        info!(
            tx_id = %verified.tx_id,
            %request_id,
            signer = %verified.signer_address,
            action = ?verified.action,
            "sign response accepted"
        );
        self.settle(outcome, verified.signature.is_some());
        Ok(outcome)
    }

    /// Owner approval by transaction id. A signature, when given, is checked
    /// against the open sign request's message.
    pub fn approve(&self, tx_id: TxId, signature: Option<&str>, now: DateTime<Utc>) -> Result<ApprovalOutcome> {
        let signature = signature.map(str::trim).filter(|s| !s.is_empty());
        let verified = match signature {
            Some(signature) => {
                self.check_direct_signature(tx_id, signature)?;
                true
            }
            None => false,
        };
        let outcome = self.commit(tx_id, SignAction::Approve, signature, now)?;
        info!(%tx_id, verified, "transaction approved");
        self.settle(outcome, verified);
        Ok(outcome)
    }

    pub fn reject(&self, tx_id: TxId, now: DateTime<Utc>) -> Result<ApprovalOutcome> {
        let outcome = self.commit(tx_id, SignAction::Reject, None, now)?;
        info!(%tx_id, "transaction rejected");
        self.settle(outcome, false);
        Ok(outcome)
    }

    /// Route an event from a channel backend. Connection changes yield `None`.
    pub async fn handle_channel_event(
        &self,
        event: ChannelEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<ApprovalOutcome>> {
        match event {
            ChannelEvent::SignResponse { channel, response } => {
                debug!(%channel, request_id = %response.request_id, "sign response received");
                self.handle_sign_response(&response, now).await.map(Some)
            }
            ChannelEvent::Decision {
                channel,
                tx_id,
                action,
                sender,
            } => {
                info!(%channel, %tx_id, %sender, ?action, "admin decision received");
                let outcome = match action {
                    SignAction::Approve => self.approve(tx_id, None, now)?,
                    SignAction::Reject => self.reject(tx_id, now)?,
                };
                Ok(Some(outcome))
            }
            ChannelEvent::Connected(channel) => {
                info!(%channel, "channel connected");
                Ok(None)
            }
            ChannelEvent::Disconnected(channel, reason) => {
                warn!(%channel, reason = reason.as_deref().unwrap_or("unknown"), "channel disconnected");
                Ok(None)
            }
        }
    }

    /// Record the decision. First writer wins; the approval row and the
    /// transaction move in one unit of work.
    fn commit(
        &self,
        tx_id: TxId,
        action: SignAction,
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome> {
        self.store.with_immediate(|conn| {
            let approval =
                approvals::approval_for_tx(conn, tx_id)?.ok_or(WardenError::ApprovalNotFound(tx_id))?;
            if approval.is_decided() {
                return Err(WardenError::SignRequestAlreadyProcessed(tx_id));
            }
            let tx = transactions::get_transaction(conn, tx_id)?.ok_or(WardenError::TxNotFound(tx_id))?;
            match tx.status {
                TxStatus::Queued => {}
                TxStatus::Expired => return Err(WardenError::ApprovalTimeout(tx_id)),
                _ => return Err(WardenError::SignRequestAlreadyProcessed(tx_id)),
            }

            match action {
                SignAction::Approve => {
                    if approval.expires_at <= now {
                        return Err(WardenError::ApprovalTimeout(tx_id));
                    }
                    if !approvals::record_approval(conn, tx_id, signature, now)? {
                        return Err(WardenError::SignRequestAlreadyProcessed(tx_id));
                    }
                    Ok(ApprovalOutcome::Approved {
                        tx_id,
                        wallet_id: tx.wallet_id,
                    })
                }
                SignAction::Reject => {
                    if !approvals::record_rejection(conn, tx_id, signature, now)? {
                        return Err(WardenError::SignRequestAlreadyProcessed(tx_id));
                    }
                    transactions::transition(conn, tx_id, &[TxStatus::Queued], TxStatus::Cancelled)?;
                    Ok(ApprovalOutcome::Rejected {
                        tx_id,
                        wallet_id: tx.wallet_id,
                    })
                }
            }
        })
    }

    fn check_direct_signature(&self, tx_id: TxId, signature: &str) -> Result<()> {
        let request = self
            .handler
            .request_for_tx(tx_id)
            .ok_or_else(|| WardenError::InvalidSignature(format!("no open sign request for {tx_id}")))?;
        let tx = self.store.get_transaction(tx_id)?;
        let wallet = self.store.get_wallet(tx.wallet_id)?;
        let owner = wallet
            .owner_address
            .ok_or(WardenError::OwnerNotSet(wallet.id))?;
        self.verifiers
            .check(&request.chain, &owner, &request.message, signature)
    }

    /// Close open requests, publish events, and advance the owner lifecycle
    /// when the decision was signed.
    fn settle(&self, outcome: ApprovalOutcome, signed: bool) {
        let tx_id = outcome.tx_id();
        let wallet_id = outcome.wallet_id();
        for request_id in self.handler.forget_tx(tx_id) {
            self.router.cancel(request_id);
        }
        if signed {
            if let Err(e) = self.owners.mark_verified(wallet_id) {
                warn!(%wallet_id, error = %e, "owner verification not recorded");
            }
        }
        match outcome {
            ApprovalOutcome::Approved { .. } => {
                self.bus.publish(Event::ApprovalGranted { tx_id, wallet_id });
            }
            ApprovalOutcome::Rejected { .. } => {
                self.bus.publish(Event::ApprovalRejected { tx_id, wallet_id });
                self.bus.publish(Event::TransactionCancelled { tx_id, wallet_id });
            }
        }
    }

    // ── Maintenance ────────────────────────────────────────────

    /// QUEUED → EXPIRED for every undecided approval past its deadline.
    pub fn process_expired(&self, now: DateTime<Utc>) -> Result<Vec<TxId>> {
        let overdue = self.store.overdue_approvals(now)?;
        let mut expired = Vec::new();
        for approval in overdue {
            let tx_id = approval.tx_id;
            let moved = self.store.with_immediate(|conn| {
                let Some(tx) = transactions::get_transaction(conn, tx_id)? else {
                    return Ok(None);
                };
                let moved = transactions::transition(conn, tx_id, &[TxStatus::Queued], TxStatus::Expired)?;
                Ok(moved.then_some(tx.wallet_id))
            })?;
            let Some(wallet_id) = moved else { continue };

            for request_id in self.handler.forget_tx(tx_id) {
                self.router.cancel(request_id);
            }
            info!(%tx_id, %wallet_id, "approval expired");
            self.bus.publish(Event::ApprovalExpired { tx_id, wallet_id });
            self.bus.publish(Event::TransactionExpired { tx_id, wallet_id });
            expired.push(tx_id);
        }
        Ok(expired)
    }

    /// Re-dispatch undecided approvals after a restart. Only slots with time
    /// left and no open request in this process are sent again.
    pub async fn restore(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut restored = 0;
        for approval in self.store.undecided_approvals()? {
            if approval.expires_at <= now || self.handler.request_for_tx(approval.tx_id).is_some() {
                continue;
            }
            let (tx, wallet) = {
                let conn = self.store.conn();
                let Some(tx) = transactions::get_transaction(&conn, approval.tx_id)? else {
                    continue;
                };
                let Some(wallet) = wallets::get_wallet(&conn, tx.wallet_id)? else {
                    continue;
                };
                (tx, wallet)
            };
            match self.dispatch(&tx, &wallet, now).await {
                Ok(method) => {
                    debug!(tx_id = %tx.id, %method, "approval request restored");
                    restored += 1;
                }
                Err(e) => warn!(tx_id = %tx.id, error = %e, "approval request not restored"),
            }
        }
        if restored > 0 {
            info!(restored, "pending approvals restored");
        }
        Ok(restored)
    }

    /// Stop waiting on the owner for `tx_id` after it left QUEUED some other
    /// way (cancelled by its session, failed). Returns how many requests closed.
    pub fn withdraw(&self, tx_id: TxId) -> usize {
        let closed = self.handler.forget_tx(tx_id);
        for request_id in &closed {
            self.router.cancel(*request_id);
        }
        if !closed.is_empty() {
            debug!(%tx_id, closed = closed.len(), "sign requests withdrawn");
        }
        closed.len()
    }

    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        self.handler.evict_expired(now)
    }
}
