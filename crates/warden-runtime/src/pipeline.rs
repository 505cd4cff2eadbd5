//! The six-stage transaction pipeline.
//!
//! Stage 1 runs on the caller's task and returns the PENDING row. Stages
//! 2-6 run later on a tracked task. DELAY and APPROVAL stop the run at
//! stage 4 with [`StageOutcome::Halted`]; the sweeper or an approval
//! callback re-enters at stage 5 through [`Pipeline::resume`].
//!
//! Any error from stages 2-6 marks the row FAILED unless it already reached
//! a terminal status. A halt is never a failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use warden_approval::{ApprovalWorkflow, downgrade_if_no_owner};
use warden_channels::NotificationService;
use warden_config::WardenConfig;
use warden_core::adapter::{BuildRequest, ConfirmationStatus};
use warden_core::network::resolve_network;
use warden_core::{
    Chain, ChainAdapter, Event, EventBus, KillSwitchState, Notification, NotificationEvent,
    PriceOracle, PriceResult, Result, SessionVerifier, Tier, Transaction, TransactionRequest,
    TxId, TxStatus, Wallet, WalletId, WardenError,
};
use warden_policy::{PolicyDecision, PolicyEngine};
use warden_store::{Store, transactions};

use crate::delay_queue::DelayQueue;
use crate::kill_switch::KillSwitch;
use crate::usd::resolve_effective_amount_usd;

/// Extra time allowed past the adapter's own confirmation timeout.
const CONFIRMATION_GRACE: Duration = Duration::from_secs(5);

/// Why a run stopped without finishing. None of these are failures.
#[derive(Debug, Clone, PartialEq)]
pub enum HaltReason {
    Delayed { release_at: DateTime<Utc> },
    AwaitingApproval { expires_at: DateTime<Utc> },
    KillSwitch(KillSwitchState),
    /// Another run holds the row, or it already finished.
    NotRunnable(TxStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Continue,
    Halted(HaltReason),
}

/// Chain adapters keyed by chain.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.adapters.insert(adapter.chain(), adapter);
        self
    }

    pub fn get(&self, chain: Chain) -> Result<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(&chain)
            .cloned()
            .ok_or_else(|| WardenError::Chain(format!("no adapter registered for {chain}")))
    }

    pub fn chains(&self) -> Vec<Chain> {
        self.adapters.keys().copied().collect()
    }
}

/// External collaborators the pipeline calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub adapters: AdapterRegistry,
    pub oracle: Arc<dyn PriceOracle>,
    pub sessions: Arc<dyn SessionVerifier>,
    pub notifications: NotificationService,
}

/// Shared state for one run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub tx: Transaction,
    pub wallet: Wallet,
    pub session_token: Option<String>,
}

pub struct Pipeline {
    store: Store,
    bus: EventBus,
    policy: PolicyEngine,
    approvals: Arc<ApprovalWorkflow>,
    delay_queue: DelayQueue,
    kill_switch: Arc<KillSwitch>,
    collaborators: Collaborators,
    confirmation_timeout: Duration,
    downgrade_without_owner: bool,
}

impl Pipeline {
    pub fn new(
        config: &WardenConfig,
        store: Store,
        bus: EventBus,
        approvals: Arc<ApprovalWorkflow>,
        kill_switch: Arc<KillSwitch>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            policy: PolicyEngine::new(store.clone(), &config.policy),
            delay_queue: DelayQueue::new(store.clone(), bus.clone()),
            store,
            bus,
            approvals,
            kill_switch,
            collaborators,
            confirmation_timeout: Duration::from_secs(config.pipeline.confirmation_timeout_secs),
            downgrade_without_owner: config.policy.downgrade_approval_without_owner,
        }
    }

    pub fn delay_queue(&self) -> &DelayQueue {
        &self.delay_queue
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    // ── Stage 1 ────────────────────────────────────────────────

    /// Validate, resolve the network, and persist a PENDING row.
    ///
    /// Errors here reach the caller and nothing is stored.
    pub fn stage1_validate(
        &self,
        wallet_id: WalletId,
        request: TransactionRequest,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        request.validate()?;
        let wallet = self.store.get_wallet(wallet_id)?;
        let network = resolve_network(
            request.network(),
            wallet.default_network.as_deref(),
            wallet.environment,
            wallet.chain,
        )?;
        let tx = Transaction::pending(wallet_id, None, network, request, now);
        self.store.insert_transaction(&tx)?;
        info!(tx_id = %tx.id, %wallet_id, tx_type = %tx.tx_type, network = %tx.network, "transaction requested");
        self.bus.publish(Event::TransactionRequested {
            tx_id: tx.id,
            wallet_id,
            tx_type: tx.tx_type,
        });
        Ok(tx)
    }

    // ── Entry points ───────────────────────────────────────────

    /// Run stages 2-6 for a freshly persisted transaction.
    pub async fn process(&self, tx_id: TxId, session_token: Option<String>) -> Result<StageOutcome> {
        let run = async {
            let mut ctx = self.load(tx_id, session_token)?;
            self.stage2_auth(&mut ctx).await?;
            let decision = self.stage3_policy(&mut ctx).await?;
            if let StageOutcome::Halted(reason) = self.stage4_wait(&mut ctx, decision).await? {
                return Ok(StageOutcome::Halted(reason));
            }
            self.execute(&mut ctx).await
        };
        self.guarded(tx_id, run.await).await
    }

    /// Re-enter at stage 5 for a released delay or an approved transaction.
    pub async fn resume(&self, tx_id: TxId, now: DateTime<Utc>) -> Result<StageOutcome> {
        let run = async {
            let mut ctx = self.load(tx_id, None)?;
            if let Some(reason) = self.resume_gate(&ctx.tx, now)? {
                return Ok(StageOutcome::Halted(reason));
            }
            self.execute(&mut ctx).await
        };
        self.guarded(tx_id, run.await).await
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<StageOutcome> {
        if let StageOutcome::Halted(reason) = self.stage5_execute(ctx).await? {
            return Ok(StageOutcome::Halted(reason));
        }
        self.stage6_confirm(ctx).await
    }

    fn load(&self, tx_id: TxId, session_token: Option<String>) -> Result<PipelineContext> {
        let tx = self.store.get_transaction(tx_id)?;
        let wallet = self.store.get_wallet(tx.wallet_id)?;
        Ok(PipelineContext {
            tx,
            wallet,
            session_token,
        })
    }

    /// Only a QUEUED row whose wait is over may re-enter.
    fn resume_gate(&self, tx: &Transaction, now: DateTime<Utc>) -> Result<Option<HaltReason>> {
        if tx.status != TxStatus::Queued {
            return Ok(Some(HaltReason::NotRunnable(tx.status)));
        }
        if tx.tier == Some(Tier::Approval) {
            let approval = self.store.approval_for_tx(tx.id)?;
            return Ok(match approval {
                Some(a) if a.approved_at.is_some() => None,
                Some(a) => Some(HaltReason::AwaitingApproval {
                    expires_at: a.expires_at,
                }),
                None => Some(HaltReason::NotRunnable(tx.status)),
            });
        }
        Ok(DelayQueue::release_at(tx)
            .filter(|at| *at > now)
            .map(|release_at| HaltReason::Delayed { release_at }))
    }

    async fn guarded(&self, tx_id: TxId, result: Result<StageOutcome>) -> Result<StageOutcome> {
        match result {
            Ok(outcome) => {
                if let StageOutcome::Halted(reason) = &outcome {
                    debug!(%tx_id, ?reason, "pipeline halted");
                }
                Ok(outcome)
            }
            Err(e) => {
                self.fail(tx_id, &e).await;
                Err(e)
            }
        }
    }

    async fn fail(&self, tx_id: TxId, cause: &WardenError) {
        let message = format!("{}: {cause}", cause.code());
        match self.store.mark_failed(tx_id, &message) {
            Ok(true) => {}
            Ok(false) => {
                debug!(%tx_id, error = %cause, "run ended after the transaction was resolved");
                return;
            }
            Err(e) => {
                error!(%tx_id, error = %e, "could not record transaction failure");
                return;
            }
        }
        warn!(%tx_id, error = %message, "transaction failed");
        let Ok(tx) = self.store.get_transaction(tx_id) else {
            return;
        };
        self.approvals.withdraw(tx_id);
        self.bus.publish(Event::TransactionFailed {
            tx_id,
            wallet_id: tx.wallet_id,
            error: message.clone(),
        });
        self.notify(
            Notification::new(NotificationEvent::TxFailed, Some(tx.wallet_id))
                .with_body(format!("Transaction {tx_id} failed"))
                .with_var("tx_id", tx_id)
                .with_var("error", &message),
        )
        .await;
    }

    // ── Stage 2 ────────────────────────────────────────────────

    async fn stage2_auth(&self, ctx: &mut PipelineContext) -> Result<()> {
        let token = ctx
            .session_token
            .as_deref()
            .ok_or_else(|| WardenError::Unauthorized("missing session token".into()))?;
        let session = self
            .collaborators
            .sessions
            .verify_session(token, ctx.wallet.id)
            .await?;
        self.store.set_session(ctx.tx.id, session.session_id)?;
        ctx.tx.session_id = Some(session.session_id);
        debug!(tx_id = %ctx.tx.id, session_id = %session.session_id, "session verified");
        Ok(())
    }

    // ── Stage 3 ────────────────────────────────────────────────

    async fn stage3_policy(&self, ctx: &mut PipelineContext) -> Result<PolicyDecision> {
        let price = resolve_effective_amount_usd(
            self.collaborators.oracle.as_ref(),
            ctx.wallet.chain,
            &ctx.tx.network,
            &ctx.tx.request,
        )
        .await;
        match &price {
            PriceResult::Success { is_stale: true, .. } => {
                debug!(tx_id = %ctx.tx.id, "usd value uses a stale price");
            }
            PriceResult::Success { .. } => {}
            PriceResult::OracleDown => {
                warn!(tx_id = %ctx.tx.id, "usd value unavailable, oracle down");
            }
            PriceResult::NotListed {
                token_address,
                failed_count,
                ..
            } => {
                info!(tx_id = %ctx.tx.id, %token_address, failed_count, "usd value unavailable, token not listed");
            }
        }

        let usd = price.usd_amount();
        let decision = self.policy.evaluate_and_reserve(&ctx.tx, usd, Utc::now())?;
        if !decision.allowed {
            return Err(WardenError::PolicyDenied(
                decision.reason.unwrap_or_else(|| "denied".into()),
            ));
        }
        ctx.tx.tier = Some(decision.tier);
        ctx.tx.amount_usd = usd;
        info!(tx_id = %ctx.tx.id, tier = %decision.tier, usd = ?usd, "policy evaluated");
        self.bus.publish(Event::TransactionTiered {
            tx_id: ctx.tx.id,
            wallet_id: ctx.wallet.id,
            tier: decision.tier,
        });

        if let Some(warning) = &decision.cumulative_warning {
            self.bus.publish(Event::CumulativeLimitWarning {
                wallet_id: ctx.wallet.id,
                window: warning.window.as_str().to_string(),
                ratio: warning.ratio,
            });
            self.notify(
                Notification::new(NotificationEvent::CumulativeLimitWarning, Some(ctx.wallet.id))
                    .with_body(format!(
                        "{} spend at {:.0}% of limit",
                        warning.window.as_str(),
                        warning.ratio * 100.0
                    ))
                    .with_var("spent_usd", format!("{:.2}", warning.spent))
                    .with_var("limit_usd", format!("{:.2}", warning.limit)),
            )
            .await;
        }
        Ok(decision)
    }

    // ── Stage 4 ────────────────────────────────────────────────

    async fn stage4_wait(
        &self,
        ctx: &mut PipelineContext,
        mut decision: PolicyDecision,
    ) -> Result<StageOutcome> {
        let now = Utc::now();
        if self.downgrade_without_owner {
            let (_, downgraded) = downgrade_if_no_owner(decision.tier, ctx.wallet.owner_state());
            if downgraded {
                decision.downgrade_to_delay();
                self.store.set_tier(ctx.tx.id, decision.tier)?;
                ctx.tx.tier = Some(decision.tier);
                info!(tx_id = %ctx.tx.id, "approval downgraded to delay, wallet has no owner");
            }
        }

        match decision.tier {
            Tier::Instant => Ok(StageOutcome::Continue),
            Tier::Notify => {
                self.notify(
                    Notification::new(NotificationEvent::TxNotify, Some(ctx.wallet.id))
                        .with_body(format!("Transaction {} is executing", ctx.tx.id))
                        .with_var("tx_id", ctx.tx.id)
                        .with_var("amount", &ctx.tx.amount),
                )
                .await;
                Ok(StageOutcome::Continue)
            }
            Tier::Delay => {
                let delay = decision.delay_seconds.unwrap_or(0);
                let release_at = self.delay_queue.queue_delay(&ctx.tx, delay, now)?;
                self.notify(
                    Notification::new(NotificationEvent::TxQueued, Some(ctx.wallet.id))
                        .with_body(format!("Transaction {} is delayed", ctx.tx.id))
                        .with_var("tx_id", ctx.tx.id)
                        .with_var("release_at", release_at.to_rfc3339()),
                )
                .await;
                Ok(StageOutcome::Halted(HaltReason::Delayed { release_at }))
            }
            Tier::Approval => {
                let approval = self
                    .approvals
                    .request_approval(&ctx.tx, &ctx.wallet, decision.approval_timeout, now)
                    .await?;
                self.bus.publish(Event::TransactionQueued {
                    tx_id: ctx.tx.id,
                    wallet_id: ctx.wallet.id,
                    tier: Tier::Approval,
                });
                self.notify(
                    Notification::new(NotificationEvent::TxApprovalRequired, Some(ctx.wallet.id))
                        .with_body(format!("Transaction {} needs owner approval", ctx.tx.id))
                        .with_var("tx_id", ctx.tx.id)
                        .with_var("expires_at", approval.expires_at.to_rfc3339()),
                )
                .await;
                Ok(StageOutcome::Halted(HaltReason::AwaitingApproval {
                    expires_at: approval.expires_at,
                }))
            }
        }
    }

    // ── Stage 5 ────────────────────────────────────────────────

    async fn stage5_execute(&self, ctx: &mut PipelineContext) -> Result<StageOutcome> {
        let tx_id = ctx.tx.id;
        let state = self.kill_switch.state()?;
        if state != KillSwitchState::Active {
            self.park(tx_id)?;
            warn!(%tx_id, %state, "kill switch engaged, execution halted");
            return Ok(StageOutcome::Halted(HaltReason::KillSwitch(state)));
        }

        if !self.store.claim_for_execution(tx_id)? {
            let status = self.store.get_transaction(tx_id)?.status;
            debug!(%tx_id, %status, "transaction not claimable");
            return Ok(StageOutcome::Halted(HaltReason::NotRunnable(status)));
        }
        ctx.tx.status = TxStatus::Executing;

        let adapter = self.collaborators.adapters.get(ctx.wallet.chain)?;
        let unsigned = adapter
            .build_transaction(&BuildRequest {
                from: ctx.wallet.public_key.clone(),
                network: ctx.tx.network.clone(),
                request: ctx.tx.request.clone(),
            })
            .await?;
        let simulation = adapter.simulate_transaction(&unsigned).await?;
        if !simulation.success {
            return Err(WardenError::SimulationFailed(
                simulation.error.unwrap_or_else(|| "simulation rejected the transaction".into()),
            ));
        }
        let signed = adapter.sign_transaction(&unsigned, &ctx.wallet).await?;
        let submitted = adapter.submit_transaction(&signed).await?;

        if !self.store.mark_submitted(tx_id, &submitted.tx_hash)? {
            return Err(WardenError::InvalidTransition {
                id: tx_id,
                from: ctx.tx.status.to_string(),
                to: TxStatus::Submitted.to_string(),
            });
        }
        ctx.tx.status = TxStatus::Submitted;
        ctx.tx.tx_hash = Some(submitted.tx_hash.clone());
        info!(%tx_id, tx_hash = %submitted.tx_hash, "transaction submitted");
        self.bus.publish(Event::TransactionSubmitted {
            tx_id,
            wallet_id: ctx.wallet.id,
            tx_hash: submitted.tx_hash,
        });
        Ok(StageOutcome::Continue)
    }

    /// PENDING rows halted by the kill switch become QUEUED with no delay so
    /// the sweeper picks them up once the switch recovers.
    fn park(&self, tx_id: TxId) -> Result<()> {
        self.store.with_immediate(|conn| {
            let Some(tx) = transactions::get_transaction(conn, tx_id)? else {
                return Err(WardenError::TxNotFound(tx_id));
            };
            if tx.status == TxStatus::Pending {
                transactions::mark_queued(conn, tx_id, Utc::now(), Some(0))?;
            }
            Ok(())
        })
    }

    // ── Stage 6 ────────────────────────────────────────────────

    async fn stage6_confirm(&self, ctx: &mut PipelineContext) -> Result<StageOutcome> {
        let tx_id = ctx.tx.id;
        let Some(tx_hash) = ctx.tx.tx_hash.clone() else {
            return Ok(StageOutcome::Continue);
        };
        let adapter = self.collaborators.adapters.get(ctx.wallet.chain)?;
        let waited = tokio::time::timeout(
            self.confirmation_timeout + CONFIRMATION_GRACE,
            adapter.wait_for_confirmation(&tx_hash, self.confirmation_timeout),
        )
        .await;

        let result = match waited {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(%tx_id, error = %e, "confirmation check failed, left SUBMITTED");
                return Ok(StageOutcome::Continue);
            }
            Err(_) => {
                info!(%tx_id, "confirmation timed out, left SUBMITTED");
                return Ok(StageOutcome::Continue);
            }
        };

        match result.status {
            ConfirmationStatus::Confirmed => {
                if self.store.mark_confirmed(tx_id, Utc::now())? {
                    ctx.tx.status = TxStatus::Confirmed;
                    info!(%tx_id, confirmations = result.confirmations, "transaction confirmed");
                    self.bus.publish(Event::TransactionConfirmed {
                        tx_id,
                        wallet_id: ctx.wallet.id,
                    });
                    self.notify(
                        Notification::new(NotificationEvent::TxConfirmed, Some(ctx.wallet.id))
                            .with_var("tx_id", tx_id)
                            .with_var("tx_hash", &tx_hash),
                    )
                    .await;
                }
                Ok(StageOutcome::Continue)
            }
            ConfirmationStatus::Failed => Err(WardenError::Chain(format!(
                "transaction {tx_hash} failed on chain"
            ))),
            ConfirmationStatus::Pending => {
                info!(%tx_id, "not final yet, left SUBMITTED");
                Ok(StageOutcome::Continue)
            }
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.collaborators.notifications.notify(&notification).await {
            warn!(event = notification.event.as_str(), error = %e, "notification not delivered");
        }
    }
}
