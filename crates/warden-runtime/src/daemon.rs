//! The public face of the runtime.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use warden_approval::{ApprovalOutcome, ApprovalWorkflow, VerifierRegistry};
use warden_channels::{
    ChannelEvent, ChannelRouter, NotificationService, NtfyNotifier, TelegramApi, TelegramNotifier,
    TelegramPoller,
};
use warden_config::WardenConfig;
use warden_core::{
    Event, EventBus, Notification, NotificationEvent, PriceOracle, Result, SessionVerifier,
    SignResponse, Transaction, TransactionRequest, TxId, TxStatus, WalletId, WardenError,
};
use warden_store::Store;

use crate::autostop::AutoStop;
use crate::kill_switch::{KillSwitch, KillSwitchInfo};
use crate::pipeline::{AdapterRegistry, Collaborators, Pipeline};
use crate::sweeper::Sweeper;

const CHANNEL_EVENT_CAPACITY: usize = 256;

/// An agent's request as it arrives at the daemon.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub wallet_id: WalletId,
    pub session_token: String,
    pub request: TransactionRequest,
}

/// The synchronous answer to a submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub id: TxId,
    pub status: TxStatus,
}

pub struct DaemonBuilder {
    config: WardenConfig,
    store: Store,
    bus: Option<EventBus>,
    adapters: AdapterRegistry,
    oracle: Option<Arc<dyn PriceOracle>>,
    sessions: Option<Arc<dyn SessionVerifier>>,
    notifications: Option<NotificationService>,
    router: Option<Arc<ChannelRouter>>,
    verifiers: VerifierRegistry,
}

impl DaemonBuilder {
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionVerifier>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn notifications(mut self, notifications: NotificationService) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Use this router instead of building every backend from config.
    pub fn router(mut self, router: Arc<ChannelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn verifiers(mut self, verifiers: VerifierRegistry) -> Self {
        self.verifiers = verifiers;
        self
    }

    pub fn build(self) -> Result<WalletDaemon> {
        let config = self.config;
        let store = self.store;
        let bus = self
            .bus
            .unwrap_or_else(|| EventBus::new(config.daemon.event_capacity));
        let oracle = self
            .oracle
            .ok_or_else(|| WardenError::Config("no price oracle configured".into()))?;
        let sessions = self
            .sessions
            .ok_or_else(|| WardenError::Config("no session verifier configured".into()))?;

        let telegram = TelegramApi::from_config(&config.channels.telegram);
        let notifications = self
            .notifications
            .unwrap_or_else(|| notifications_from_config(&config, telegram.clone()));

        let (channel_tx, channel_rx) = mpsc::channel(CHANNEL_EVENT_CAPACITY);
        let router = match self.router {
            Some(router) => router,
            None => Arc::new(ChannelRouter::from_config(
                &config,
                telegram.clone(),
                channel_tx.clone(),
            )),
        };

        let approvals = Arc::new(ApprovalWorkflow::from_config(
            &config,
            store.clone(),
            router,
            self.verifiers,
            bus.clone(),
        ));
        let kill_switch = Arc::new(KillSwitch::new(
            store.clone(),
            bus.clone(),
            notifications.clone(),
            &config.autostop,
        )?);
        let auto_stop = Arc::new(AutoStop::new(
            kill_switch.clone(),
            bus.clone(),
            notifications.clone(),
            &config.autostop,
        ));
        let pipeline = Arc::new(Pipeline::new(
            &config,
            store.clone(),
            bus.clone(),
            approvals.clone(),
            kill_switch.clone(),
            Collaborators {
                adapters: self.adapters,
                oracle,
                sessions: sessions.clone(),
                notifications: notifications.clone(),
            },
        ));

        Ok(WalletDaemon {
            config,
            store,
            bus,
            pipeline,
            approvals,
            kill_switch,
            auto_stop,
            sessions,
            notifications,
            telegram,
            tracker: TaskTracker::new(),
            channel_tx,
            channel_rx: parking_lot::Mutex::new(Some(channel_rx)),
        })
    }
}

/// Notifiers configured in `warden.toml`: the ntfy topic and the owner's Telegram chat.
pub fn notifications_from_config(config: &WardenConfig, telegram: Option<Arc<TelegramApi>>) -> NotificationService {
    let mut service = NotificationService::new();
    if let Some(ntfy) = NtfyNotifier::from_config(&config.channels.ntfy) {
        service.add(Arc::new(ntfy));
    }
    if let (Some(api), Some(chat_id)) = (telegram, config.channels.telegram.owner_chat_id) {
        service.add(Arc::new(TelegramNotifier::new(api, chat_id)));
    }
    service
}

/// Wallet-as-a-service daemon: accepts requests, runs the pipeline, and
/// exposes the owner and operator controls.
pub struct WalletDaemon {
    config: WardenConfig,
    store: Store,
    bus: EventBus,
    pipeline: Arc<Pipeline>,
    approvals: Arc<ApprovalWorkflow>,
    kill_switch: Arc<KillSwitch>,
    auto_stop: Arc<AutoStop>,
    sessions: Arc<dyn SessionVerifier>,
    notifications: NotificationService,
    telegram: Option<Arc<TelegramApi>>,
    tracker: TaskTracker,
    channel_tx: mpsc::Sender<ChannelEvent>,
    channel_rx: parking_lot::Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
}

impl WalletDaemon {
    pub fn builder(config: WardenConfig, store: Store) -> DaemonBuilder {
        DaemonBuilder {
            config,
            store,
            bus: None,
            adapters: AdapterRegistry::new(),
            oracle: None,
            sessions: None,
            notifications: None,
            router: None,
            verifiers: VerifierRegistry::default(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn approvals(&self) -> &Arc<ApprovalWorkflow> {
        &self.approvals
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    pub fn auto_stop(&self) -> &Arc<AutoStop> {
        &self.auto_stop
    }

    /// Where channel backends deliver responses and admin decisions.
    pub fn channel_sender(&self) -> mpsc::Sender<ChannelEvent> {
        self.channel_tx.clone()
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.store.clone(),
            self.pipeline.clone(),
            self.approvals.clone(),
            self.kill_switch.clone(),
            Duration::from_secs(self.config.sweeper.interval_secs),
            self.config.autostop.auto_recover,
        )
    }

    // ── Agent surface ──────────────────────────────────────────

    /// Run stage 1 and hand the rest of the pipeline to a background task.
    pub fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt> {
        let tx = self
            .pipeline
            .stage1_validate(request.wallet_id, request.request, Utc::now())?;
        let receipt = SubmitReceipt {
            id: tx.id,
            status: tx.status,
        };

        let pipeline = self.pipeline.clone();
        let token = request.session_token;
        self.tracker.spawn(async move {
            if let Err(e) = pipeline.process(tx.id, Some(token)).await {
                debug!(tx_id = %tx.id, error = %e, "pipeline ended with an error");
            }
        });
        Ok(receipt)
    }

    pub fn get_status(&self, tx_id: TxId) -> Result<Transaction> {
        self.store.get_transaction(tx_id)
    }

    /// Cancel a transaction that has not started executing.
    ///
    /// The session must belong to the transaction's wallet. Cancelling a
    /// transaction that already finished returns false.
    pub async fn cancel(&self, tx_id: TxId, session_token: &str) -> Result<bool> {
        let tx = self.store.get_transaction(tx_id)?;
        let session = self
            .sessions
            .verify_session(session_token, tx.wallet_id)
            .await?;

        if tx.status.is_terminal() {
            return Ok(false);
        }
        if tx.delay_seconds.is_some() && tx.status == TxStatus::Queued {
            return self.pipeline.delay_queue().cancel_delay(tx_id, &session);
        }
        if !matches!(tx.status, TxStatus::Pending | TxStatus::Queued) {
            return Err(WardenError::InvalidTransition {
                id: tx_id,
                from: tx.status.to_string(),
                to: TxStatus::Cancelled.to_string(),
            });
        }

        let cancelled = self.store.transition(
            tx_id,
            &[TxStatus::Pending, TxStatus::Queued],
            TxStatus::Cancelled,
        )?;
        if cancelled {
            self.approvals.withdraw(tx_id);
            info!(%tx_id, session_id = %session.session_id, "transaction cancelled");
            self.bus.publish(Event::TransactionCancelled {
                tx_id,
                wallet_id: tx.wallet_id,
            });
            let notification = Notification::new(NotificationEvent::TxCancelled, Some(tx.wallet_id))
                .with_var("tx_id", tx_id);
            if let Err(e) = self.notifications.notify(&notification).await {
                warn!(%tx_id, error = %e, "cancel notification not delivered");
            }
        }
        Ok(cancelled)
    }

    // ── Owner surface ──────────────────────────────────────────

    pub fn approve(&self, tx_id: TxId, signature: Option<&str>) -> Result<ApprovalOutcome> {
        let outcome = self.approvals.approve(tx_id, signature, Utc::now())?;
        self.spawn_resume(outcome);
        Ok(outcome)
    }

    pub fn reject(&self, tx_id: TxId) -> Result<ApprovalOutcome> {
        self.approvals.reject(tx_id, Utc::now())
    }

    pub async fn handle_sign_response(&self, response: &SignResponse) -> Result<ApprovalOutcome> {
        let outcome = self
            .approvals
            .handle_sign_response(response, Utc::now())
            .await?;
        self.spawn_resume(outcome);
        Ok(outcome)
    }

    fn spawn_resume(&self, outcome: ApprovalOutcome) {
        let ApprovalOutcome::Approved { tx_id, .. } = outcome else {
            return;
        };
        let pipeline = self.pipeline.clone();
        self.tracker.spawn(async move {
            if let Err(e) = pipeline.resume(tx_id, Utc::now()).await {
                debug!(%tx_id, error = %e, "approved transaction failed");
            }
        });
    }

    // ── Operator surface ───────────────────────────────────────

    pub async fn activate_kill_switch(&self, by: &str) -> Result<bool> {
        self.kill_switch.activate(by, Utc::now()).await
    }

    pub async fn escalate_kill_switch(&self, by: &str) -> Result<bool> {
        self.kill_switch.escalate(by).await
    }

    pub async fn recover_kill_switch(&self, by: &str) -> Result<bool> {
        self.kill_switch.recover(by, Utc::now()).await
    }

    pub fn kill_switch_state(&self) -> Result<KillSwitchInfo> {
        self.kill_switch.info()
    }

    pub async fn trigger_auto_stop(&self, wallet_id: Option<WalletId>, reason: &str) -> Result<bool> {
        self.auto_stop.trigger(wallet_id, reason, Utc::now()).await
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Wait until every spawned pipeline run has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Restore pending approvals, then run the sweeper, the auto-stop
    /// watcher and the channel event loop until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut channel_rx = self
            .channel_rx
            .lock()
            .take()
            .ok_or_else(|| WardenError::Config("daemon is already running".into()))?;

        let restored = self.approvals.restore(Utc::now()).await?;
        info!(restored, "wallet daemon starting");

        let background = TaskTracker::new();
        background.spawn(self.sweeper().run(shutdown.child_token()));
        background.spawn(
            self.auto_stop
                .clone()
                .run(self.bus.subscribe(), shutdown.child_token()),
        );
        if let Some(api) = self.telegram.clone().filter(|_| self.config.channels.telegram.enabled) {
            let poller = TelegramPoller::new(api, &self.config.channels.telegram);
            background.spawn(poller.run(self.channel_tx.clone(), shutdown.child_token()));
        }
        background.close();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = channel_rx.recv() => {
                    let Some(event) = event else { break };
                    match self.approvals.handle_channel_event(event, Utc::now()).await {
                        Ok(Some(outcome)) => self.spawn_resume(outcome),
                        Ok(None) => {}
                        Err(e) => warn!(code = e.code(), error = %e, "channel event rejected"),
                    }
                }
            }
        }

        info!("wallet daemon shutting down");
        self.bus.publish(Event::Shutdown);
        background.wait().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.approvals.router().shutdown().await;
        *self.channel_rx.lock() = Some(channel_rx);
        info!("wallet daemon stopped");
        Ok(())
    }
}
