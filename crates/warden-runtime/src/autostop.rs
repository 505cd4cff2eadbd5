//! Anomaly rules that suspend execution on their own.
//!
//! The watcher reads domain events off the bus. When a rule fires it
//! activates the kill switch and broadcasts to every notifier.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_channels::NotificationService;
use warden_config::schema::AutoStopConfig;
use warden_core::{Event, EventBus, Notification, NotificationEvent, Result, WalletId};

use crate::kill_switch::{AUTOSTOP_ACTOR_PREFIX, KillSwitch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoStopRule {
    ConsecutiveFailures,
    UnusualActivity,
    Manual,
}

impl AutoStopRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConsecutiveFailures => "consecutive_failures",
            Self::UnusualActivity => "unusual_activity",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for AutoStopRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoStopTrigger {
    pub rule: AutoStopRule,
    pub wallet_id: Option<WalletId>,
    pub reason: String,
}

/// Failures in a row per wallet. A confirmation resets the count.
#[derive(Debug)]
pub struct ConsecutiveFailuresRule {
    threshold: u32,
    counts: HashMap<WalletId, u32>,
}

impl ConsecutiveFailuresRule {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counts: HashMap::new(),
        }
    }

    /// Count a failure. Returns true once the threshold is reached.
    pub fn on_failure(&mut self, wallet_id: WalletId) -> bool {
        let count = self.counts.entry(wallet_id).or_insert(0);
        *count += 1;
        *count >= self.threshold
    }

    pub fn on_success(&mut self, wallet_id: WalletId) {
        self.counts.remove(&wallet_id);
    }

    pub fn reset(&mut self, wallet_id: WalletId) {
        self.counts.remove(&wallet_id);
    }

    pub fn count(&self, wallet_id: WalletId) -> u32 {
        self.counts.get(&wallet_id).copied().unwrap_or(0)
    }
}

/// Requests per wallet inside a rolling window.
#[derive(Debug)]
pub struct UnusualActivityRule {
    threshold: u32,
    window: Duration,
    seen: HashMap<WalletId, VecDeque<DateTime<Utc>>>,
}

impl UnusualActivityRule {
    pub fn new(threshold: u32, window_secs: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            window: Duration::seconds(window_secs as i64),
            seen: HashMap::new(),
        }
    }

    /// Record a request at `at`. Returns true when the window holds at least
    /// `threshold` requests, this one included.
    pub fn on_request(&mut self, wallet_id: WalletId, at: DateTime<Utc>) -> bool {
        let cutoff = at - self.window;
        let seen = self.seen.entry(wallet_id).or_default();
        while seen.front().is_some_and(|t| *t <= cutoff) {
            seen.pop_front();
        }
        seen.push_back(at);
        seen.len() >= self.threshold as usize
    }

    pub fn reset(&mut self, wallet_id: WalletId) {
        self.seen.remove(&wallet_id);
    }
}

pub struct AutoStop {
    kill_switch: Arc<KillSwitch>,
    bus: EventBus,
    notifications: NotificationService,
    enabled: bool,
    failures: Mutex<ConsecutiveFailuresRule>,
    activity: Mutex<UnusualActivityRule>,
}

impl AutoStop {
    pub fn new(
        kill_switch: Arc<KillSwitch>,
        bus: EventBus,
        notifications: NotificationService,
        config: &AutoStopConfig,
    ) -> Self {
        Self {
            kill_switch,
            bus,
            notifications,
            enabled: config.enabled,
            failures: Mutex::new(ConsecutiveFailuresRule::new(
                config.consecutive_failures_threshold,
            )),
            activity: Mutex::new(UnusualActivityRule::new(
                config.unusual_activity_threshold,
                config.unusual_activity_window_secs,
            )),
        }
    }

    pub fn failure_count(&self, wallet_id: WalletId) -> u32 {
        self.failures.lock().count(wallet_id)
    }

    /// Feed one event through the rules and act on a trigger.
    pub async fn observe(&self, event: &Event, now: DateTime<Utc>) -> Result<Option<AutoStopTrigger>> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(trigger) = self.evaluate(event, now) else {
            return Ok(None);
        };
        self.fire(&trigger, now).await?;
        Ok(Some(trigger))
    }

    /// Operator-initiated stop. Returns whether the switch moved.
    pub async fn trigger(
        &self,
        wallet_id: Option<WalletId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let trigger = AutoStopTrigger {
            rule: AutoStopRule::Manual,
            wallet_id,
            reason: reason.to_string(),
        };
        self.fire(&trigger, now).await
    }

    /// Watch the bus until `shutdown` fires or the bus closes.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<Event>, shutdown: CancellationToken) {
        info!(enabled = self.enabled, "auto-stop watcher started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        if let Err(e) = self.observe(&event, Utc::now()).await {
                            warn!(error = %e, "auto-stop rule evaluation failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auto-stop watcher lagged behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("auto-stop watcher stopped");
    }

    fn evaluate(&self, event: &Event, now: DateTime<Utc>) -> Option<AutoStopTrigger> {
        match event {
            Event::TransactionFailed { wallet_id, .. } => {
                let mut failures = self.failures.lock();
                if !failures.on_failure(*wallet_id) {
                    return None;
                }
                let count = failures.count(*wallet_id);
                failures.reset(*wallet_id);
                Some(AutoStopTrigger {
                    rule: AutoStopRule::ConsecutiveFailures,
                    wallet_id: Some(*wallet_id),
                    reason: format!("{count} consecutive failed transactions"),
                })
            }
            Event::TransactionConfirmed { wallet_id, .. } => {
                self.failures.lock().on_success(*wallet_id);
                None
            }
            Event::TransactionRequested { wallet_id, .. } => {
                let mut activity = self.activity.lock();
                if !activity.on_request(*wallet_id, now) {
                    return None;
                }
                activity.reset(*wallet_id);
                Some(AutoStopTrigger {
                    rule: AutoStopRule::UnusualActivity,
                    wallet_id: Some(*wallet_id),
                    reason: "unusual request rate".to_string(),
                })
            }
            _ => None,
        }
    }

    async fn fire(&self, trigger: &AutoStopTrigger, now: DateTime<Utc>) -> Result<bool> {
        let by = match trigger.rule {
            AutoStopRule::Manual => "manual".to_string(),
            rule => format!("{AUTOSTOP_ACTOR_PREFIX}{rule}"),
        };
        let activated = self.kill_switch.activate(&by, now).await?;
        warn!(
            rule = trigger.rule.as_str(),
            wallet_id = ?trigger.wallet_id,
            reason = %trigger.reason,
            activated,
            "auto-stop triggered"
        );
        self.bus.publish(Event::AutoStopTriggered {
            rule: trigger.rule.as_str().to_string(),
            wallet_id: trigger.wallet_id,
            reason: trigger.reason.clone(),
        });

        let notification = Notification::new(NotificationEvent::AutoStopTriggered, trigger.wallet_id)
            .with_body(format!("Auto-stop: {}", trigger.reason))
            .with_var("rule", trigger.rule);
        if let Err(e) = self.notifications.notify(&notification).await {
            warn!(error = %e, "auto-stop notification not delivered");
        }
        Ok(activated)
    }
}
