//! The global execution halt.
//!
//! State lives in the key/value table so it survives restarts. Every
//! transition is a compare-and-set on the stored state inside one IMMEDIATE
//! transaction, together with its bookkeeping keys and audit entry.
//!
//! ```text
//!   ACTIVE ──activate──▶ SUSPENDED ──escalate──▶ LOCKED
//!     ▲                      │                     │
//!     └──────recover─────────┴──────recover────────┘
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use tracing::{info, warn};

use warden_channels::NotificationService;
use warden_config::schema::AutoStopConfig;
use warden_core::{
    Event, EventBus, KillSwitchState, Notification, NotificationEvent, Result, WardenError,
};
use warden_store::{Store, store};

pub const STATE_KEY: &str = "kill_switch_state";
pub const ACTIVATED_AT_KEY: &str = "kill_switch_activated_at";
pub const ACTIVATED_BY_KEY: &str = "kill_switch_activated_by";
pub const RECOVERY_ATTEMPTS_KEY: &str = "kill_switch_recovery_attempts";

/// Prefix of `activated_by` for activations made by auto-stop rules.
pub const AUTOSTOP_ACTOR_PREFIX: &str = "autostop:";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KillSwitchInfo {
    pub state: KillSwitchState,
    pub activated_at: Option<DateTime<Utc>>,
    pub activated_by: Option<String>,
    /// Recoveries from SUSPENDED since the last recovery from LOCKED.
    pub recovery_attempts: u32,
}

pub struct KillSwitch {
    store: Store,
    bus: EventBus,
    notifications: NotificationService,
    cooldown: Duration,
    max_recovery_attempts: u32,
}

impl KillSwitch {
    /// Build the service and seed ACTIVE if no state was ever stored.
    pub fn new(
        store: Store,
        bus: EventBus,
        notifications: NotificationService,
        config: &AutoStopConfig,
    ) -> Result<Self> {
        let switch = Self {
            store,
            bus,
            notifications,
            cooldown: Duration::seconds(config.cooldown_secs as i64),
            max_recovery_attempts: config.max_recovery_attempts,
        };
        switch.ensure_initialized()?;
        Ok(switch)
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self
            .store
            .kv_insert_if_absent(STATE_KEY, KillSwitchState::Active.as_str())?
        {
            info!("kill switch initialized to ACTIVE");
        }
        Ok(())
    }

    pub fn state(&self) -> Result<KillSwitchState> {
        match self.store.kv_get(STATE_KEY)? {
            Some(raw) => raw.parse(),
            None => Ok(KillSwitchState::Active),
        }
    }

    pub fn info(&self) -> Result<KillSwitchInfo> {
        let conn = self.store.conn();
        let state = match store::kv_get(&conn, STATE_KEY)? {
            Some(raw) => raw.parse()?,
            None => KillSwitchState::Active,
        };
        let activated_at = store::kv_get(&conn, ACTIVATED_AT_KEY)?
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        let activated_by = store::kv_get(&conn, ACTIVATED_BY_KEY)?;
        let recovery_attempts = store::kv_get(&conn, RECOVERY_ATTEMPTS_KEY)?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        Ok(KillSwitchInfo {
            state,
            activated_at,
            activated_by,
            recovery_attempts,
        })
    }

    pub fn is_active(&self) -> Result<bool> {
        Ok(self.state()? == KillSwitchState::Active)
    }

    /// `KillSwitchEngaged` unless the switch is ACTIVE.
    pub fn ensure_active(&self) -> Result<()> {
        match self.state()? {
            KillSwitchState::Active => Ok(()),
            other => Err(WardenError::KillSwitchEngaged(other.to_string())),
        }
    }

    /// ACTIVE → SUSPENDED. Returns false when the switch was not ACTIVE.
    ///
    /// In-flight transactions are left alone; stage 5 keeps them QUEUED.
    pub async fn activate(&self, by: &str, now: DateTime<Utc>) -> Result<bool> {
        let moved = self.store.with_immediate(|conn| {
            if !store::kv_compare_and_set(
                conn,
                STATE_KEY,
                KillSwitchState::Active.as_str(),
                KillSwitchState::Suspended.as_str(),
            )? {
                return Ok(false);
            }
            store::kv_set(conn, ACTIVATED_AT_KEY, &now.timestamp().to_string())?;
            store::kv_set(conn, ACTIVATED_BY_KEY, by)?;
            store::audit(conn, "KILL_SWITCH_ACTIVATED", by, Some("ACTIVE -> SUSPENDED"))?;
            Ok(true)
        })?;
        if moved {
            self.announce(
                KillSwitchState::Active,
                KillSwitchState::Suspended,
                by,
                NotificationEvent::KillSwitchActivated,
            )
            .await;
        }
        Ok(moved)
    }

    /// SUSPENDED → LOCKED. Returns false when the switch was not SUSPENDED.
    pub async fn escalate(&self, by: &str) -> Result<bool> {
        let moved = self.store.with_immediate(|conn| {
            if !store::kv_compare_and_set(
                conn,
                STATE_KEY,
                KillSwitchState::Suspended.as_str(),
                KillSwitchState::Locked.as_str(),
            )? {
                return Ok(false);
            }
            store::kv_set(conn, ACTIVATED_BY_KEY, by)?;
            store::audit(conn, "KILL_SWITCH_ESCALATED", by, Some("SUSPENDED -> LOCKED"))?;
            Ok(true)
        })?;
        if moved {
            self.announce(
                KillSwitchState::Suspended,
                KillSwitchState::Locked,
                by,
                NotificationEvent::KillSwitchEscalated,
            )
            .await;
        }
        Ok(moved)
    }

    /// Back to ACTIVE. Returns false when already ACTIVE.
    ///
    /// From SUSPENDED the cooldown must have passed and an attempt must be
    /// left; each such recovery uses one. From LOCKED recovery is an operator
    /// decision and resets the attempt counter.
    pub async fn recover(&self, by: &str, now: DateTime<Utc>) -> Result<bool> {
        let info = self.info()?;
        let from = info.state;
        let attempts_after = match from {
            KillSwitchState::Active => return Ok(false),
            KillSwitchState::Suspended => {
                if let Some(at) = info.activated_at {
                    let ready_at = at + self.cooldown;
                    if now < ready_at {
                        return Err(WardenError::RecoveryCooldown {
                            remaining_secs: (ready_at - now).num_seconds().max(1),
                        });
                    }
                }
                if info.recovery_attempts >= self.max_recovery_attempts {
                    return Err(WardenError::RecoveryAttemptsExhausted {
                        attempts: info.recovery_attempts,
                        max: self.max_recovery_attempts,
                    });
                }
                info.recovery_attempts + 1
            }
            KillSwitchState::Locked => 0,
        };

        let moved = self.store.with_immediate(|conn| {
            if !store::kv_compare_and_set(
                conn,
                STATE_KEY,
                from.as_str(),
                KillSwitchState::Active.as_str(),
            )? {
                return Ok(false);
            }
            store::kv_set(conn, RECOVERY_ATTEMPTS_KEY, &attempts_after.to_string())?;
            store::kv_delete(conn, ACTIVATED_AT_KEY)?;
            store::kv_delete(conn, ACTIVATED_BY_KEY)?;
            let details = format!("{} -> ACTIVE", from.as_str());
            store::audit(conn, "KILL_SWITCH_RECOVERED", by, Some(&details))?;
            Ok(true)
        })?;
        if moved {
            self.announce(
                from,
                KillSwitchState::Active,
                by,
                NotificationEvent::KillSwitchRecovered,
            )
            .await;
        }
        Ok(moved)
    }

    /// Recover a switch that auto-stop suspended, once its cooldown passed.
    ///
    /// Manual activations and LOCKED switches are left for an operator.
    pub async fn try_auto_recover(&self, now: DateTime<Utc>) -> Result<bool> {
        let info = self.info()?;
        let auto_suspended = info.state == KillSwitchState::Suspended
            && info
                .activated_by
                .as_deref()
                .is_some_and(|by| by.starts_with(AUTOSTOP_ACTOR_PREFIX));
        if !auto_suspended {
            return Ok(false);
        }
        match self.recover("auto_recover", now).await {
            Ok(moved) => Ok(moved),
            Err(WardenError::RecoveryCooldown { .. } | WardenError::RecoveryAttemptsExhausted { .. }) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn announce(
        &self,
        from: KillSwitchState,
        to: KillSwitchState,
        by: &str,
        event: NotificationEvent,
    ) {
        if to == KillSwitchState::Active {
            info!(%from, %to, %by, "kill switch recovered");
        } else {
            warn!(%from, %to, %by, "kill switch engaged");
        }
        self.bus.publish(Event::KillSwitchChanged {
            from,
            to,
            by: by.to_string(),
        });

        let notification = Notification::new(event, None)
            .with_body(format!("Kill switch {from} -> {to}"))
            .with_var("by", by)
            .with_var("state", to);
        if let Err(e) = self.notifications.notify(&notification).await {
            warn!(event = event.as_str(), error = %e, "kill switch notification not delivered");
        }
    }
}
