use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use warden_core::Environment;

/// Root configuration, mapped from `warden.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub daemon: DaemonConfig,
    pub database: DatabaseConfig,
    pub policy: PolicyConfig,
    pub approval: ApprovalConfig,
    pub signing: SigningConfig,
    pub channels: ChannelsConfig,
    pub pipeline: PipelineConfig,
    pub autostop: AutoStopConfig,
    pub sweeper: SweeperConfig,
    pub logging: LoggingConfig,
}

/// Default data directory: `~/.warden`.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".warden")
}

// ── Daemon ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Environment new wallets default to and networks are resolved against.
    pub environment: Environment,
    /// Capacity of the in-process event bus.
    pub event_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Testnet,
            event_capacity: 4096,
        }
    }
}

// ── Database ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file.
    pub path: PathBuf,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("warden.db"),
            busy_timeout_ms: 5000,
        }
    }
}

// ── Policy ─────────────────────────────────────────────────────

/// Which cumulative window is reported when both are exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    DailyFirst,
    MonthlyFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub cumulative_tie_break: TieBreak,
    /// Fraction of a cumulative limit at which a warning is raised.
    pub warning_ratio: f64,
    /// Send APPROVAL-tier transactions through the delay queue when the wallet has no owner.
    pub downgrade_approval_without_owner: bool,
    /// Refuse token transfers when no ALLOWED_TOKENS policy applies.
    pub default_deny_tokens: bool,
    /// Refuse contract calls when no CONTRACT_WHITELIST policy applies.
    pub default_deny_contracts: bool,
    /// Refuse approvals when no APPROVED_SPENDERS policy applies.
    pub default_deny_spenders: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cumulative_tie_break: TieBreak::DailyFirst,
            warning_ratio: 0.8,
            downgrade_approval_without_owner: true,
            default_deny_tokens: true,
            default_deny_contracts: true,
            default_deny_spenders: true,
        }
    }
}

// ── Approval ───────────────────────────────────────────────────

/// Longest approval window accepted from configuration: one year.
pub const MAX_APPROVAL_TIMEOUT_SECS: u64 = 365 * 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Fallback approval timeout when the policy does not set one.
    pub timeout_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self { timeout_secs: 3600 }
    }
}

// ── Signing ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Minutes a SignRequest stays answerable.
    pub request_expiry_min: u64,
    /// Base of the universal link handed to wallet apps.
    pub sign_url_base: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            request_expiry_min: 30,
            sign_url_base: "https://warden.dev/sign".into(),
        }
    }
}

// ── Channels ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub ntfy: NtfyConfig,
    pub telegram: TelegramConfig,
    pub walletconnect: WalletConnectConfig,
    pub rest: RestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NtfyConfig {
    pub enabled: bool,
    pub server: String,
    /// Sign requests go to `{request_topic_prefix}-{wallet_id}`.
    pub request_topic_prefix: String,
    /// Responses are read from `{response_topic_prefix}-{request_id}`.
    pub response_topic_prefix: String,
    /// Topic for owner notifications (None = no ntfy notifier).
    pub notify_topic: Option<String>,
    pub reconnect_attempts: u32,
    pub reconnect_delay_secs: u64,
}

impl Default for NtfyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server: "https://ntfy.sh".into(),
            request_topic_prefix: "warden-sign".into(),
            response_topic_prefix: "warden-response".into(),
            notify_topic: None,
            reconnect_attempts: 3,
            reconnect_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    /// Can also be set via WARDEN_TELEGRAM_BOT_TOKEN.
    pub bot_token: Option<String>,
    pub bot_username: Option<String>,
    /// Owner chat that receives "open in wallet" sign requests.
    pub owner_chat_id: Option<i64>,
    /// Admin chat that receives approve/reject keyboards and notifications.
    pub admin_chat_id: Option<i64>,
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            bot_username: None,
            owner_chat_id: None,
            admin_chat_id: None,
            poll_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConnectConfig {
    pub enabled: bool,
    /// Bridge endpoint sign requests are POSTed to.
    pub relay_url: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// Maximum undelivered sign requests held for pickup.
    pub max_pending: usize,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self { max_pending: 1024 }
    }
}

// ── Pipeline ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on waiting for finality after submission.
    pub confirmation_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: 30,
        }
    }
}

// ── Auto-stop ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoStopConfig {
    pub enabled: bool,
    pub consecutive_failures_threshold: u32,
    /// Requests per wallet within `unusual_activity_window_secs` that trip the switch.
    pub unusual_activity_threshold: u32,
    pub unusual_activity_window_secs: u64,
    /// Minimum time in SUSPENDED before recovery is allowed.
    pub cooldown_secs: u64,
    pub max_recovery_attempts: u32,
    /// Let the sweeper recover from SUSPENDED once the cooldown has passed.
    pub auto_recover: bool,
}

impl Default for AutoStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            consecutive_failures_threshold: 5,
            unusual_activity_threshold: 20,
            unusual_activity_window_secs: 300,
            cooldown_secs: 1800,
            max_recovery_attempts: 3,
            auto_recover: false,
        }
    }
}

// ── Sweeper ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl WardenConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Timers ───
        if self.sweeper.interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "sweeper.interval_secs".into(),
                message: "interval is 0, the sweeper would spin".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 5".into()),
            });
        }
        if self.pipeline.confirmation_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "pipeline.confirmation_timeout_secs".into(),
                message: "timeout is 0, every submission stays SUBMITTED".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 30".into()),
            });
        }
        if self.approval.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "approval.timeout_secs".into(),
                message: "approvals would expire immediately".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3600".into()),
            });
        } else if self.approval.timeout_secs > MAX_APPROVAL_TIMEOUT_SECS {
            warnings.push(ConfigWarning {
                field: "approval.timeout_secs".into(),
                message: format!("timeout exceeds the {MAX_APPROVAL_TIMEOUT_SECS}s maximum"),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3600".into()),
            });
        }
        if self.signing.request_expiry_min == 0 {
            warnings.push(ConfigWarning {
                field: "signing.request_expiry_min".into(),
                message: "sign requests would expire immediately".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 30".into()),
            });
        } else if self.signing.request_expiry_min.saturating_mul(60) > self.approval.timeout_secs {
            warnings.push(ConfigWarning {
                field: "signing.request_expiry_min".into(),
                message: "sign requests outlive the approval they belong to".into(),
                severity: WarningSeverity::Info,
                hint: Some("The approval timeout still bounds the decision".into()),
            });
        }

        // ── Policy ───
        if !(0.0..=1.0).contains(&self.policy.warning_ratio) || self.policy.warning_ratio == 0.0 {
            warnings.push(ConfigWarning {
                field: "policy.warning_ratio".into(),
                message: format!("ratio {} is out of range", self.policy.warning_ratio),
                severity: WarningSeverity::Error,
                hint: Some("Must be in (0.0, 1.0], typically 0.8".into()),
            });
        }

        // ── Auto-stop ───
        if self.autostop.enabled && self.autostop.consecutive_failures_threshold == 0 {
            warnings.push(ConfigWarning {
                field: "autostop.consecutive_failures_threshold".into(),
                message: "threshold is 0, the first failure would trip the switch".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 5".into()),
            });
        }
        if self.autostop.enabled && self.autostop.unusual_activity_window_secs == 0 {
            warnings.push(ConfigWarning {
                field: "autostop.unusual_activity_window_secs".into(),
                message: "window is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 300".into()),
            });
        }
        if !self.autostop.enabled {
            warnings.push(ConfigWarning {
                field: "autostop.enabled".into(),
                message: "auto-stop is disabled, anomalies will not halt execution".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }
        if self.autostop.max_recovery_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "autostop.max_recovery_attempts".into(),
                message: "recovery from SUSPENDED always requires escalation to LOCKED".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Channels ───
        let ntfy = &self.channels.ntfy;
        if ntfy.enabled && !ntfy.server.starts_with("http") {
            warnings.push(ConfigWarning {
                field: "channels.ntfy.server".into(),
                message: format!("server '{}' is not an http(s) URL", ntfy.server),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'https://ntfy.sh'".into()),
            });
        }
        let tg = &self.channels.telegram;
        if tg.enabled && tg.bot_token.is_none() {
            warnings.push(ConfigWarning {
                field: "channels.telegram.bot_token".into(),
                message: "telegram is enabled without a bot token".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set bot_token or WARDEN_TELEGRAM_BOT_TOKEN".into()),
            });
        }
        if tg.enabled && tg.owner_chat_id.is_none() && tg.admin_chat_id.is_none() {
            warnings.push(ConfigWarning {
                field: "channels.telegram".into(),
                message: "no chat configured, telegram cannot deliver anything".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set owner_chat_id and/or admin_chat_id".into()),
            });
        }
        let wc = &self.channels.walletconnect;
        if wc.enabled && wc.relay_url.is_none() {
            warnings.push(ConfigWarning {
                field: "channels.walletconnect.relay_url".into(),
                message: "walletconnect is enabled without a relay".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
