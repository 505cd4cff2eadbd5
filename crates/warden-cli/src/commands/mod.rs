use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::time::Duration;

use warden_config::schema::LoggingConfig;
use warden_config::{ConfigLoader, WardenConfig, WarningSeverity};
use warden_core::{
    ApprovalMethod, Chain, Environment, KillSwitchState, Result, TxId, TxStatus, WalletId, WardenError,
};
use warden_store::{PolicyType, Store};

mod policies;
mod safety;
mod setup;
mod transactions;
mod wallets;

/// Warden: wallet-as-a-service daemon with policy tiers, owner approval and a kill switch
#[derive(Parser)]
#[command(name = "warden", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to warden.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter warden.toml
    Init {
        /// Create in current directory instead of ~/.warden/
        #[arg(long)]
        local: bool,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Audit configuration and database
    Doctor,
    /// Kill switch state, wallets and transaction counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version and build info
    Version,
    /// Register wallets and their owners
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
    /// Inspect transactions
    Tx {
        #[command(subcommand)]
        action: TxAction,
    },
    /// List and decide pending owner approvals
    Approvals {
        #[command(subcommand)]
        action: ApprovalAction,
    },
    /// Activate, escalate or recover the kill switch
    KillSwitch {
        #[command(subcommand)]
        action: KillSwitchAction,
    },
    /// Manage spending-limit, whitelist and network policies
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
    /// Show recent audit log entries
    Logs {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        /// Filter by event type (e.g. KILL_SWITCH_ACTIVATED)
        #[arg(short = 't', long)]
        event_type: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WalletAction {
    /// List registered wallets
    List,
    /// Register a wallet by its public key
    Add {
        name: String,
        /// solana or ethereum
        #[arg(long)]
        chain: Chain,
        /// Public key or address of the agent wallet
        #[arg(long)]
        public_key: String,
        /// testnet or mainnet (defaults to daemon.environment)
        #[arg(long)]
        environment: Option<Environment>,
        /// Network used when a request names none
        #[arg(long)]
        network: Option<String>,
        /// Owner address that signs APPROVAL-tier transactions
        #[arg(long)]
        owner: Option<String>,
    },
    /// Register or replace the owner address (refused once verified)
    SetOwner { wallet_id: WalletId, address: String },
    /// Remove an unverified owner
    RemoveOwner { wallet_id: WalletId },
    /// Pin the approval channel (sdk_ntfy, sdk_telegram, walletconnect, telegram_bot, rest)
    SetChannel {
        wallet_id: WalletId,
        /// Omit to fall back to the global channel order
        method: Option<ApprovalMethod>,
    },
}

#[derive(Subcommand)]
enum TxAction {
    /// List recent transactions
    List {
        #[arg(short, long)]
        wallet: Option<WalletId>,
        /// PENDING, QUEUED, EXECUTING, SUBMITTED, CONFIRMED, FAILED, CANCELLED, EXPIRED
        #[arg(short, long)]
        status: Option<TxStatus>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one transaction in full
    Show { tx_id: TxId },
}

#[derive(Subcommand)]
enum ApprovalAction {
    /// List approvals still waiting on the owner
    List,
    /// Approve a QUEUED transaction; the daemon executes it on its next sweep
    Approve { tx_id: TxId },
    /// Reject a QUEUED transaction
    Reject { tx_id: TxId },
    /// Expire approvals past their deadline
    Expire,
}

#[derive(Subcommand)]
enum KillSwitchAction {
    /// Show the current state
    Status,
    /// ACTIVE → SUSPENDED
    Activate {
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// SUSPENDED → LOCKED
    Escalate {
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Back to ACTIVE
    Recover {
        #[arg(long, default_value = "cli")]
        by: String,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// List policies, optionally for one wallet
    List {
        #[arg(short, long)]
        wallet: Option<WalletId>,
    },
    /// Add a policy from a JSON rules document
    Add {
        /// Policy type, e.g. SPENDING_LIMIT, WHITELIST or CONTRACT_WHITELIST
        #[arg(long = "type")]
        policy_type: PolicyType,
        /// Rules as JSON, e.g. '{"instant_max":"1000000000","delay_seconds":900}'
        #[arg(long)]
        rules: String,
        /// Scope to one wallet (default: every wallet)
        #[arg(short, long)]
        wallet: Option<WalletId>,
        /// Scope to one network (default: every network)
        #[arg(long)]
        network: Option<String>,
        #[arg(long, default_value = "0")]
        priority: i64,
    },
    /// Enable a policy
    Enable { policy_id: uuid::Uuid },
    /// Disable a policy without deleting it
    Disable { policy_id: uuid::Uuid },
    /// Delete a policy
    Remove { policy_id: uuid::Uuid },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // init only writes a file; it must work even when the existing one is broken
        if let Commands::Init { local, force } = self.command {
            init_tracing(&self.level(&LoggingConfig::default()), "pretty");
            return setup::cmd_init(self.config.as_deref(), local, force);
        }

        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();
        init_tracing(&self.level(&config.logging), &config.logging.format);

        match self.command {
            Commands::Init { .. } => Ok(()),
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Doctor => Self::cmd_doctor(&config),
            Commands::Status { json } => Self::cmd_status(&config, json),
            Commands::Version => Self::cmd_version(),
            Commands::Wallet { action } => wallets::cmd_wallet(&config, action),
            Commands::Tx { action } => transactions::cmd_tx(&config, action),
            Commands::Approvals { action } => transactions::cmd_approvals(&config, action),
            Commands::KillSwitch { action } => safety::cmd_kill_switch(&config, action).await,
            Commands::Policy { action } => policies::cmd_policy(&config, action),
            Commands::Logs {
                limit,
                event_type,
                json,
            } => Self::cmd_logs(&config, limit, event_type, json),
        }
    }

    /// --log-level, then --verbose/--quiet, then the config file. RUST_LOG beats all of them.
    fn level(&self, logging: &LoggingConfig) -> String {
        if let Some(level) = &self.log_level {
            level.clone()
        } else if self.verbose {
            "debug".into()
        } else if self.quiet {
            "error".into()
        } else {
            logging.level.clone()
        }
    }

    fn cmd_config(config: &WardenConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| WardenError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_doctor(config: &WardenConfig) -> Result<()> {
        println!("🩺 Warden Doctor: Configuration Audit");
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }

        let mut ok_count = 0;
        let channels = &config.channels;
        if !channels.ntfy.enabled && !channels.telegram.enabled && !channels.walletconnect.enabled {
            println!("  💡 channels: only REST is enabled, owners must poll for sign requests");
            info_count += 1;
        } else {
            ok_count += 1;
        }
        if channels.telegram.enabled && channels.telegram.bot_token.is_none() {
            println!("  ⚠️  channels.telegram: enabled without bot_token or WARDEN_TELEGRAM_BOT_TOKEN");
            warn_count += 1;
        }

        let store = match open_store(config) {
            Ok(store) => {
                println!("  ✅ database: {}", config.database.path.display());
                ok_count += 1;
                store
            }
            Err(e) => {
                println!("  ❌ database: {e}");
                return Ok(());
            }
        };

        let state = safety::read_info(&store, config)?.state;
        if state == KillSwitchState::Active {
            ok_count += 1;
        } else {
            println!("  ⚠️  kill switch is {state}, nothing will execute");
            warn_count += 1;
        }

        let ownerless = store
            .list_wallets()?
            .into_iter()
            .filter(|w| w.owner_address.is_none())
            .count();
        if ownerless > 0 {
            let fate = if config.policy.downgrade_approval_without_owner {
                "their APPROVAL-tier transactions are delayed instead"
            } else {
                "their APPROVAL-tier transactions cannot be approved"
            };
            println!("  💡 {ownerless} wallet(s) have no owner, {fate}");
            info_count += 1;
        }

        let audit = store.audit_log(1000)?;
        let tampered = audit.iter().filter(|e| !e.verify()).count();
        if tampered == 0 {
            ok_count += 1;
        } else {
            println!("  ❌ audit log: {tampered} entries fail their checksum");
            warn_count += 1;
        }

        println!();
        println!("  ✅ {ok_count} checks passed, ⚠️  {warn_count} warnings, 💡 {info_count} suggestions");
        Ok(())
    }

    fn cmd_status(config: &WardenConfig, json: bool) -> Result<()> {
        let store = open_store(config)?;
        let kill_switch = safety::read_info(&store, config)?;
        let wallets = store.list_wallets()?;
        let counts = store.count_by_status(None)?;
        let undecided = store.undecided_approvals()?;

        if json {
            let counts: serde_json::Map<String, serde_json::Value> = counts
                .iter()
                .map(|(status, n)| (status.to_string(), (*n).into()))
                .collect();
            let status = serde_json::json!({
                "kill_switch": kill_switch,
                "wallets": wallets.len(),
                "transactions": counts,
                "pending_approvals": undecided.len(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        let state = match kill_switch.state {
            KillSwitchState::Active => style(kill_switch.state.as_str()).green(),
            KillSwitchState::Suspended => style(kill_switch.state.as_str()).yellow(),
            KillSwitchState::Locked => style(kill_switch.state.as_str()).red(),
        };
        println!("Kill switch:       {state}");
        if let Some(by) = &kill_switch.activated_by {
            println!("  activated by:    {by}");
        }
        println!("Wallets:           {}", wallets.len());
        println!("Pending approvals: {}", undecided.len());
        println!("Transactions:");
        if counts.is_empty() {
            println!("  (none)");
        }
        for (status, n) in counts {
            println!("  {:<10} {n}", status.as_str());
        }
        Ok(())
    }

    fn cmd_logs(
        config: &WardenConfig,
        limit: usize,
        event_type: Option<String>,
        json: bool,
    ) -> Result<()> {
        let store = open_store(config)?;
        let entries: Vec<_> = store
            .audit_log(limit)?
            .into_iter()
            .filter(|e| {
                event_type
                    .as_deref()
                    .is_none_or(|t| e.event_type.eq_ignore_ascii_case(t))
            })
            .collect();

        if json {
            let rows: Vec<_> = entries
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "id": e.id,
                        "timestamp": e.timestamp,
                        "event_type": e.event_type,
                        "action": e.action,
                        "details": e.details,
                        "verified": e.verify(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }

        if entries.is_empty() {
            println!("No audit entries.");
            return Ok(());
        }
        for e in &entries {
            let mark = if e.verify() { " " } else { "!" };
            println!(
                "{mark} {}  {:<24} {:<16} {}",
                e.timestamp,
                e.event_type,
                e.action,
                truncate_output(e.details.as_deref().unwrap_or(""), 60)
            );
        }
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("Warden v{}", env!("CARGO_PKG_VERSION"));
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }
}

fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A subscriber may already be installed when embedded.
    let _ = if format == "json" {
        builder.json().with_target(true).try_init()
    } else {
        builder.with_target(false).try_init()
    };
}

fn open_store(config: &WardenConfig) -> Result<Store> {
    Store::open_with_timeout(
        &config.database.path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )
}

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate_output(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.replace('\n', " ")
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut.replace('\n', " "))
    }
}
