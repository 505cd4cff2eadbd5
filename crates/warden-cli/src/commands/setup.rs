use std::path::{Path, PathBuf};

use warden_config::ConfigLoader;
use warden_config::schema::data_dir;

const STARTER: &str = r#"# Warden configuration
# Every section is optional; omitted keys use their defaults.

[daemon]
environment = "testnet"   # testnet or mainnet
# event_capacity = 4096

[database]
# path = "~/.warden/warden.db"   # or env: WARDEN_DB_PATH
# busy_timeout_ms = 5000

[policy]
cumulative_tie_break = "daily_first"   # or "monthly_first"
warning_ratio = 0.8
downgrade_approval_without_owner = true
default_deny_tokens = true      # deny token transfers without an ALLOWED_TOKENS policy
default_deny_contracts = true   # deny contract calls without a CONTRACT_WHITELIST policy
default_deny_spenders = true    # deny approvals without an APPROVED_SPENDERS policy

[approval]
timeout_secs = 3600

[signing]
request_expiry_min = 30
# sign_url_base = "https://warden.dev/sign"

[pipeline]
confirmation_timeout_secs = 30

[autostop]
enabled = true
consecutive_failures_threshold = 5
unusual_activity_threshold = 20
unusual_activity_window_secs = 300
cooldown_secs = 1800
max_recovery_attempts = 3
# auto_recover = false

[sweeper]
interval_secs = 5

[logging]
level = "info"
format = "pretty"   # pretty, compact or json

# [channels.ntfy]
# enabled = true
# server = "https://ntfy.sh"   # or env: WARDEN_NTFY_SERVER
# notify_topic = "my-warden-alerts"

# [channels.telegram]
# enabled = true
# bot_token = "123456:ABC..."   # or env: WARDEN_TELEGRAM_BOT_TOKEN
# bot_username = "my_warden_bot"
# owner_chat_id = 123456789
# admin_chat_id = 123456789

# [channels.walletconnect]
# enabled = true
# relay_url = "https://relay.example.com/sign"
# project_id = "..."

# [channels.rest]
# max_pending = 1024
"#;

pub(super) fn cmd_init(explicit: Option<&Path>, local: bool, force: bool) -> warden_core::Result<()> {
    let config_path: PathBuf = match explicit {
        Some(path) => path.to_path_buf(),
        None if local => std::env::current_dir()?.join("warden.toml"),
        None => data_dir().join("warden.toml"),
    };

    if config_path.exists() && !force {
        println!("⚠️  {} already exists", config_path.display());
        println!("   Pass --force to overwrite it.");
        return Ok(());
    }

    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&config_path, STARTER)?;

    // the starter must load cleanly
    ConfigLoader::load(Some(&config_path))?;

    println!("✅ Wrote {}", config_path.display());
    println!("   Next: 'warden doctor' to audit it, 'warden wallet add' to register a wallet.");
    Ok(())
}
