use chrono::Utc;
use console::style;

use warden_channels::{NotificationService, TelegramApi};
use warden_config::WardenConfig;
use warden_core::{EventBus, Result};
use warden_runtime::{KillSwitch, KillSwitchInfo, notifications_from_config};
use warden_store::Store;

use super::{KillSwitchAction, open_store};

/// Read-only view used by `status` and `doctor`; notifies nobody.
fn quiet_switch(store: &Store, config: &WardenConfig) -> Result<KillSwitch> {
    KillSwitch::new(
        store.clone(),
        EventBus::default(),
        NotificationService::new(),
        &config.autostop,
    )
}

pub(super) fn read_info(store: &Store, config: &WardenConfig) -> Result<KillSwitchInfo> {
    quiet_switch(store, config)?.info()
}

pub(super) async fn cmd_kill_switch(config: &WardenConfig, action: KillSwitchAction) -> Result<()> {
    let store = open_store(config)?;
    let telegram = TelegramApi::from_config(&config.channels.telegram);
    let switch = KillSwitch::new(
        store,
        EventBus::default(),
        notifications_from_config(config, telegram),
        &config.autostop,
    )?;

    match action {
        KillSwitchAction::Status => {
            let info = switch.info()?;
            println!("State:             {}", info.state);
            if let Some(at) = info.activated_at {
                println!("Activated at:      {}", at.to_rfc3339());
            }
            if let Some(by) = &info.activated_by {
                println!("Activated by:      {by}");
            }
            println!(
                "Recovery attempts: {}/{}",
                info.recovery_attempts, config.autostop.max_recovery_attempts
            );
        }
        KillSwitchAction::Activate { by } => {
            if switch.activate(&by, Utc::now()).await? {
                println!("{} execution suspended", style("SUSPENDED").yellow());
            } else {
                println!("Kill switch is already {}", switch.state()?);
            }
        }
        KillSwitchAction::Escalate { by } => {
            if switch.escalate(&by).await? {
                println!("{} only an operator recovery can resume execution", style("LOCKED").red());
            } else {
                println!("Only a SUSPENDED switch can be escalated (it is {})", switch.state()?);
            }
        }
        KillSwitchAction::Recover { by } => {
            if switch.recover(&by, Utc::now()).await? {
                println!("{} queued transactions resume on the next sweep", style("ACTIVE").green());
            } else {
                println!("Kill switch is already ACTIVE");
            }
        }
    }
    Ok(())
}
