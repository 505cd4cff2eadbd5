use warden_config::WardenConfig;
use warden_core::{Result, WardenError};
use warden_policy::ResolvedPolicies;
use warden_store::Policy;

use super::{PolicyAction, open_store};

pub(super) fn cmd_policy(config: &WardenConfig, action: PolicyAction) -> Result<()> {
    let store = open_store(config)?;
    match action {
        PolicyAction::List { wallet } => {
            let policies = store.list_policies(wallet)?;
            if policies.is_empty() {
                println!("No policies.");
                return Ok(());
            }
            for p in policies {
                let scope = p
                    .wallet_id
                    .map(|w| w.to_string())
                    .unwrap_or_else(|| "all wallets".into());
                let network = p.network.as_deref().unwrap_or("all networks");
                let enabled = if p.enabled { "" } else { "  (disabled)" };
                println!(
                    "{}  {:<21} prio {:<3} {scope} / {network}{enabled}",
                    p.id, p.policy_type.as_str(), p.priority
                );
                println!("    {}", p.rules);
            }
        }
        PolicyAction::Add {
            policy_type,
            rules,
            wallet,
            network,
            priority,
        } => {
            let rules: serde_json::Value = serde_json::from_str(&rules)
                .map_err(|e| WardenError::Validation(format!("rules are not valid JSON: {e}")))?;
            let mut policy = Policy::new(policy_type, rules).with_priority(priority);
            if let Some(wallet_id) = wallet {
                store.get_wallet(wallet_id)?;
                policy = policy.for_wallet(wallet_id);
            }
            if let Some(network) = network {
                policy = policy.on_network(network);
            }
            // reject rules the evaluator could not read
            ResolvedPolicies::resolve(std::slice::from_ref(&policy))?;
            store.insert_policy(&policy)?;
            println!("✅ Policy {} added", policy.id);
        }
        PolicyAction::Enable { policy_id } => toggle(store.set_policy_enabled(policy_id, true)?, policy_id, "enabled"),
        PolicyAction::Disable { policy_id } => {
            toggle(store.set_policy_enabled(policy_id, false)?, policy_id, "disabled")
        }
        PolicyAction::Remove { policy_id } => toggle(store.delete_policy(policy_id)?, policy_id, "removed"),
    }
    Ok(())
}

fn toggle(found: bool, policy_id: uuid::Uuid, what: &str) {
    if found {
        println!("✅ Policy {policy_id} {what}");
    } else {
        println!("No policy {policy_id}");
    }
}
