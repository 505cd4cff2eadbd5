use warden_approval::OwnerLifecycle;
use warden_config::WardenConfig;
use warden_core::network::resolve_network;
use warden_core::{Result, Wallet};

use super::{WalletAction, open_store};

pub(super) fn cmd_wallet(config: &WardenConfig, action: WalletAction) -> Result<()> {
    let store = open_store(config)?;
    match action {
        WalletAction::List => {
            let wallets = store.list_wallets()?;
            if wallets.is_empty() {
                println!("No wallets registered. Add one with 'warden wallet add'.");
                return Ok(());
            }
            for w in wallets {
                let owner = match (&w.owner_address, w.owner_verified) {
                    (None, _) => "no owner".to_string(),
                    (Some(a), false) => format!("owner {a} (unverified)"),
                    (Some(a), true) => format!("owner {a}"),
                };
                println!(
                    "{}  {:<16} {}/{}  {}  {owner}",
                    w.id, w.name, w.chain, w.environment, w.public_key
                );
            }
        }
        WalletAction::Add {
            name,
            chain,
            public_key,
            environment,
            network,
            owner,
        } => {
            let environment = environment.unwrap_or(config.daemon.environment);
            let mut wallet = Wallet::new(name, chain, environment, public_key);
            if let Some(network) = network {
                wallet.default_network = Some(resolve_network(Some(&network), None, environment, chain)?);
            }
            if let Some(owner) = owner {
                wallet = wallet.with_owner(owner.trim());
            }
            store.insert_wallet(&wallet)?;
            println!("✅ Wallet {} registered ({chain}/{environment})", wallet.id);
        }
        WalletAction::SetOwner { wallet_id, address } => {
            OwnerLifecycle::new(store).set_owner(wallet_id, &address)?;
            println!("✅ Owner set; it locks after the first signed approval");
        }
        WalletAction::RemoveOwner { wallet_id } => {
            OwnerLifecycle::new(store).remove_owner(wallet_id)?;
            println!("✅ Owner removed");
        }
        WalletAction::SetChannel { wallet_id, method } => {
            store.set_approval_method(wallet_id, method)?;
            match method {
                Some(m) => println!("✅ Approvals for {wallet_id} go to {m} first"),
                None => println!("✅ Approvals for {wallet_id} follow the global channel order"),
            }
        }
    }
    Ok(())
}
