#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use chrono::{Duration, Utc};
    use clap::Parser;
    use warden_cli::Cli;
    use warden_core::*;
    use warden_store::approvals::{self, PendingApproval};
    use warden_store::{PolicyType, Store};

    struct Workspace {
        _dir: tempfile::TempDir,
        config: PathBuf,
        db: PathBuf,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = dir.path().join("warden.toml");
            let db = dir.path().join("warden.db");
            std::fs::write(
                &config,
                format!("[database]\npath = \"{}\"\n\n[logging]\nlevel = \"error\"\n", db.display()),
            )
            .unwrap();
            Self { _dir: dir, config, db }
        }

        async fn run(&self, args: &[&str]) -> Result<()> {
            let config = self.config.to_string_lossy().to_string();
            let mut argv = vec!["warden", "--quiet", "--config", config.as_str()];
            argv.extend_from_slice(args);
            Cli::try_parse_from(argv).unwrap().run().await
        }

        fn store(&self) -> Store {
            Store::open(&self.db).unwrap()
        }
    }

    fn parses(args: &[&str]) -> bool {
        Cli::try_parse_from(args).is_ok()
    }

    mod parsing {
        use super::*;

        #[test]
        fn test_subcommands_parse() {
            assert!(parses(&["warden", "status"]));
            assert!(parses(&["warden", "kill-switch", "activate", "--by", "ops"]));
            assert!(parses(&["warden", "tx", "list", "--status", "QUEUED", "-n", "5"]));
            assert!(parses(&[
                "warden",
                "policy",
                "add",
                "--type",
                "SPENDING_LIMIT",
                "--rules",
                "{}"
            ]));
            assert!(parses(&["warden", "wallet", "set-channel", &uuid::Uuid::new_v4().to_string(), "rest"]));
        }

        #[test]
        fn test_bad_values_are_rejected() {
            assert!(!parses(&["warden", "tx", "list", "--status", "DONE"]));
            assert!(!parses(&["warden", "approvals", "approve", "not-a-uuid"]));
            assert!(!parses(&["warden", "policy", "add", "--type", "LIMIT", "--rules", "{}"]));
            assert!(!parses(&["warden", "-v", "-q", "status"]));
        }
    }

    mod init {
        use super::*;

        fn read(path: &Path) -> String {
            std::fs::read_to_string(path).unwrap()
        }

        #[tokio::test]
        async fn test_init_writes_loadable_starter() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("nested").join("warden.toml");
            let arg = path.to_string_lossy().to_string();

            let cli = Cli::try_parse_from(["warden", "--config", arg.as_str(), "init"]).unwrap();
            cli.run().await.unwrap();
            let written = read(&path);
            assert!(written.contains("[autostop]"));
            let config = warden_config::ConfigLoader::load(Some(&path)).unwrap().get();
            assert_eq!(config.autostop.consecutive_failures_threshold, 5);
        }

        #[tokio::test]
        async fn test_init_keeps_existing_file() {
            let ws = Workspace::new();
            let before = read(&ws.config);
            ws.run(&["init"]).await.unwrap();
            assert_eq!(read(&ws.config), before);

            ws.run(&["init", "--force"]).await.unwrap();
            assert_ne!(read(&ws.config), before);
        }
    }

    mod wallets_and_policies {
        use super::*;

        #[tokio::test]
        async fn test_wallet_add_and_owner() {
            let ws = Workspace::new();
            ws.run(&[
                "wallet",
                "add",
                "ops",
                "--chain",
                "solana",
                "--public-key",
                "AgentPub",
                "--network",
                "devnet",
                "--owner",
                "OwnerAddr",
            ])
            .await
            .unwrap();

            let wallets = ws.store().list_wallets().unwrap();
            assert_eq!(wallets.len(), 1);
            let wallet = &wallets[0];
            assert_eq!(wallet.environment, Environment::Testnet);
            assert_eq!(wallet.default_network.as_deref(), Some("devnet"));
            assert_eq!(wallet.owner_state(), OwnerState::Grace);

            let id = wallet.id.to_string();
            ws.run(&["wallet", "remove-owner", &id]).await.unwrap();
            assert_eq!(ws.store().get_wallet(wallet.id).unwrap().owner_state(), OwnerState::None);
        }

        #[tokio::test]
        async fn test_wallet_network_must_match_environment() {
            let ws = Workspace::new();
            let err = ws
                .run(&[
                    "wallet",
                    "add",
                    "ops",
                    "--chain",
                    "solana",
                    "--public-key",
                    "AgentPub",
                    "--network",
                    "mainnet",
                ])
                .await
                .unwrap_err();
            assert_eq!(err.code(), "NETWORK_MISMATCH");
        }

        #[tokio::test]
        async fn test_policy_rules_are_checked() {
            let ws = Workspace::new();
            ws.run(&[
                "policy",
                "add",
                "--type",
                "SPENDING_LIMIT",
                "--rules",
                r#"{"instant_max":"1000","delay_seconds":60}"#,
            ])
            .await
            .unwrap();

            let err = ws
                .run(&["policy", "add", "--type", "SPENDING_LIMIT", "--rules", r#"{"delay_seconds":"soon"}"#])
                .await
                .unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");

            let policies = ws.store().list_policies(None).unwrap();
            assert_eq!(policies.len(), 1);
            assert_eq!(policies[0].policy_type, PolicyType::SpendingLimit);

            let id = policies[0].id.to_string();
            ws.run(&["policy", "disable", &id]).await.unwrap();
            assert!(!ws.store().list_policies(None).unwrap()[0].enabled);
            ws.run(&["policy", "remove", &id]).await.unwrap();
            assert!(ws.store().list_policies(None).unwrap().is_empty());
        }
    }

    mod operator {
        use super::*;

        fn queued_approval(store: &Store) -> Transaction {
            let wallet = Wallet::new("ops", Chain::Solana, Environment::Testnet, "AgentPub").with_owner("Owner");
            store.insert_wallet(&wallet).unwrap();
            let request = TransactionRequest::Transfer {
                to: "Dest".into(),
                amount: "10".into(),
                memo: None,
                network: None,
            };
            let tx = Transaction::pending(wallet.id, None, "devnet".into(), request, Utc::now());
            store.insert_transaction(&tx).unwrap();
            store.mark_queued(tx.id, Utc::now(), None).unwrap();
            let approval = PendingApproval {
                id: uuid::Uuid::new_v4(),
                tx_id: tx.id,
                required_by: "Owner".into(),
                expires_at: Utc::now() + Duration::hours(1),
                approved_at: None,
                rejected_at: None,
                owner_signature: None,
                approval_channel: Some("rest".into()),
                created_at: Utc::now(),
            };
            approvals::insert_approval(&store.conn(), &approval).unwrap();
            tx
        }

        #[tokio::test]
        async fn test_kill_switch_round_trip() {
            let ws = Workspace::new();
            ws.run(&["kill-switch", "activate", "--by", "ops"]).await.unwrap();
            ws.run(&["status"]).await.unwrap();

            // recovery from SUSPENDED waits out the cooldown
            let err = ws.run(&["kill-switch", "recover"]).await.unwrap_err();
            assert!(matches!(err, WardenError::RecoveryCooldown { .. }));

            ws.run(&["kill-switch", "escalate"]).await.unwrap();
            ws.run(&["kill-switch", "recover"]).await.unwrap();

            let events: Vec<String> = ws
                .store()
                .audit_log(10)
                .unwrap()
                .into_iter()
                .map(|e| e.event_type)
                .collect();
            assert!(events.contains(&"KILL_SWITCH_ACTIVATED".to_string()));
            assert!(events.contains(&"KILL_SWITCH_ESCALATED".to_string()));
            assert!(events.contains(&"KILL_SWITCH_RECOVERED".to_string()));
            ws.run(&["logs", "-t", "kill_switch_recovered", "--json"]).await.unwrap();
        }

        #[tokio::test]
        async fn test_operator_approval_leaves_row_for_the_daemon() {
            let ws = Workspace::new();
            let tx = queued_approval(&ws.store());
            ws.run(&["approvals", "list"]).await.unwrap();
            ws.run(&["approvals", "approve", &tx.id.to_string()]).await.unwrap();

            let store = ws.store();
            assert_eq!(store.get_transaction(tx.id).unwrap().status, TxStatus::Queued);
            assert_eq!(store.approved_awaiting_execution().unwrap(), vec![tx.id]);

            let err = ws.run(&["approvals", "reject", &tx.id.to_string()]).await.unwrap_err();
            assert_eq!(err.code(), "SIGN_REQUEST_ALREADY_PROCESSED");
        }

        #[tokio::test]
        async fn test_operator_rejection_cancels() {
            let ws = Workspace::new();
            let tx = queued_approval(&ws.store());
            ws.run(&["approvals", "reject", &tx.id.to_string()]).await.unwrap();
            assert_eq!(ws.store().get_transaction(tx.id).unwrap().status, TxStatus::Cancelled);
        }

        #[tokio::test]
        async fn test_read_only_commands() {
            let ws = Workspace::new();
            queued_approval(&ws.store());
            ws.run(&["tx", "list", "--json"]).await.unwrap();
            ws.run(&["status", "--json"]).await.unwrap();
            ws.run(&["doctor"]).await.unwrap();
            ws.run(&["config", "--json"]).await.unwrap();
        }
    }
}
