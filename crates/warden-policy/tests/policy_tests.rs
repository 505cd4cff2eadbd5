#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;
    use warden_config::TieBreak;
    use warden_config::schema::PolicyConfig;
    use warden_core::*;
    use warden_policy::*;
    use warden_store::{Policy, PolicyType, Store, transactions};

    const SOL: u128 = 1_000_000_000;

    fn setup() -> (Store, Wallet) {
        let store = Store::open_in_memory().unwrap();
        let wallet = Wallet::new("agent", Chain::Solana, Environment::Testnet, "AgentPub");
        store.insert_wallet(&wallet).unwrap();
        (store, wallet)
    }

    fn transfer(to: &str, amount: u128) -> TransactionRequest {
        TransactionRequest::Transfer {
            to: to.into(),
            amount: amount.to_string(),
            memo: None,
            network: None,
        }
    }

    fn new_tx(store: &Store, wallet: &Wallet, amount: u128) -> Transaction {
        let tx = Transaction::pending(
            wallet.id,
            None,
            "devnet".into(),
            transfer("Dest", amount),
            Utc::now(),
        );
        store.insert_transaction(&tx).unwrap();
        tx
    }

    fn spending(store: &Store, wallet: &Wallet, rules: serde_json::Value) {
        store
            .insert_policy(&Policy::new(PolicyType::SpendingLimit, rules).for_wallet(wallet.id))
            .unwrap();
    }

    fn input(amount: u128, usd: Option<f64>) -> EvaluationInput {
        EvaluationInput {
            wallet_id: uuid::Uuid::new_v4(),
            tx_type: TxType::Transfer,
            destinations: vec!["Dest".into()],
            network: "devnet".into(),
            native_amount: amount,
            usd_amount: usd,
            legs: vec![RequestLeg::Transfer { to: "Dest".into() }],
        }
    }

    fn sol_bands() -> SpendingLimitRules {
        SpendingLimitRules {
            instant_max: Some(SOL.to_string()),
            notify_max: Some((10 * SOL).to_string()),
            delay_max: Some((50 * SOL).to_string()),
            delay_seconds: 900,
            ..Default::default()
        }
    }

    mod tiers {
        use super::*;
        use warden_policy::tier::{native_tier, per_tx_tier, usd_tier};

        #[test]
        fn test_native_bands() {
            let rules = sol_bands();
            assert_eq!(native_tier(SOL, &rules), Tier::Instant);
            assert_eq!(native_tier(5 * SOL, &rules), Tier::Notify);
            assert_eq!(native_tier(30 * SOL, &rules), Tier::Delay);
            assert_eq!(native_tier(51 * SOL, &rules), Tier::Approval);
        }

        #[test]
        fn test_zero_amount_is_instant() {
            assert_eq!(native_tier(0, &sol_bands()), Tier::Instant);
        }

        #[test]
        fn test_no_native_thresholds_is_instant() {
            assert_eq!(native_tier(u128::MAX, &SpendingLimitRules::default()), Tier::Instant);
        }

        #[test]
        fn test_missing_band_skipped() {
            let rules = SpendingLimitRules {
                instant_max: Some("10".into()),
                delay_max: Some("100".into()),
                ..Default::default()
            };
            assert_eq!(native_tier(50, &rules), Tier::Delay);
        }

        #[test]
        fn test_usd_tier_needs_thresholds() {
            assert_eq!(usd_tier(10.0, &SpendingLimitRules::default()), None);
            let rules = SpendingLimitRules {
                instant_max_usd: Some(10.0),
                notify_max_usd: Some(100.0),
                ..Default::default()
            };
            assert_eq!(usd_tier(50.0, &rules), Some(Tier::Notify));
            assert_eq!(usd_tier(500.0, &rules), Some(Tier::Approval));
        }

        #[test]
        fn test_per_tx_takes_stricter() {
            let rules = SpendingLimitRules {
                instant_max_usd: Some(10.0),
                ..sol_bands()
            };
            assert_eq!(per_tx_tier(SOL, Some(150.0), &rules), Tier::Approval);
            assert_eq!(per_tx_tier(SOL, None, &rules), Tier::Instant);
            assert_eq!(per_tx_tier(SOL, Some(0.0), &rules), Tier::Instant);
        }
    }

    mod evaluator {
        use super::*;

        fn with_limits(daily: Option<f64>, monthly: Option<f64>) -> ResolvedPolicies {
            ResolvedPolicies {
                spending: Some(SpendingLimitRules {
                    daily_limit_usd: daily,
                    monthly_limit_usd: monthly,
                    ..Default::default()
                }),
                ..Default::default()
            }
        }

        #[test]
        fn test_no_policy_is_instant() {
            let decision = PolicyEvaluator::default().evaluate(
                &input(100 * SOL, Some(10_000.0)),
                &ResolvedPolicies::default(),
                &SpendSnapshot::default(),
            );
            assert!(decision.allowed);
            assert_eq!(decision.tier, Tier::Instant);
            assert!(decision.approval_reason.is_none());
        }

        #[test]
        fn test_delay_tier_without_usd() {
            let policies = ResolvedPolicies {
                spending: Some(sol_bands()),
                ..Default::default()
            };
            let decision = PolicyEvaluator::default().evaluate(
                &input(30 * SOL, None),
                &policies,
                &SpendSnapshot::default(),
            );
            assert_eq!(decision.tier, Tier::Delay);
            assert_eq!(decision.delay_seconds, Some(900));
        }

        #[test]
        fn test_delay_seconds_only_for_delay() {
            let policies = ResolvedPolicies {
                spending: Some(sol_bands()),
                ..Default::default()
            };
            let decision = PolicyEvaluator::default().evaluate(
                &input(5 * SOL, None),
                &policies,
                &SpendSnapshot::default(),
            );
            assert_eq!(decision.tier, Tier::Notify);
            assert_eq!(decision.delay_seconds, None);
        }

        #[test]
        fn test_per_tx_approval_reason() {
            let policies = ResolvedPolicies {
                spending: Some(sol_bands()),
                ..Default::default()
            };
            let decision = PolicyEvaluator::default().evaluate(
                &input(60 * SOL, None),
                &policies,
                &SpendSnapshot::default(),
            );
            assert_eq!(decision.tier, Tier::Approval);
            assert_eq!(decision.approval_reason, Some(ApprovalReason::PerTx));
        }

        #[test]
        fn test_daily_limit_exceeded() {
            let decision = PolicyEvaluator::default().evaluate(
                &input(SOL, Some(25.0)),
                &with_limits(Some(100.0), None),
                &SpendSnapshot { daily: 80.0, monthly: 80.0, ..Default::default() },
            );
            assert!(decision.allowed);
            assert_eq!(decision.tier, Tier::Approval);
            assert_eq!(decision.approval_reason, Some(ApprovalReason::CumulativeDaily));
        }

        #[test]
        fn test_cumulative_reason_beats_per_tx() {
            let mut rules = sol_bands();
            rules.daily_limit_usd = Some(100.0);
            let policies = ResolvedPolicies {
                spending: Some(rules),
                ..Default::default()
            };
            let decision = PolicyEvaluator::default().evaluate(
                &input(60 * SOL, Some(500.0)),
                &policies,
                &SpendSnapshot::default(),
            );
            assert_eq!(decision.approval_reason, Some(ApprovalReason::CumulativeDaily));
        }

        #[test]
        fn test_unknown_usd_skips_cumulative() {
            let decision = PolicyEvaluator::default().evaluate(
                &input(SOL, None),
                &with_limits(Some(100.0), None),
                &SpendSnapshot { daily: 1_000.0, monthly: 1_000.0, ..Default::default() },
            );
            assert_eq!(decision.tier, Tier::Instant);
            assert!(decision.cumulative_warning.is_none());
        }

        #[test]
        fn test_warning_at_ratio() {
            let decision = PolicyEvaluator::default().evaluate(
                &input(SOL, Some(10.0)),
                &with_limits(Some(100.0), None),
                &SpendSnapshot { daily: 75.0, monthly: 75.0, ..Default::default() },
            );
            assert_eq!(decision.tier, Tier::Instant);
            let warning = decision.cumulative_warning.unwrap();
            assert_eq!(warning.window, Window::Daily);
            assert_eq!(warning.spent, 85.0);
            assert!((warning.ratio - 0.85).abs() < 1e-9);
        }

        #[test]
        fn test_no_warning_below_ratio() {
            let decision = PolicyEvaluator::default().evaluate(
                &input(SOL, Some(10.0)),
                &with_limits(Some(100.0), None),
                &SpendSnapshot { daily: 10.0, monthly: 10.0, ..Default::default() },
            );
            assert!(decision.cumulative_warning.is_none());
        }

        #[test]
        fn test_tie_break_order() {
            let policies = with_limits(Some(100.0), Some(150.0));
            let snapshot = SpendSnapshot { daily: 90.0, monthly: 140.0, ..Default::default() };

            let daily_first = PolicyEvaluator::new(TieBreak::DailyFirst, 0.8)
                .evaluate(&input(SOL, Some(20.0)), &policies, &snapshot);
            assert_eq!(daily_first.approval_reason, Some(ApprovalReason::CumulativeDaily));

            let monthly_first = PolicyEvaluator::new(TieBreak::MonthlyFirst, 0.8)
                .evaluate(&input(SOL, Some(20.0)), &policies, &snapshot);
            assert_eq!(monthly_first.approval_reason, Some(ApprovalReason::CumulativeMonthly));
        }

        #[test]
        fn test_monthly_only_exceeded() {
            let decision = PolicyEvaluator::default().evaluate(
                &input(SOL, Some(20.0)),
                &with_limits(Some(100.0), Some(150.0)),
                &SpendSnapshot { daily: 10.0, monthly: 140.0, ..Default::default() },
            );
            assert_eq!(decision.approval_reason, Some(ApprovalReason::CumulativeMonthly));
        }

        #[test]
        fn test_reserved_native_raises_band() {
            let policies = ResolvedPolicies {
                spending: Some(sol_bands()),
                ..Default::default()
            };
            let held = SpendSnapshot {
                reserved_native: 8 * SOL / 10,
                ..Default::default()
            };
            let decision =
                PolicyEvaluator::default().evaluate(&input(8 * SOL / 10, None), &policies, &held);
            assert_eq!(decision.tier, Tier::Notify);

            let decision = PolicyEvaluator::default().evaluate(
                &input(8 * SOL / 10, None),
                &policies,
                &SpendSnapshot::default(),
            );
            assert_eq!(decision.tier, Tier::Instant);
        }

        #[test]
        fn test_zero_value_ignores_reserved_native() {
            let policies = ResolvedPolicies {
                spending: Some(sol_bands()),
                ..Default::default()
            };
            let held = SpendSnapshot {
                reserved_native: 100 * SOL,
                ..Default::default()
            };
            let decision = PolicyEvaluator::default().evaluate(&input(0, None), &policies, &held);
            assert_eq!(decision.tier, Tier::Instant);
        }

        #[test]
        fn test_final_tier_is_monotonic() {
            let mut rules = sol_bands();
            rules.daily_limit_usd = Some(100.0);
            let policies = ResolvedPolicies {
                spending: Some(rules),
                ..Default::default()
            };
            let evaluator = PolicyEvaluator::default();
            let mut last = Tier::Instant;
            for spent in [0.0, 50.0, 99.0, 150.0] {
                for amount in [SOL / 2, 5 * SOL, 30 * SOL, 60 * SOL] {
                    let decision = evaluator.evaluate(
                        &input(amount, Some(1.0)),
                        &policies,
                        &SpendSnapshot { daily: spent, monthly: spent, ..Default::default() },
                    );
                    let base = evaluator.evaluate(
                        &input(amount, Some(1.0)),
                        &policies,
                        &SpendSnapshot::default(),
                    );
                    assert!(decision.tier >= base.tier);
                    if amount == SOL / 2 {
                        assert!(decision.tier >= last);
                        last = decision.tier;
                    }
                }
            }
            assert_eq!(last, Tier::Approval);
        }
    }

    mod deny_rules {
        use super::*;

        #[test]
        fn test_whitelist_case_insensitive() {
            let policies = ResolvedPolicies {
                whitelist: Some(WhitelistRules {
                    allowed_addresses: vec!["0xABCdef".into()],
                }),
                ..Default::default()
            };
            let mut req = input(SOL, None);
            req.destinations = vec!["0xabcDEF".into()];
            let decision =
                PolicyEvaluator::default().evaluate(&req, &policies, &SpendSnapshot::default());
            assert!(decision.allowed);

            req.destinations.push("0xother".into());
            let decision =
                PolicyEvaluator::default().evaluate(&req, &policies, &SpendSnapshot::default());
            assert!(!decision.allowed);
            assert!(decision.reason.unwrap().contains("0xother"));
        }

        #[test]
        fn test_allowed_networks() {
            let policies = ResolvedPolicies {
                allowed_networks: Some(AllowedNetworksRules {
                    networks: vec!["mainnet".into()],
                }),
                ..Default::default()
            };
            let decision = PolicyEvaluator::default().evaluate(
                &input(SOL, None),
                &policies,
                &SpendSnapshot::default(),
            );
            assert!(!decision.allowed);
        }

        struct NoContractCalls;

        impl DenyRule for NoContractCalls {
            fn name(&self) -> &str {
                "no_contract_calls"
            }

            fn check(&self, input: &EvaluationInput, _: &ResolvedPolicies) -> RuleVerdict {
                if input.tx_type == TxType::ContractCall {
                    RuleVerdict::Deny("contract calls disabled".into())
                } else {
                    RuleVerdict::Pass
                }
            }
        }

        #[test]
        fn test_custom_rule() {
            let mut evaluator = PolicyEvaluator::default();
            evaluator.add_rule(Box::new(NoContractCalls));
            let mut req = input(0, None);
            req.tx_type = TxType::ContractCall;
            let decision =
                evaluator.evaluate(&req, &ResolvedPolicies::default(), &SpendSnapshot::default());
            assert!(!decision.allowed);
        }
    }

    mod asset_rules {
        use super::*;
        use warden_core::request::UINT256_MAX;
        use warden_policy::evaluator::selector;

        fn token(mint: &str) -> RequestLeg {
            RequestLeg::TokenTransfer {
                to: "Dest".into(),
                token: mint.into(),
            }
        }

        fn call(to: &str, selector: Option<&str>) -> RequestLeg {
            RequestLeg::ContractCall {
                to: to.into(),
                selector: selector.map(str::to_string),
            }
        }

        fn approve(spender: &str, amount: &str) -> RequestLeg {
            RequestLeg::Approve {
                spender: spender.into(),
                token: "Mint".into(),
                amount: amount.into(),
            }
        }

        fn entries(addresses: &[&str]) -> Vec<AddressEntry> {
            addresses
                .iter()
                .map(|a| AddressEntry {
                    address: a.to_string(),
                    name: None,
                })
                .collect()
        }

        /// Some unrelated policy applies, which arms the default-deny rules.
        fn spending_only() -> ResolvedPolicies {
            ResolvedPolicies {
                spending: Some(SpendingLimitRules::default()),
                ..Default::default()
            }
        }

        fn with_spenders(spenders: &[&str]) -> ResolvedPolicies {
            ResolvedPolicies {
                approved_spenders: Some(ApprovedSpendersRules {
                    spenders: entries(spenders),
                }),
                ..spending_only()
            }
        }

        fn evaluate(legs: Vec<RequestLeg>, policies: &ResolvedPolicies) -> PolicyDecision {
            let mut req = input(0, None);
            req.legs = legs;
            PolicyEvaluator::default().evaluate(&req, policies, &SpendSnapshot::default())
        }

        #[test]
        fn test_tokens_denied_without_policy() {
            let decision = evaluate(vec![token("Mint")], &spending_only());
            assert!(!decision.allowed);
            assert!(decision.reason.unwrap().contains("ALLOWED_TOKENS"));

            // nothing configured at all is a passthrough
            let decision = evaluate(vec![token("Mint")], &ResolvedPolicies::default());
            assert!(decision.allowed);
            assert_eq!(decision.tier, Tier::Instant);
        }

        #[test]
        fn test_default_deny_can_be_disabled() {
            let evaluator = PolicyEvaluator::from_config(&PolicyConfig {
                default_deny_tokens: false,
                default_deny_contracts: false,
                default_deny_spenders: false,
                ..PolicyConfig::default()
            });
            let mut req = input(0, None);
            req.legs = vec![token("Mint"), call("0xPool", None), approve("Router", "5")];
            let decision = evaluator.evaluate(&req, &spending_only(), &SpendSnapshot::default());
            assert!(decision.allowed);
        }

        #[test]
        fn test_allowed_tokens_list() {
            let policies = ResolvedPolicies {
                allowed_tokens: Some(AllowedTokensRules {
                    tokens: entries(&["MintA"]),
                }),
                ..spending_only()
            };
            assert!(evaluate(vec![token("minta")], &policies).allowed);
            let decision = evaluate(vec![token("MintB")], &policies);
            assert!(!decision.allowed);
            assert!(decision.reason.unwrap().contains("MintB"));
        }

        #[test]
        fn test_contract_whitelist() {
            let decision = evaluate(vec![call("0xPool", None)], &spending_only());
            assert!(decision.reason.unwrap().contains("CONTRACT_WHITELIST"));

            let policies = ResolvedPolicies {
                contract_whitelist: Some(ContractWhitelistRules {
                    contracts: entries(&["0xPOOL"]),
                }),
                ..spending_only()
            };
            assert!(evaluate(vec![call("0xpool", None)], &policies).allowed);
            assert!(!evaluate(vec![call("0xRogue", None)], &policies).allowed);
        }

        #[test]
        fn test_method_whitelist_restricts_listed_contracts() {
            let policies = ResolvedPolicies {
                contract_whitelist: Some(ContractWhitelistRules {
                    contracts: entries(&["0xPool", "0xOther"]),
                }),
                method_whitelist: Some(MethodWhitelistRules {
                    methods: vec![MethodEntry {
                        contract_address: "0xpool".into(),
                        selectors: vec!["0xa9059cbb".into()],
                    }],
                }),
                ..spending_only()
            };
            assert!(evaluate(vec![call("0xPool", Some("0xA9059CBB"))], &policies).allowed);

            let decision = evaluate(vec![call("0xPool", Some("0x095ea7b3"))], &policies);
            assert!(decision.reason.unwrap().contains("0x095ea7b3"));
            assert!(!evaluate(vec![call("0xPool", None)], &policies).allowed);
            assert!(evaluate(vec![call("0xOther", None)], &policies).allowed);
        }

        #[test]
        fn test_selector_from_calldata() {
            assert_eq!(selector("0xA9059CBB00000000").as_deref(), Some("0xa9059cbb"));
            assert_eq!(selector("a9059cbb").as_deref(), Some("0xa9059cbb"));
            assert_eq!(selector("0x1234"), None);
            assert_eq!(selector("0xzzzzzzzz"), None);

            let request = TransactionRequest::ContractCall {
                to: "0xPool".into(),
                calldata: Some("0x095EA7B3ffff".into()),
                value: None,
                network: None,
            };
            assert_eq!(
                RequestLeg::from_request(&request),
                vec![call("0xPool", Some("0x095ea7b3"))]
            );
        }

        #[test]
        fn test_approved_spenders() {
            let decision = evaluate(vec![approve("Router", "5")], &spending_only());
            assert!(decision.reason.unwrap().contains("APPROVED_SPENDERS"));

            let policies = with_spenders(&["router"]);
            assert!(evaluate(vec![approve("ROUTER", "5")], &policies).allowed);
            let decision = evaluate(vec![approve("Drainer", "5")], &policies);
            assert!(decision.reason.unwrap().contains("Drainer"));
        }

        #[test]
        fn test_unlimited_approval_blocked() {
            let decision = evaluate(vec![approve("Router", UINT256_MAX)], &with_spenders(&["Router"]));
            assert!(!decision.allowed);
            assert!(decision.reason.unwrap().contains("unlimited"));

            // blocked even for a wallet with no policies
            let decision = evaluate(vec![approve("Router", UNLIMITED_APPROVAL_THRESHOLD)], &ResolvedPolicies::default());
            assert!(!decision.allowed);

            let policies = ResolvedPolicies {
                approve_amount_limit: Some(ApproveAmountLimitRules {
                    max_amount: None,
                    block_unlimited: false,
                }),
                ..with_spenders(&["Router"])
            };
            assert!(evaluate(vec![approve("Router", UINT256_MAX)], &policies).allowed);
        }

        #[test]
        fn test_approve_amount_cap() {
            let policies = ResolvedPolicies {
                approve_amount_limit: Some(ApproveAmountLimitRules {
                    max_amount: Some("1000".into()),
                    block_unlimited: true,
                }),
                ..with_spenders(&["Router"])
            };
            assert!(evaluate(vec![approve("Router", "1000")], &policies).allowed);
            let decision = evaluate(vec![approve("Router", "1001")], &policies);
            assert!(decision.reason.unwrap().contains("exceeds limit 1000"));
        }

        #[test]
        fn test_approvals_default_to_approval_tier() {
            let decision = evaluate(vec![approve("Router", "5")], &with_spenders(&["Router"]));
            assert_eq!(decision.tier, Tier::Approval);
            assert_eq!(decision.approval_reason, Some(ApprovalReason::ApproveOverride));

            let policies = ResolvedPolicies {
                approve_tier_override: Some(ApproveTierOverrideRules { tier: Tier::Notify }),
                ..with_spenders(&["Router"])
            };
            let decision = evaluate(vec![approve("Router", "5")], &policies);
            assert_eq!(decision.tier, Tier::Notify);
            assert!(decision.approval_reason.is_none());
        }

        #[test]
        fn test_batch_is_all_or_nothing() {
            let policies = ResolvedPolicies {
                allowed_tokens: Some(AllowedTokensRules {
                    tokens: entries(&["Mint"]),
                }),
                ..with_spenders(&["Router"])
            };
            let legs = vec![
                RequestLeg::Transfer { to: "Dest".into() },
                token("Mint"),
                approve("Drainer", "5"),
            ];
            let decision = evaluate(legs, &policies);
            assert!(!decision.allowed);
            assert!(decision.reason.unwrap().contains("Drainer"));
        }

        #[test]
        fn test_batch_tier_is_max_of_amount_and_override() {
            let policies = ResolvedPolicies {
                spending: Some(sol_bands()),
                approve_tier_override: Some(ApproveTierOverrideRules { tier: Tier::Notify }),
                ..with_spenders(&["Router"])
            };
            let mut req = input(30 * SOL, None);
            req.legs = vec![RequestLeg::Transfer { to: "Dest".into() }, approve("Router", "5")];
            let decision =
                PolicyEvaluator::default().evaluate(&req, &policies, &SpendSnapshot::default());
            assert_eq!(decision.tier, Tier::Delay);
            assert_eq!(decision.delay_seconds, Some(900));
        }
    }

    mod resolution {
        use super::*;

        #[test]
        fn test_wallet_scope_beats_global_at_same_priority() {
            let wallet_id = uuid::Uuid::new_v4();
            let policies = vec![
                Policy::new(PolicyType::SpendingLimit, json!({"instant_max": "1"})),
                Policy::new(PolicyType::SpendingLimit, json!({"instant_max": "2"}))
                    .for_wallet(wallet_id),
            ];
            let resolved = ResolvedPolicies::resolve(&policies).unwrap();
            assert_eq!(resolved.spending.unwrap().instant_max.as_deref(), Some("2"));
        }

        #[test]
        fn test_priority_wins() {
            let policies = vec![
                Policy::new(PolicyType::SpendingLimit, json!({"instant_max": "1"}))
                    .with_priority(10),
                Policy::new(PolicyType::SpendingLimit, json!({"instant_max": "2"}))
                    .for_wallet(uuid::Uuid::new_v4()),
            ];
            let resolved = ResolvedPolicies::resolve(&policies).unwrap();
            assert_eq!(resolved.spending.unwrap().instant_max.as_deref(), Some("1"));
        }

        #[test]
        fn test_wait_times_are_bounded() {
            let too_long = vec![Policy::new(
                PolicyType::SpendingLimit,
                json!({"instant_max": "1", "delay_seconds": 100_000_000_000_000_000u64}),
            )];
            let err = ResolvedPolicies::resolve(&too_long).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");

            let timeout = vec![Policy::new(
                PolicyType::SpendingLimit,
                json!({"delay_seconds": 60, "approval_timeout": u64::MAX}),
            )];
            assert!(ResolvedPolicies::resolve(&timeout).is_err());

            let year = vec![Policy::new(
                PolicyType::SpendingLimit,
                json!({"delay_seconds": MAX_WAIT_SECS, "approval_timeout": MAX_WAIT_SECS}),
            )];
            assert!(ResolvedPolicies::resolve(&year).is_ok());
        }

        #[test]
        fn test_asset_policies_resolve() {
            let policies = vec![
                Policy::new(PolicyType::AllowedTokens, json!({"tokens": [{"address": "Mint", "name": "USDC"}]})),
                Policy::new(PolicyType::ApproveTierOverride, json!({"tier": "DELAY"})),
                Policy::new(PolicyType::ApproveAmountLimit, json!({"max_amount": "500"})),
            ];
            let resolved = ResolvedPolicies::resolve(&policies).unwrap();
            assert!(resolved.allowed_tokens.unwrap().allows("mint"));
            assert_eq!(resolved.approve_tier_override.unwrap().tier, Tier::Delay);
            assert!(resolved.approve_amount_limit.unwrap().block_unlimited);

            let bad = vec![Policy::new(PolicyType::ApproveAmountLimit, json!({"max_amount": "1e6"}))];
            assert!(ResolvedPolicies::resolve(&bad).is_err());
        }

        #[test]
        fn test_invalid_rules_rejected() {
            let policies = vec![Policy::new(
                PolicyType::Whitelist,
                json!({"allowed_addresses": "not-a-list"}),
            )];
            let err = ResolvedPolicies::resolve(&policies).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");
        }
    }

    mod engine {
        use super::*;

        fn engine(store: &Store) -> PolicyEngine {
            PolicyEngine::new(store.clone(), &PolicyConfig::default())
        }

        fn confirm(store: &Store, tx: &Transaction) {
            assert!(store.claim_for_execution(tx.id).unwrap());
            assert!(store.mark_confirmed(tx.id, Utc::now()).unwrap());
        }

        #[test]
        fn test_cumulative_daily_with_history() {
            let (store, wallet) = setup();
            spending(&store, &wallet, json!({"daily_limit_usd": 100.0}));
            let engine = engine(&store);

            let first = new_tx(&store, &wallet, SOL);
            engine.evaluate_and_reserve(&first, Some(80.0), Utc::now()).unwrap();
            confirm(&store, &first);

            let second = new_tx(&store, &wallet, SOL);
            let decision = engine.evaluate_and_reserve(&second, Some(25.0), Utc::now()).unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.tier, Tier::Approval);
            assert_eq!(decision.approval_reason, Some(ApprovalReason::CumulativeDaily));
        }

        #[test]
        fn test_reservation_written() {
            let (store, wallet) = setup();
            let tx = new_tx(&store, &wallet, 3 * SOL);
            engine(&store).evaluate_and_reserve(&tx, Some(42.0), Utc::now()).unwrap();

            let stored = store.get_transaction(tx.id).unwrap();
            assert_eq!(stored.tier, Some(Tier::Instant));
            assert_eq!(stored.reserved_amount.as_deref(), Some("3000000000"));
            assert_eq!(stored.reserved_amount_usd, Some(42.0));
        }

        #[test]
        fn test_denied_writes_nothing() {
            let (store, wallet) = setup();
            store
                .insert_policy(&Policy::new(
                    PolicyType::Whitelist,
                    json!({"allowed_addresses": ["Friend"]}),
                ))
                .unwrap();
            let tx = new_tx(&store, &wallet, SOL);
            let decision = engine(&store).evaluate_and_reserve(&tx, Some(5.0), Utc::now()).unwrap();
            assert!(!decision.allowed);

            let stored = store.get_transaction(tx.id).unwrap();
            assert!(stored.tier.is_none());
            assert!(stored.reserved_amount_usd.is_none());
        }

        #[test]
        fn test_concurrent_requests_see_each_other() {
            let (store, wallet) = setup();
            spending(&store, &wallet, json!({"daily_limit_usd": 100.0}));
            let engine = Arc::new(engine(&store));

            let txs = [new_tx(&store, &wallet, SOL), new_tx(&store, &wallet, SOL)];
            let handles: Vec<_> = txs
                .into_iter()
                .map(|tx| {
                    let engine = Arc::clone(&engine);
                    std::thread::spawn(move || {
                        engine.evaluate_and_reserve(&tx, Some(60.0), Utc::now()).unwrap()
                    })
                })
                .collect();
            let tiers: Vec<Tier> = handles.into_iter().map(|h| h.join().unwrap().tier).collect();

            assert_eq!(tiers.iter().filter(|t| **t == Tier::Approval).count(), 1);
            assert_eq!(tiers.iter().filter(|t| **t != Tier::Approval).count(), 1);
        }

        #[test]
        fn test_released_reservations_not_counted() {
            let (store, wallet) = setup();
            spending(&store, &wallet, json!({"daily_limit_usd": 100.0}));
            let engine = engine(&store);

            let cancelled = new_tx(&store, &wallet, SOL);
            engine.evaluate_and_reserve(&cancelled, Some(70.0), Utc::now()).unwrap();
            store
                .transition(cancelled.id, &[TxStatus::Pending], TxStatus::Cancelled)
                .unwrap();

            let expired = new_tx(&store, &wallet, SOL);
            engine.evaluate_and_reserve(&expired, Some(70.0), Utc::now()).unwrap();
            store
                .transition(expired.id, &[TxStatus::Pending], TxStatus::Expired)
                .unwrap();

            let tx = new_tx(&store, &wallet, SOL);
            let decision = engine.evaluate_and_reserve(&tx, Some(50.0), Utc::now()).unwrap();
            assert_eq!(decision.tier, Tier::Instant);
        }

        #[test]
        fn test_split_transfers_accumulate_native() {
            let (store, wallet) = setup();
            spending(
                &store,
                &wallet,
                json!({
                    "instant_max": SOL.to_string(),
                    "notify_max": (10 * SOL).to_string(),
                    "delay_max": (50 * SOL).to_string(),
                    "delay_seconds": 900
                }),
            );
            let engine = engine(&store);

            let tiers: Vec<Tier> = (0..3)
                .map(|_| {
                    let tx = new_tx(&store, &wallet, 8 * SOL / 10);
                    engine.evaluate_and_reserve(&tx, None, Utc::now()).unwrap().tier
                })
                .collect();
            assert_eq!(tiers, vec![Tier::Instant, Tier::Notify, Tier::Notify]);
            assert_eq!(store.reserved_native(wallet.id).unwrap(), 24 * SOL / 10);
        }

        #[test]
        fn test_settled_native_is_released() {
            let (store, wallet) = setup();
            spending(&store, &wallet, json!({ "instant_max": SOL.to_string(), "delay_seconds": 60 }));
            let engine = engine(&store);

            let done = new_tx(&store, &wallet, 8 * SOL / 10);
            engine.evaluate_and_reserve(&done, None, Utc::now()).unwrap();
            confirm(&store, &done);
            let cancelled = new_tx(&store, &wallet, 8 * SOL / 10);
            engine.evaluate_and_reserve(&cancelled, None, Utc::now()).unwrap();
            store
                .transition(cancelled.id, &[TxStatus::Pending], TxStatus::Cancelled)
                .unwrap();
            assert_eq!(store.reserved_native(wallet.id).unwrap(), 0);

            let tx = new_tx(&store, &wallet, 8 * SOL / 10);
            let decision = engine.evaluate_and_reserve(&tx, None, Utc::now()).unwrap();
            assert_eq!(decision.tier, Tier::Instant);
        }

        #[test]
        fn test_ledger_snapshot_windows() {
            let (store, wallet) = setup();
            let tx = new_tx(&store, &wallet, SOL);
            {
                let conn = store.conn();
                transactions::write_reservation(&conn, tx.id, Tier::Instant, Some(12.5), "1")
                    .unwrap();
            }
            let conn = store.conn();
            let snapshot = ReservationLedger::snapshot(&conn, wallet.id, Utc::now()).unwrap();
            assert_eq!(
                snapshot,
                SpendSnapshot {
                    daily: 12.5,
                    monthly: 12.5,
                    reserved_native: 1
                }
            );

            ReservationLedger::release(&conn, tx.id).unwrap();
            let snapshot = ReservationLedger::snapshot(&conn, wallet.id, Utc::now()).unwrap();
            assert_eq!(snapshot.daily, 0.0);
            assert_eq!(snapshot.reserved_native, 0);
        }

        #[test]
        fn test_preview_reserves_nothing() {
            let (store, wallet) = setup();
            let decision = engine(&store)
                .preview(wallet.id, "devnet", &transfer("Dest", SOL), Some(5.0), Utc::now())
                .unwrap();
            assert!(decision.allowed);
            let snapshot =
                ReservationLedger::snapshot(&store.conn(), wallet.id, Utc::now()).unwrap();
            assert_eq!(snapshot.daily, 0.0);
        }
    }
}
