#[cfg(test)]
mod tests {
    use warden_core::network::{default_network, networks_for, resolve_network};
    use warden_core::protocol::SIGN_PROTOCOL_VERSION;
    use warden_core::request::{UINT256_MAX, cmp_amounts, parse_allowance, parse_amount};
    use warden_core::*;

    fn transfer(amount: &str) -> TransactionRequest {
        TransactionRequest::Transfer {
            to: "Dest111".into(),
            amount: amount.into(),
            memo: None,
            network: None,
        }
    }

    fn usdc() -> TokenRef {
        TokenRef {
            address: "EPjFWdd5".into(),
            decimals: 6,
            symbol: "USDC".into(),
        }
    }

    // ── Tier tests ─────────────────────────────────────────────

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Instant < Tier::Notify);
        assert!(Tier::Notify < Tier::Delay);
        assert!(Tier::Delay < Tier::Approval);
        assert_eq!(Tier::Notify.max(Tier::Approval), Tier::Approval);
    }

    #[test]
    fn test_tier_halts() {
        assert!(!Tier::Instant.halts());
        assert!(!Tier::Notify.halts());
        assert!(Tier::Delay.halts());
        assert!(Tier::Approval.halts());
    }

    #[test]
    fn test_tier_parse_and_display() {
        for tier in [Tier::Instant, Tier::Notify, Tier::Delay, Tier::Approval] {
            assert_eq!(tier.to_string().parse::<Tier>().unwrap(), tier);
        }
        assert!("SOMETIMES".parse::<Tier>().is_err());
    }

    #[test]
    fn test_status_terminal_and_reservation() {
        assert!(TxStatus::Confirmed.is_terminal());
        assert!(TxStatus::Expired.is_terminal());
        assert!(!TxStatus::Submitted.is_terminal());
        assert!(TxStatus::Pending.holds_reservation());
        assert!(TxStatus::Queued.holds_reservation());
        assert!(!TxStatus::Executing.holds_reservation());
    }

    #[test]
    fn test_chain_accepts_evm_alias() {
        assert_eq!("evm".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!(Chain::Ethereum.protocol_name(), "evm");
        assert_eq!(Chain::Solana.native_decimals(), 9);
    }

    #[test]
    fn test_approval_method_priority_order() {
        assert_eq!(ApprovalMethod::PRIORITY[0], ApprovalMethod::SdkNtfy);
        assert_eq!(ApprovalMethod::PRIORITY[4], ApprovalMethod::Rest);
        assert_eq!(
            "telegram_bot".parse::<ApprovalMethod>().unwrap(),
            ApprovalMethod::TelegramBot
        );
    }

    // ── Network tests ──────────────────────────────────────────

    #[test]
    fn test_request_network_wins() {
        let n = resolve_network(
            Some("testnet"),
            Some("devnet"),
            Environment::Testnet,
            Chain::Solana,
        )
        .unwrap();
        assert_eq!(n, "testnet");
    }

    #[test]
    fn test_wallet_default_then_environment_default() {
        let n = resolve_network(None, Some("polygon-amoy"), Environment::Testnet, Chain::Ethereum)
            .unwrap();
        assert_eq!(n, "polygon-amoy");

        let n = resolve_network(None, None, Environment::Mainnet, Chain::Ethereum).unwrap();
        assert_eq!(n, "ethereum-mainnet");
        assert_eq!(default_network(Chain::Solana, Environment::Testnet), "devnet");
    }

    #[test]
    fn test_cross_environment_network_rejected() {
        let err = resolve_network(Some("mainnet"), None, Environment::Testnet, Chain::Solana)
            .unwrap_err();
        assert_eq!(err.code(), "NETWORK_MISMATCH");

        let err = resolve_network(Some("devnet"), None, Environment::Testnet, Chain::Ethereum)
            .unwrap_err();
        assert!(matches!(err, WardenError::NetworkMismatch(_)));
    }

    #[test]
    fn test_network_lists() {
        assert_eq!(networks_for(Chain::Ethereum, Environment::Mainnet).len(), 5);
        assert!(networks_for(Chain::Solana, Environment::Testnet).contains(&"testnet"));
    }

    // ── Request tests ──────────────────────────────────────────

    #[test]
    fn test_request_deserializes_from_type_tag() {
        let raw = r#"{"type":"TRANSFER","to":"abc","amount":"1000"}"#;
        let req: TransactionRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.tx_type(), TxType::Transfer);
        assert_eq!(req.native_amount().unwrap(), 1000);
        assert!(req.network().is_none());
    }

    #[test]
    fn test_amount_must_be_integer_string() {
        assert!(parse_amount("12").is_ok());
        assert!(parse_amount("").is_err());
        assert!(parse_amount("1.5").is_err());
        assert!(parse_amount("-3").is_err());
        assert!(transfer("abc").validate().is_err());
    }

    #[test]
    fn test_allowance_spans_uint256() {
        assert_eq!(parse_allowance(UINT256_MAX).unwrap(), UINT256_MAX);
        assert_eq!(parse_allowance("000").unwrap(), "0");
        let over = "115792089237316195423570985008687907853269984665640564039457584007913129639936";
        assert!(parse_allowance(over).is_err());
        assert!(parse_allowance("0x10").is_err());

        let approve = TransactionRequest::Approve {
            spender: "Spender".into(),
            token: usdc(),
            amount: UINT256_MAX.into(),
            network: None,
        };
        assert!(approve.validate().is_ok());
        assert_eq!(approve.native_amount().unwrap(), 0);
    }

    #[test]
    fn test_amounts_compare_numerically() {
        use std::cmp::Ordering;
        assert_eq!(cmp_amounts("9", "10"), Ordering::Less);
        assert_eq!(cmp_amounts("0010", "10"), Ordering::Equal);
        assert_eq!(cmp_amounts(UINT256_MAX, "1"), Ordering::Greater);
    }

    #[test]
    fn test_token_transfer_moves_no_native_value() {
        let req = TransactionRequest::TokenTransfer {
            to: "Dest".into(),
            amount: "5000000".into(),
            token: usdc(),
            memo: None,
            network: None,
        };
        req.validate().unwrap();
        assert_eq!(req.native_amount().unwrap(), 0);
        assert_eq!(req.token().unwrap().symbol, "USDC");
    }

    #[test]
    fn test_batch_bounds() {
        let one = TransactionRequest::Batch {
            instructions: vec![BatchInstruction::Transfer {
                to: "a".into(),
                amount: "1".into(),
            }],
            network: None,
        };
        assert!(one.validate().is_err());

        let ok = TransactionRequest::Batch {
            instructions: vec![
                BatchInstruction::Transfer {
                    to: "a".into(),
                    amount: "10".into(),
                },
                BatchInstruction::ContractCall {
                    to: "b".into(),
                    calldata: None,
                    value: Some("5".into()),
                },
                BatchInstruction::Approve {
                    spender: "c".into(),
                    token: usdc(),
                    amount: "100".into(),
                },
            ],
            network: None,
        };
        ok.validate().unwrap();
        assert_eq!(ok.native_amount().unwrap(), 15);
        assert_eq!(ok.destinations(), vec!["a", "b", "c"]);

        let too_many = TransactionRequest::Batch {
            instructions: (0..21)
                .map(|i| BatchInstruction::Transfer {
                    to: format!("d{i}"),
                    amount: "1".into(),
                })
                .collect(),
            network: None,
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_pending_transaction_row() {
        let wallet = uuid::Uuid::new_v4();
        let tx = Transaction::pending(
            wallet,
            None,
            "devnet".into(),
            transfer("42"),
            chrono::Utc::now(),
        );
        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.amount, "42");
        assert_eq!(tx.to_address.as_deref(), Some("Dest111"));
        assert!(tx.tier.is_none());
    }

    // ── Protocol tests ─────────────────────────────────────────

    #[test]
    fn test_sign_response_camel_case() {
        let raw = format!(
            r#"{{"version":"{SIGN_PROTOCOL_VERSION}","requestId":"{}","action":"approve","signature":"sig","signerAddress":"Owner","signedAt":"2026-01-01T00:00:00Z"}}"#,
            uuid::Uuid::new_v4()
        );
        let resp = SignResponse::from_json(&raw).unwrap();
        assert_eq!(resp.action, SignAction::Approve);
        resp.validate().unwrap();
    }

    #[test]
    fn test_sign_response_approve_needs_signature() {
        let resp = SignResponse {
            version: SIGN_PROTOCOL_VERSION.into(),
            request_id: uuid::Uuid::new_v4(),
            action: SignAction::Approve,
            signature: None,
            signer_address: "Owner".into(),
            signed_at: chrono::Utc::now(),
        };
        assert_eq!(resp.validate().unwrap_err().code(), "INVALID_SIGN_RESPONSE");

        let reject = SignResponse {
            action: SignAction::Reject,
            ..resp.clone()
        };
        assert!(reject.validate().is_ok());

        let bad_version = SignResponse {
            version: "2".into(),
            ..reject
        };
        assert!(bad_version.validate().is_err());
    }

    #[test]
    fn test_sign_response_garbage_is_invalid() {
        let err = SignResponse::from_json("{not json").unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGN_RESPONSE");
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_codes() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(WardenError::ApprovalTimeout(id).code(), "APPROVAL_TIMEOUT");
        assert_eq!(
            WardenError::SignRequestAlreadyProcessed(id).code(),
            "SIGN_REQUEST_ALREADY_PROCESSED"
        );
        let err = WardenError::SignerAddressMismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        assert!(err.to_string().contains("expected a"));
    }

    // ── Event bus tests ────────────────────────────────────────

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Event::Shutdown);
        assert!(matches!(rx.recv().await.unwrap(), Event::Shutdown));
    }

    #[test]
    fn test_event_bus_without_subscribers() {
        let bus = EventBus::new(8);
        bus.publish(Event::Shutdown);
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let ev = Event::KillSwitchChanged {
            from: KillSwitchState::Active,
            to: KillSwitchState::Suspended,
            by: "owner".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "kill_switch_changed");
        assert_eq!(json["to"], "SUSPENDED");
    }

    #[test]
    fn test_notification_broadcast_events() {
        assert!(NotificationEvent::KillSwitchActivated.is_broadcast());
        assert!(NotificationEvent::AutoStopTriggered.is_broadcast());
        assert!(!NotificationEvent::TxNotify.is_broadcast());
    }
}
