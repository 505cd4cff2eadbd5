#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use uuid::Uuid;
    use warden_channels::*;
    use warden_config::WardenConfig;
    use warden_config::schema::{NtfyConfig, TelegramConfig, WalletConnectConfig};
    use warden_core::mock::RecordingNotifier;
    use warden_core::protocol::{ResponseChannel, SIGN_PROTOCOL_VERSION, SignMetadata};
    use warden_core::*;

    fn dispatch() -> SignDispatch {
        let request_id = Uuid::new_v4();
        SignDispatch {
            wallet_id: Uuid::new_v4(),
            universal_link: "https://warden.dev/sign?data=abc".into(),
            request: SignRequest {
                version: SIGN_PROTOCOL_VERSION.into(),
                request_id,
                chain: "solana".into(),
                network: "devnet".into(),
                message: "Warden transaction approval".into(),
                display_message: "TRANSFER 5 SOL to Dest".into(),
                metadata: SignMetadata {
                    tx_id: Uuid::new_v4(),
                    tx_type: "TRANSFER".into(),
                    from: "Agent".into(),
                    to: "Dest".into(),
                    amount: Some("5".into()),
                    symbol: Some("SOL".into()),
                    policy_tier: Tier::Approval,
                },
                response_channel: ResponseChannel::Ntfy {
                    response_topic: format!("warden-response-{request_id}"),
                    server_url: None,
                },
                expires_at: Utc::now() + Duration::minutes(30),
            },
        }
    }

    fn response(request_id: Uuid) -> SignResponse {
        SignResponse {
            version: SIGN_PROTOCOL_VERSION.into(),
            request_id,
            action: SignAction::Approve,
            signature: Some("sig".into()),
            signer_address: "Owner".into(),
            signed_at: Utc::now(),
        }
    }

    mod encoding {
        use super::*;

        #[test]
        fn test_decode_encoded_response() {
            let original = response(Uuid::new_v4());
            let encoded = encode_payload(&original).unwrap();
            assert!(!encoded.contains('='));
            assert_eq!(decode_sign_response(&encoded).unwrap(), original);
        }

        #[test]
        fn test_decode_tolerates_padding() {
            let original = response(Uuid::new_v4());
            let encoded = format!("{}==", encode_payload(&original).unwrap());
            assert_eq!(decode_sign_response(&encoded).unwrap().request_id, original.request_id);
        }

        #[test]
        fn test_decode_garbage() {
            let err = decode_sign_response("!!not base64!!").unwrap_err();
            assert_eq!(err.code(), "INVALID_SIGN_RESPONSE");
        }
    }

    mod ntfy {
        use super::*;
        use warden_channels::ntfy::{parse_sse_line, request_topic, response_topic};

        #[test]
        fn test_parse_sse_data_line() {
            let msg = parse_sse_line(r#"data: {"id":"x1","event":"message","topic":"t","message":"abc"}"#)
                .unwrap();
            assert_eq!(msg.message.as_deref(), Some("abc"));
            assert_eq!(msg.topic.as_deref(), Some("t"));
        }

        #[test]
        fn test_parse_sse_ignores_other_lines() {
            assert!(parse_sse_line("event: message").is_none());
            assert!(parse_sse_line("data: ").is_none());
            assert!(parse_sse_line("data: not-json").is_none());
        }

        #[test]
        fn test_topics() {
            let config = NtfyConfig::default();
            let d = dispatch();
            assert_eq!(
                request_topic(&config, d.wallet_id),
                format!("warden-sign-{}", d.wallet_id)
            );
            assert_eq!(
                response_topic(&config, &d),
                format!("warden-response-{}", d.request.request_id)
            );
        }

        #[test]
        fn test_response_topic_fallback() {
            let config = NtfyConfig::default();
            let mut d = dispatch();
            d.request.response_channel = ResponseChannel::Rest;
            assert_eq!(
                response_topic(&config, &d),
                format!("warden-response-{}", d.request.request_id)
            );
        }

        #[tokio::test]
        async fn test_disabled_channel_unavailable() {
            let (tx, _rx) = tokio::sync::mpsc::channel(8);
            let channel = NtfyChannel::new(NtfyConfig::default(), tx);
            assert!(!channel.is_available());
            assert_eq!(channel.method(), ApprovalMethod::SdkNtfy);
            assert_eq!(channel.active_subscriptions(), 0);
        }

        #[test]
        fn test_notifier_needs_topic() {
            let mut config = NtfyConfig {
                enabled: true,
                ..Default::default()
            };
            assert!(NtfyNotifier::from_config(&config).is_none());
            config.notify_topic = Some("ops".into());
            assert!(NtfyNotifier::from_config(&config).is_some());
        }
    }

    mod telegram {
        use super::*;
        use serde_json::json;
        use warden_channels::telegram::{backoff_duration, escape_markdown_v2, parse_update};

        const ADMIN: i64 = 4242;

        #[test]
        fn test_callback_from_admin() {
            let tx_id = Uuid::new_v4();
            let update = json!({
                "update_id": 1,
                "callback_query": {
                    "id": "cb1",
                    "data": format!("approve:{tx_id}"),
                    "from": {"id": 7},
                    "message": {"chat": {"id": ADMIN}},
                }
            });
            match parse_update(&update, Some(ADMIN)) {
                Some(ChannelEvent::Decision { tx_id: id, action, sender, .. }) => {
                    assert_eq!(id, tx_id);
                    assert_eq!(action, SignAction::Approve);
                    assert_eq!(sender, "7");
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_callback_from_stranger_ignored() {
            let update = json!({
                "callback_query": {
                    "id": "cb1",
                    "data": format!("reject:{}", Uuid::new_v4()),
                    "from": {"id": 9},
                    "message": {"chat": {"id": 1}},
                }
            });
            assert!(parse_update(&update, Some(ADMIN)).is_none());
            assert!(parse_update(&update, None).is_none());
        }

        #[test]
        fn test_reject_command() {
            let tx_id = Uuid::new_v4();
            let update = json!({
                "message": {"text": format!("/reject {tx_id}"), "chat": {"id": ADMIN}, "from": {"id": 7}}
            });
            assert!(matches!(
                parse_update(&update, Some(ADMIN)),
                Some(ChannelEvent::Decision { action: SignAction::Reject, .. })
            ));
        }

        #[test]
        fn test_sign_response_command_any_chat() {
            let resp = response(Uuid::new_v4());
            let update = json!({
                "message": {
                    "text": format!("/sign_response {}", encode_payload(&resp).unwrap()),
                    "chat": {"id": 99},
                    "from": {"id": 99},
                }
            });
            match parse_update(&update, Some(ADMIN)) {
                Some(ChannelEvent::SignResponse { response, channel }) => {
                    assert_eq!(response, resp);
                    assert_eq!(channel, ApprovalMethod::SdkTelegram);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_plain_chatter_ignored() {
            let update = json!({"message": {"text": "hello", "chat": {"id": ADMIN}}});
            assert!(parse_update(&update, Some(ADMIN)).is_none());
        }

        #[test]
        fn test_escape_markdown() {
            assert_eq!(escape_markdown_v2("5.0 SOL (dev)"), "5\\.0 SOL \\(dev\\)");
        }

        #[test]
        fn test_backoff_bounded() {
            for n in 0..10 {
                let d = backoff_duration(n, 60);
                assert!(d.as_millis() >= 500);
                assert!(d.as_secs() <= 75);
            }
        }

        #[test]
        fn test_availability() {
            let config = TelegramConfig {
                enabled: true,
                bot_token: Some("123:abc".into()),
                admin_chat_id: Some(ADMIN),
                ..Default::default()
            };
            let api = TelegramApi::from_config(&config);
            assert!(api.is_some());
            assert!(TelegramBotChannel::new(api.clone(), &config).is_available());
            // Falls back to the admin chat when no owner chat is set.
            assert!(TelegramSigningChannel::new(api, &config).is_available());

            let disabled = TelegramConfig::default();
            assert!(TelegramApi::from_config(&disabled).is_none());
            assert!(!TelegramBotChannel::new(None, &disabled).is_available());
        }
    }

    mod rest {
        use super::*;

        #[tokio::test]
        async fn test_queue_and_cancel() {
            let channel = RestChannel::new(8);
            let d = dispatch();
            channel.send_request(&d).await.unwrap();
            channel.send_request(&d).await.unwrap();
            assert_eq!(channel.len(), 1);
            assert!(channel.get(d.request.request_id).is_some());

            channel.cancel(d.request.request_id);
            assert!(channel.is_empty());
        }

        #[tokio::test]
        async fn test_bounded() {
            let channel = RestChannel::new(2);
            let first = dispatch();
            channel.send_request(&first).await.unwrap();
            channel.send_request(&dispatch()).await.unwrap();
            channel.send_request(&dispatch()).await.unwrap();
            assert_eq!(channel.len(), 2);
            assert!(channel.get(first.request.request_id).is_none());
        }
    }

    mod router {
        use super::*;

        struct FakeChannel {
            method: ApprovalMethod,
            available: bool,
            fail: bool,
            sent: AtomicUsize,
        }

        impl FakeChannel {
            fn new(method: ApprovalMethod, available: bool) -> Arc<Self> {
                Arc::new(Self {
                    method,
                    available,
                    fail: false,
                    sent: AtomicUsize::new(0),
                })
            }

            fn failing(method: ApprovalMethod) -> Arc<Self> {
                Arc::new(Self {
                    method,
                    available: true,
                    fail: true,
                    sent: AtomicUsize::new(0),
                })
            }
        }

        #[async_trait]
        impl SigningChannel for FakeChannel {
            fn method(&self) -> ApprovalMethod {
                self.method
            }

            fn is_available(&self) -> bool {
                self.available
            }

            async fn send_request(&self, _: &SignDispatch) -> Result<()> {
                if self.fail {
                    return Err(WardenError::Channel {
                        channel: self.method.to_string(),
                        reason: "down".into(),
                    });
                }
                self.sent.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        #[test]
        fn test_priority_order() {
            let router = ChannelRouter::new()
                .with_channel(FakeChannel::new(ApprovalMethod::Rest, true))
                .with_channel(FakeChannel::new(ApprovalMethod::TelegramBot, true))
                .with_channel(FakeChannel::new(ApprovalMethod::SdkNtfy, true));
            assert_eq!(router.select(None).unwrap(), ApprovalMethod::SdkNtfy);
            assert_eq!(
                router.available(),
                vec![ApprovalMethod::SdkNtfy, ApprovalMethod::TelegramBot, ApprovalMethod::Rest]
            );
        }

        #[test]
        fn test_preferred_method_wins() {
            let router = ChannelRouter::new()
                .with_channel(FakeChannel::new(ApprovalMethod::SdkNtfy, true))
                .with_channel(FakeChannel::new(ApprovalMethod::TelegramBot, true));
            assert_eq!(
                router.select(Some(ApprovalMethod::TelegramBot)).unwrap(),
                ApprovalMethod::TelegramBot
            );
        }

        #[test]
        fn test_disabled_preference_falls_through() {
            let router = ChannelRouter::new()
                .with_channel(FakeChannel::new(ApprovalMethod::SdkNtfy, false))
                .with_channel(FakeChannel::new(ApprovalMethod::Walletconnect, true))
                .with_channel(FakeChannel::new(ApprovalMethod::Rest, true));
            assert_eq!(
                router.select(Some(ApprovalMethod::SdkNtfy)).unwrap(),
                ApprovalMethod::Walletconnect
            );
        }

        #[test]
        fn test_nothing_available() {
            let router = ChannelRouter::new()
                .with_channel(FakeChannel::new(ApprovalMethod::SdkNtfy, false));
            assert_eq!(router.select(None).unwrap_err().code(), "NO_CHANNEL_AVAILABLE");
        }

        #[tokio::test]
        async fn test_route_falls_back_on_failure() {
            let rest = FakeChannel::new(ApprovalMethod::Rest, true);
            let router = ChannelRouter::new()
                .with_channel(FakeChannel::failing(ApprovalMethod::SdkNtfy))
                .with_channel(rest.clone());
            let (method, _) = router.route(None, |_| Ok(dispatch())).await.unwrap();
            assert_eq!(method, ApprovalMethod::Rest);
            assert_eq!(rest.sent.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_route_builds_per_channel() {
            let router = ChannelRouter::new()
                .with_channel(FakeChannel::failing(ApprovalMethod::SdkNtfy))
                .with_channel(FakeChannel::new(ApprovalMethod::Rest, true));
            let mut built = Vec::new();
            let (method, sent) = router
                .route(None, |method| {
                    built.push(method);
                    let mut d = dispatch();
                    if method == ApprovalMethod::Rest {
                        d.request.response_channel = ResponseChannel::Rest;
                    }
                    Ok(d)
                })
                .await
                .unwrap();
            assert_eq!(method, ApprovalMethod::Rest);
            assert_eq!(built, vec![ApprovalMethod::SdkNtfy, ApprovalMethod::Rest]);
            assert_eq!(sent.request.response_channel, ResponseChannel::Rest);
        }

        #[tokio::test]
        async fn test_unbuildable_channel_is_skipped() {
            let ntfy = FakeChannel::new(ApprovalMethod::SdkNtfy, true);
            let router = ChannelRouter::new()
                .with_channel(ntfy.clone())
                .with_channel(FakeChannel::new(ApprovalMethod::Rest, true));
            let (method, _) = router
                .route(None, |method| match method {
                    ApprovalMethod::SdkNtfy => Err(WardenError::Validation("no topic".into())),
                    _ => Ok(dispatch()),
                })
                .await
                .unwrap();
            assert_eq!(method, ApprovalMethod::Rest);
            assert_eq!(ntfy.sent.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_default_config_routes_to_rest() {
            let (tx, _rx) = tokio::sync::mpsc::channel(8);
            let router = ChannelRouter::from_config(&WardenConfig::default(), None, tx);
            assert_eq!(router.available(), vec![ApprovalMethod::Rest]);

            let (method, d) = router.route(None, |_| Ok(dispatch())).await.unwrap();
            assert_eq!(method, ApprovalMethod::Rest);
            assert_eq!(router.rest().unwrap().len(), 1);

            router.cancel(d.request.request_id);
            assert!(router.rest().unwrap().is_empty());
        }

        #[test]
        fn test_walletconnect_needs_relay() {
            let mut config = WalletConnectConfig {
                enabled: true,
                ..Default::default()
            };
            assert!(!WalletConnectChannel::new(config.clone()).is_available());
            config.relay_url = Some("https://relay.example/bridge".into());
            assert!(WalletConnectChannel::new(config).is_available());
        }
    }

    mod notifications {
        use super::*;

        #[tokio::test]
        async fn test_ordinary_event_first_success() {
            let failing = Arc::new(RecordingNotifier::failing("a"));
            let second = Arc::new(RecordingNotifier::new("b"));
            let third = Arc::new(RecordingNotifier::new("c"));
            let service = NotificationService::new()
                .with_notifier(failing)
                .with_notifier(second.clone())
                .with_notifier(third.clone());

            let delivered = service
                .notify(&Notification::new(NotificationEvent::TxConfirmed, None))
                .await
                .unwrap();
            assert_eq!(delivered, 1);
            assert_eq!(second.events(), vec![NotificationEvent::TxConfirmed]);
            assert!(third.events().is_empty());
        }

        #[tokio::test]
        async fn test_critical_event_broadcasts() {
            let a = Arc::new(RecordingNotifier::new("a"));
            let b = Arc::new(RecordingNotifier::failing("b"));
            let c = Arc::new(RecordingNotifier::new("c"));
            let service = NotificationService::new()
                .with_notifier(a.clone())
                .with_notifier(b)
                .with_notifier(c.clone());

            let delivered = service
                .notify(&Notification::new(NotificationEvent::KillSwitchActivated, None))
                .await
                .unwrap();
            assert_eq!(delivered, 2);
            assert_eq!(a.events(), vec![NotificationEvent::KillSwitchActivated]);
            assert_eq!(c.events(), vec![NotificationEvent::KillSwitchActivated]);
        }

        #[tokio::test]
        async fn test_all_fail() {
            let service = NotificationService::new()
                .with_notifier(Arc::new(RecordingNotifier::failing("a")));
            let err = service
                .notify(&Notification::new(NotificationEvent::TxFailed, None))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "NO_CHANNEL_AVAILABLE");
        }

        #[tokio::test]
        async fn test_empty_service_is_noop() {
            let delivered = NotificationService::new()
                .notify(&Notification::new(NotificationEvent::TxFailed, None))
                .await
                .unwrap();
            assert_eq!(delivered, 0);
        }

        #[test]
        fn test_render_text() {
            let n = Notification::new(NotificationEvent::TxFailed, None)
                .with_body("transfer failed")
                .with_var("amount", "5")
                .with_var("error", "simulation");
            assert_eq!(
                warden_channels::notify::render_text(&n),
                "transfer failed\namount: 5\nerror: simulation"
            );
        }
    }
}
