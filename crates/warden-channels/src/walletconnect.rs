//! WalletConnect-style relay bridge.
//!
//! The daemon does not speak the relay protocol itself: it POSTs the sign
//! request to a bridge service, which pairs with the owner's wallet and
//! returns the response through the daemon's sign-response endpoint.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use warden_config::schema::WalletConnectConfig;
use warden_core::{ApprovalMethod, Result};

use crate::adapter::{SignDispatch, SigningChannel, channel_err};

pub struct WalletConnectChannel {
    config: WalletConnectConfig,
    client: reqwest::Client,
}

impl WalletConnectChannel {
    pub fn new(config: WalletConnectConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }
}

#[async_trait]
impl SigningChannel for WalletConnectChannel {
    fn method(&self) -> ApprovalMethod {
        ApprovalMethod::Walletconnect
    }

    fn is_available(&self) -> bool {
        self.config.enabled
            && self
                .config
                .relay_url
                .as_deref()
                .is_some_and(|u| !u.trim().is_empty())
    }

    async fn send_request(&self, dispatch: &SignDispatch) -> Result<()> {
        let Some(relay) = self.config.relay_url.as_deref() else {
            return Err(channel_err("walletconnect", "relay_url is not configured"));
        };
        let body = serde_json::json!({
            "projectId": self.config.project_id,
            "walletId": dispatch.wallet_id,
            "request": dispatch.request,
            "universalLink": dispatch.universal_link,
        });
        let resp = self
            .client
            .post(relay)
            .json(&body)
            .send()
            .await
            .map_err(|e| channel_err("walletconnect", e))?;
        if !resp.status().is_success() {
            return Err(channel_err(
                "walletconnect",
                format!("relay rejected request: HTTP {}", resp.status()),
            ));
        }
        debug!(request_id = %dispatch.request.request_id, "sign request handed to relay");
        Ok(())
    }
}
