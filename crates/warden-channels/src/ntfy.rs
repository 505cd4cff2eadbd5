//! ntfy push channel.
//!
//! Sign requests are published as base64url JSON to
//! `{request_topic_prefix}-{wallet_id}`. The wallet app answers on the
//! per-request response topic, which the daemon follows over SSE until a
//! matching response arrives, the request expires, or reconnects run out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_config::schema::NtfyConfig;
use warden_core::protocol::ResponseChannel;
use warden_core::{ApprovalMethod, Notification, Notifier, Result, WalletId};

use crate::adapter::{ChannelEvent, SignDispatch, SigningChannel, channel_err, decode_sign_response};

/// A message as ntfy streams it on `/{topic}/sse`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NtfyMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Parse one SSE line. Only `data:` lines with JSON payloads yield messages.
pub fn parse_sse_line(line: &str) -> Option<NtfyMessage> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    serde_json::from_str(data).ok()
}

pub fn request_topic(config: &NtfyConfig, wallet_id: WalletId) -> String {
    format!("{}-{}", config.request_topic_prefix, wallet_id)
}

pub fn response_topic(config: &NtfyConfig, dispatch: &SignDispatch) -> String {
    match &dispatch.request.response_channel {
        ResponseChannel::Ntfy { response_topic, .. } => response_topic.clone(),
        _ => format!("{}-{}", config.response_topic_prefix, dispatch.request.request_id),
    }
}

pub struct NtfyChannel {
    config: NtfyConfig,
    client: reqwest::Client,
    events: mpsc::Sender<ChannelEvent>,
    subscriptions: Arc<DashMap<Uuid, CancellationToken>>,
}

impl NtfyChannel {
    pub fn new(config: NtfyConfig, events: mpsc::Sender<ChannelEvent>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            client,
            events,
            subscriptions: Arc::new(DashMap::new()),
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    async fn publish(&self, dispatch: &SignDispatch) -> Result<()> {
        let topic = request_topic(&self.config, dispatch.wallet_id);
        let body = serde_json::json!({
            "topic": topic,
            "message": dispatch.encoded()?,
            "title": dispatch.request.display_message,
            "priority": 5,
            "tags": ["warden", "sign"],
            "click": dispatch.universal_link,
            "actions": [{
                "action": "view",
                "label": "Sign in wallet",
                "url": dispatch.universal_link,
            }],
        });

        let resp = self
            .client
            .post(self.config.server.trim_end_matches('/'))
            .json(&body)
            .send()
            .await
            .map_err(|e| channel_err("ntfy", e))?;
        if !resp.status().is_success() {
            return Err(channel_err(
                "ntfy",
                format!("publish to {topic} failed: HTTP {}", resp.status()),
            ));
        }
        debug!(%topic, request_id = %dispatch.request.request_id, "sign request published");
        Ok(())
    }

    fn subscribe(&self, dispatch: &SignDispatch) {
        let request_id = dispatch.request.request_id;
        let token = CancellationToken::new();
        if let Some(previous) = self.subscriptions.insert(request_id, token.clone()) {
            previous.cancel();
        }

        let url = format!(
            "{}/{}/sse",
            self.config.server.trim_end_matches('/'),
            response_topic(&self.config, dispatch)
        );
        let ttl = (dispatch.request.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let watch = SseWatch {
            client: self.client.clone(),
            url,
            request_id,
            attempts: self.config.reconnect_attempts,
            delay: Duration::from_secs(self.config.reconnect_delay_secs),
            events: self.events.clone(),
        };
        let subscriptions = Arc::clone(&self.subscriptions);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!(%request_id, "ntfy subscription cancelled"),
                _ = tokio::time::sleep(ttl) => debug!(%request_id, "ntfy subscription expired"),
                _ = watch.run() => {}
            }
            subscriptions.remove(&request_id);
        });
    }
}

struct SseWatch {
    client: reqwest::Client,
    url: String,
    request_id: Uuid,
    attempts: u32,
    delay: Duration,
    events: mpsc::Sender<ChannelEvent>,
}

impl SseWatch {
    /// Follow the stream until a matching response is delivered or every
    /// reconnect attempt has failed.
    async fn run(self) {
        let mut reconnects = 0;
        loop {
            match self.stream_once().await {
                Ok(true) => return,
                Ok(false) => debug!(request_id = %self.request_id, "ntfy stream ended"),
                Err(e) => warn!(request_id = %self.request_id, error = %e, "ntfy stream failed"),
            }
            if reconnects >= self.attempts {
                warn!(request_id = %self.request_id, "ntfy reconnect attempts exhausted");
                return;
            }
            reconnects += 1;
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Returns `Ok(true)` once a response for this request was forwarded.
    async fn stream_once(&self) -> Result<bool> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| channel_err("ntfy", e))?;
        if !resp.status().is_success() {
            return Err(channel_err("ntfy", format!("sse connect: HTTP {}", resp.status())));
        }

        let mut stream = resp.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| channel_err("ntfy", e))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let Some(msg) = parse_sse_line(line.trim_end()) else {
                    continue;
                };
                let Some(payload) = msg.message.as_deref() else {
                    continue;
                };
                let response = match decode_sign_response(payload) {
                    Ok(r) => r,
                    Err(e) => {
                        debug!(error = %e, "ignoring malformed ntfy message");
                        continue;
                    }
                };
                if response.request_id != self.request_id {
                    continue;
                }
                info!(request_id = %self.request_id, "sign response received via ntfy");
                let _ = self
                    .events
                    .send(ChannelEvent::SignResponse {
                        channel: ApprovalMethod::SdkNtfy,
                        response,
                    })
                    .await;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl SigningChannel for NtfyChannel {
    fn method(&self) -> ApprovalMethod {
        ApprovalMethod::SdkNtfy
    }

    fn is_available(&self) -> bool {
        self.config.enabled
    }

    async fn send_request(&self, dispatch: &SignDispatch) -> Result<()> {
        self.publish(dispatch).await?;
        self.subscribe(dispatch);
        Ok(())
    }

    fn cancel(&self, request_id: Uuid) {
        if let Some((_, token)) = self.subscriptions.remove(&request_id) {
            token.cancel();
        }
    }

    async fn shutdown(&self) {
        for entry in self.subscriptions.iter() {
            entry.value().cancel();
        }
        self.subscriptions.clear();
    }
}

/// Plain-text owner notifications on a fixed topic.
pub struct NtfyNotifier {
    server: String,
    topic: String,
    client: reqwest::Client,
}

impl NtfyNotifier {
    pub fn new(server: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            topic: topic.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, if a notify topic is set.
    pub fn from_config(config: &NtfyConfig) -> Option<Self> {
        match (&config.notify_topic, config.enabled) {
            (Some(topic), true) => Some(Self::new(config.server.clone(), topic.clone())),
            _ => None,
        }
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    fn name(&self) -> &str {
        "ntfy"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let priority = if notification.event.is_broadcast() { 5 } else { 3 };
        let body = serde_json::json!({
            "topic": self.topic,
            "title": notification.title,
            "message": crate::notify::render_text(notification),
            "priority": priority,
            "tags": ["warden", notification.event.as_str()],
        });
        let resp = self
            .client
            .post(self.server.trim_end_matches('/'))
            .json(&body)
            .send()
            .await
            .map_err(|e| channel_err("ntfy", e))?;
        if !resp.status().is_success() {
            return Err(channel_err("ntfy", format!("notify: HTTP {}", resp.status())));
        }
        Ok(())
    }
}
