//! Telegram Bot API: the "open in wallet" sign channel, the admin
//! approve/reject keyboard, notifications, and the long-poll loop that feeds
//! callbacks and `/sign_response` commands back to the workflow.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use warden_config::schema::TelegramConfig;
use warden_core::{ApprovalMethod, Notification, Notifier, Result, SignAction};

use crate::adapter::{ChannelEvent, SignDispatch, SigningChannel, channel_err, decode_sign_response};

const MAX_BACKOFF_SECS: u64 = 60;
const MAX_CONFLICT_RETRIES: u32 = 5;

/// Thin Bot API client shared by every Telegram surface.
pub struct TelegramApi {
    token: String,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(token: impl Into<String>, poll_timeout_secs: u64) -> Self {
        // Overall timeout must outlast the server-side long-poll.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            token: token.into(),
            client,
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Option<Arc<Self>> {
        match (&config.bot_token, config.enabled) {
            (Some(token), true) if !token.trim().is_empty() => {
                Some(Arc::new(Self::new(token.clone(), config.poll_timeout_secs)))
            }
            _ => None,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.token, method)
    }

    /// Call a Bot API method, unwrapping the `{"ok": .., "result": ..}` envelope.
    async fn call(&self, method: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| channel_err("telegram", e))?;
        let data: serde_json::Value = resp.json().await.map_err(|e| channel_err("telegram", e))?;
        if data["ok"].as_bool() != Some(true) {
            let desc = data["description"].as_str().unwrap_or("unknown error");
            return Err(channel_err("telegram", format!("{method}: {desc}")));
        }
        Ok(data["result"].clone())
    }

    /// Returns the sent message id.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<serde_json::Value>,
    ) -> Result<Option<i64>> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "MarkdownV2",
        });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }
        let result = self.call("sendMessage", &body).await?;
        Ok(result["message_id"].as_i64())
    }

    pub async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()> {
        self.call(
            "answerCallbackQuery",
            &serde_json::json!({ "callback_query_id": callback_id, "text": text }),
        )
        .await
        .map(|_| ())
    }
}

/// Escape text for MarkdownV2.
pub fn escape_markdown_v2(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
    ];
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Translate one update into a workflow event.
///
/// Decisions (keyboard callbacks and `/approve`/`/reject` commands) are only
/// honored from `admin_chat_id`. `/sign_response` is accepted from any chat:
/// the payload carries its own signature.
pub fn parse_update(update: &serde_json::Value, admin_chat_id: Option<i64>) -> Option<ChannelEvent> {
    if let Some(cbq) = update.get("callback_query") {
        let chat_id = cbq["message"]["chat"]["id"].as_i64();
        if admin_chat_id.is_none() || chat_id != admin_chat_id {
            debug!(?chat_id, "ignoring callback from non-admin chat");
            return None;
        }
        let (action, tx_id) = parse_decision(cbq["data"].as_str()?, ':')?;
        return Some(ChannelEvent::Decision {
            channel: ApprovalMethod::TelegramBot,
            tx_id,
            action,
            sender: cbq["from"]["id"].to_string(),
        });
    }

    let msg = update.get("message")?;
    let text = msg["text"].as_str()?.trim();
    let chat_id = msg["chat"]["id"].as_i64();

    if let Some(payload) = text.strip_prefix("/sign_response") {
        return match decode_sign_response(payload.trim()) {
            Ok(response) => Some(ChannelEvent::SignResponse {
                channel: ApprovalMethod::SdkTelegram,
                response,
            }),
            Err(e) => {
                debug!(error = %e, "malformed /sign_response payload");
                None
            }
        };
    }

    if admin_chat_id.is_some() && chat_id == admin_chat_id {
        let (action, tx_id) = parse_decision(text.trim_start_matches('/'), ' ')?;
        return Some(ChannelEvent::Decision {
            channel: ApprovalMethod::TelegramBot,
            tx_id,
            action,
            sender: msg["from"]["id"].to_string(),
        });
    }
    None
}

fn parse_decision(data: &str, sep: char) -> Option<(SignAction, uuid::Uuid)> {
    let (verb, id) = data.split_once(sep)?;
    let action = match verb {
        "approve" => SignAction::Approve,
        "reject" | "deny" => SignAction::Reject,
        _ => return None,
    };
    Some((action, id.trim().parse().ok()?))
}

// ── Signing surfaces ───────────────────────────────────────────

/// Sends the owner a message with an "Open in wallet" button. The wallet
/// app answers through the bot's `/sign_response` command.
pub struct TelegramSigningChannel {
    api: Option<Arc<TelegramApi>>,
    chat_id: Option<i64>,
}

impl TelegramSigningChannel {
    pub fn new(api: Option<Arc<TelegramApi>>, config: &TelegramConfig) -> Self {
        Self {
            api,
            chat_id: config.owner_chat_id.or(config.admin_chat_id),
        }
    }
}

#[async_trait]
impl SigningChannel for TelegramSigningChannel {
    fn method(&self) -> ApprovalMethod {
        ApprovalMethod::SdkTelegram
    }

    fn is_available(&self) -> bool {
        self.api.is_some() && self.chat_id.is_some()
    }

    async fn send_request(&self, dispatch: &SignDispatch) -> Result<()> {
        let (Some(api), Some(chat_id)) = (&self.api, self.chat_id) else {
            return Err(channel_err("telegram", "owner chat is not configured"));
        };
        let request = &dispatch.request;
        let short_id: String = request.metadata.tx_id.to_string().chars().take(8).collect();
        let text = format!(
            "*Warden sign request*\n\n{}\nTX: `{}\\.\\.\\.`\nChain: {}/{}",
            escape_markdown_v2(&request.display_message),
            short_id,
            escape_markdown_v2(&request.chain),
            escape_markdown_v2(&request.network),
        );
        let keyboard = serde_json::json!({
            "inline_keyboard": [[{ "text": "Open in wallet", "url": dispatch.universal_link }]],
        });
        api.send_message(chat_id, &text, Some(keyboard)).await?;
        debug!(request_id = %request.request_id, "sign request sent via telegram");
        Ok(())
    }
}

/// Approve/reject inline keyboard in the admin chat.
pub struct TelegramBotChannel {
    api: Option<Arc<TelegramApi>>,
    admin_chat_id: Option<i64>,
}

impl TelegramBotChannel {
    pub fn new(api: Option<Arc<TelegramApi>>, config: &TelegramConfig) -> Self {
        Self {
            api,
            admin_chat_id: config.admin_chat_id,
        }
    }
}

#[async_trait]
impl SigningChannel for TelegramBotChannel {
    fn method(&self) -> ApprovalMethod {
        ApprovalMethod::TelegramBot
    }

    fn is_available(&self) -> bool {
        self.api.is_some() && self.admin_chat_id.is_some()
    }

    async fn send_request(&self, dispatch: &SignDispatch) -> Result<()> {
        let (Some(api), Some(chat_id)) = (&self.api, self.admin_chat_id) else {
            return Err(channel_err("telegram", "admin chat is not configured"));
        };
        let tx_id = dispatch.tx_id();
        let text = format!(
            "*Approval required*\n\n{}\n\nTX: `{}`",
            escape_markdown_v2(&dispatch.request.display_message),
            tx_id
        );
        let keyboard = serde_json::json!({
            "inline_keyboard": [[
                { "text": "Approve", "callback_data": format!("approve:{tx_id}") },
                { "text": "Reject", "callback_data": format!("reject:{tx_id}") },
            ]],
        });
        api.send_message(chat_id, &text, Some(keyboard)).await?;
        Ok(())
    }
}

pub struct TelegramNotifier {
    api: Arc<TelegramApi>,
    chat_id: i64,
}

impl TelegramNotifier {
    pub fn new(api: Arc<TelegramApi>, chat_id: i64) -> Self {
        Self { api, chat_id }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let text = format!(
            "*{}*\n{}",
            escape_markdown_v2(&notification.title),
            escape_markdown_v2(&crate::notify::render_text(notification))
        );
        self.api.send_message(self.chat_id, &text, None).await.map(|_| ())
    }
}

// ── Long poll ──────────────────────────────────────────────────

/// Reads `getUpdates` and forwards recognized updates as [`ChannelEvent`]s.
pub struct TelegramPoller {
    api: Arc<TelegramApi>,
    admin_chat_id: Option<i64>,
    poll_timeout_secs: u64,
    connected: Arc<AtomicBool>,
}

impl TelegramPoller {
    pub fn new(api: Arc<TelegramApi>, config: &TelegramConfig) -> Self {
        Self {
            api,
            admin_chat_id: config.admin_chat_id,
            poll_timeout_secs: config.poll_timeout_secs,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn run(self, events: mpsc::Sender<ChannelEvent>, shutdown: CancellationToken) {
        let mut offset: i64 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut consecutive_conflicts: u32 = 0;
        self.connected.store(true, Ordering::SeqCst);
        let _ = events.send(ChannelEvent::Connected(ApprovalMethod::TelegramBot)).await;
        info!("telegram poller started");

        loop {
            if events.is_closed() {
                break;
            }
            let body = serde_json::json!({ "offset": offset, "timeout": self.poll_timeout_secs });
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                r = self.api.call("getUpdates", &body) => r,
            };

            let updates = match result {
                Ok(updates) => {
                    consecutive_failures = 0;
                    consecutive_conflicts = 0;
                    updates
                }
                Err(e) => {
                    let reason = e.to_string();
                    if reason.contains("Conflict") {
                        consecutive_conflicts += 1;
                        error!(attempt = consecutive_conflicts, "another poller owns this bot token");
                        if consecutive_conflicts >= MAX_CONFLICT_RETRIES {
                            break;
                        }
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    } else {
                        consecutive_failures += 1;
                        warn!(error = %reason, "telegram poll failed");
                        tokio::time::sleep(backoff_duration(consecutive_failures, MAX_BACKOFF_SECS)).await;
                    }
                    continue;
                }
            };

            for update in updates.as_array().into_iter().flatten() {
                if let Some(uid) = update["update_id"].as_i64() {
                    offset = uid + 1;
                }
                let Some(event) = parse_update(update, self.admin_chat_id) else {
                    continue;
                };
                if let Some(callback_id) = update["callback_query"]["id"].as_str() {
                    let text = match &event {
                        ChannelEvent::Decision { action: SignAction::Approve, .. } => "Approved",
                        _ => "Rejected",
                    };
                    if let Err(e) = self.api.answer_callback(callback_id, text).await {
                        debug!(error = %e, "answerCallbackQuery failed");
                    }
                }
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        let _ = events
            .send(ChannelEvent::Disconnected(ApprovalMethod::TelegramBot, None))
            .await;
        info!("telegram poller stopped");
    }
}

/// Exponential backoff with jitter: 1s, 2s, 4s, ... capped at `max_secs`.
pub fn backoff_duration(consecutive_failures: u32, max_secs: u64) -> Duration {
    let base = 1u64.checked_shl(consecutive_failures.min(6)).unwrap_or(max_secs);
    let capped = base.min(max_secs);
    let jitter_ms = (rand::random::<u64>() % (capped * 500 + 1)) as i64 - (capped as i64 * 250);
    let ms = (capped as i64 * 1000 + jitter_ms).max(500) as u64;
    Duration::from_millis(ms)
}
