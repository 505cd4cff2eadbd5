//! Building the SignRequest an owner signs.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use warden_channels::{SignDispatch, encode_payload};
use warden_config::schema::{NtfyConfig, SigningConfig, TelegramConfig};
use warden_core::protocol::{ResponseChannel, SIGN_PROTOCOL_VERSION, SignMetadata};
use warden_core::{ApprovalMethod, Result, SignRequest, Tier, Transaction, Wallet};

#[derive(Debug, Clone)]
pub struct SignRequestBuilder {
    signing: SigningConfig,
    ntfy: NtfyConfig,
    bot_username: Option<String>,
}

impl SignRequestBuilder {
    pub fn new(signing: SigningConfig, ntfy: NtfyConfig, telegram: &TelegramConfig) -> Self {
        Self {
            signing,
            ntfy,
            bot_username: telegram.bot_username.clone(),
        }
    }

    /// Build the request for `tx`, answering on the channel that `method` implies.
    pub fn build(
        &self,
        wallet: &Wallet,
        tx: &Transaction,
        tier: Tier,
        method: ApprovalMethod,
        now: DateTime<Utc>,
    ) -> Result<SignDispatch> {
        let request_id = Uuid::new_v4();
        let (amount, symbol) = display_amount(wallet, tx);
        let to = tx.to_address.clone().unwrap_or_default();

        let metadata = SignMetadata {
            tx_id: tx.id,
            tx_type: tx.tx_type.as_str().to_string(),
            from: wallet.public_key.clone(),
            to,
            amount,
            symbol,
            policy_tier: tier,
        };

        let request = SignRequest {
            version: SIGN_PROTOCOL_VERSION.into(),
            request_id,
            chain: wallet.chain.protocol_name().into(),
            network: tx.network.clone(),
            message: signing_message(&metadata, &tx.network, request_id, now),
            display_message: display_message(&metadata),
            response_channel: self.response_channel(method, request_id),
            metadata,
            expires_at: now + Duration::minutes(self.signing.request_expiry_min as i64),
        };

        let universal_link = format!(
            "{}?data={}",
            self.signing.sign_url_base.trim_end_matches('/'),
            encode_payload(&request)?
        );
        Ok(SignDispatch {
            wallet_id: wallet.id,
            request,
            universal_link,
        })
    }

    fn response_channel(&self, method: ApprovalMethod, request_id: Uuid) -> ResponseChannel {
        match method {
            ApprovalMethod::SdkNtfy => ResponseChannel::Ntfy {
                response_topic: format!("{}-{}", self.ntfy.response_topic_prefix, request_id),
                server_url: (self.ntfy.server != NtfyConfig::default().server)
                    .then(|| self.ntfy.server.clone()),
            },
            ApprovalMethod::SdkTelegram => ResponseChannel::Telegram {
                bot_username: self.bot_username.clone().unwrap_or_default(),
            },
            ApprovalMethod::Walletconnect | ApprovalMethod::TelegramBot | ApprovalMethod::Rest => {
                ResponseChannel::Rest
            }
        }
    }
}

/// The exact text the owner signs. The amount line is omitted when the
/// request moves no amount.
pub fn signing_message(
    metadata: &SignMetadata,
    network: &str,
    request_id: Uuid,
    now: DateTime<Utc>,
) -> String {
    let mut lines = vec![
        "Warden Transaction Approval".to_string(),
        String::new(),
        format!("Transaction: {}", metadata.tx_id),
        format!("Type: {}", metadata.tx_type),
        format!("From: {}", metadata.from),
        format!("To: {}", metadata.to),
    ];
    if let Some(amount) = &metadata.amount {
        lines.push(match &metadata.symbol {
            Some(symbol) => format!("Amount: {amount} {symbol}"),
            None => format!("Amount: {amount}"),
        });
    }
    lines.extend([
        format!("Network: {network}"),
        format!("Policy Tier: {}", metadata.policy_tier),
        String::new(),
        "Approve this transaction by signing this message.".to_string(),
        format!("Timestamp: {}", now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        format!("Nonce: {request_id}"),
    ]);
    lines.join("\n")
}

pub fn display_message(metadata: &SignMetadata) -> String {
    let amount = match (&metadata.amount, &metadata.symbol) {
        (Some(a), Some(s)) => format!(" {a} {s}"),
        (Some(a), None) => format!(" {a}"),
        _ => String::new(),
    };
    format!(
        "{}{} from {}... to {}...",
        metadata.tx_type,
        amount,
        short(&metadata.from),
        short(&metadata.to)
    )
}

fn short(addr: &str) -> String {
    addr.chars().take(8).collect()
}

fn display_amount(wallet: &Wallet, tx: &Transaction) -> (Option<String>, Option<String>) {
    if let Some(token) = tx.request.token() {
        return (
            Some(format_units(&tx.amount, token.decimals)),
            Some(token.symbol.clone()),
        );
    }
    if tx.amount == "0" {
        return (None, None);
    }
    (
        Some(format_units(&tx.amount, wallet.chain.native_decimals())),
        Some(wallet.chain.native_symbol().to_string()),
    )
}

/// Render an integer amount in smallest units as a decimal string.
pub fn format_units(raw: &str, decimals: u32) -> String {
    let decimals = decimals as usize;
    let digits = raw.trim_start_matches('0');
    if digits.is_empty() {
        return "0".into();
    }
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (int, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        int.to_string()
    } else {
        format!("{int}.{frac}")
    }
}
