use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use warden_core::{ApprovalMethod, Result, SignAction, SignRequest, SignResponse, TxId, WalletId, WardenError};

/// A sign request ready to leave the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignDispatch {
    pub wallet_id: WalletId,
    pub request: SignRequest,
    /// Deep link that opens the owner's wallet app on this request.
    pub universal_link: String,
}

impl SignDispatch {
    pub fn tx_id(&self) -> TxId {
        self.request.metadata.tx_id
    }

    /// The request as base64url JSON, the form carried in links and topics.
    pub fn encoded(&self) -> Result<String> {
        encode_payload(&self.request)
    }
}

/// Events a channel hands back to the approval workflow.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A signed protocol response from the owner's wallet.
    SignResponse {
        channel: ApprovalMethod,
        response: SignResponse,
    },
    /// An unsigned decision from a trusted admin surface (Telegram bot keyboard).
    Decision {
        channel: ApprovalMethod,
        tx_id: TxId,
        action: SignAction,
        sender: String,
    },
    Connected(ApprovalMethod),
    Disconnected(ApprovalMethod, Option<String>),
}

/// One way of reaching the owner for sign-off.
#[async_trait]
pub trait SigningChannel: Send + Sync {
    fn method(&self) -> ApprovalMethod;

    /// Whether the backend is configured and usable right now.
    fn is_available(&self) -> bool;

    /// Deliver a sign request to the owner.
    async fn send_request(&self, dispatch: &SignDispatch) -> Result<()>;

    /// Stop waiting for a response to `request_id` (decided or expired).
    fn cancel(&self, _request_id: uuid::Uuid) {}

    async fn shutdown(&self) {}
}

pub fn encode_payload<T: Serialize>(value: &T) -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(value)?))
}

/// Decode a base64url SignResponse. Padding is tolerated.
pub fn decode_sign_response(encoded: &str) -> Result<SignResponse> {
    let trimmed = encoded.trim().trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| WardenError::InvalidSignResponse(format!("bad base64url payload: {e}")))?;
    let json = String::from_utf8(bytes)
        .map_err(|e| WardenError::InvalidSignResponse(format!("payload is not utf-8: {e}")))?;
    SignResponse::from_json(&json)
}

pub(crate) fn channel_err(channel: &str, reason: impl std::fmt::Display) -> WardenError {
    WardenError::Channel {
        channel: channel.into(),
        reason: reason.to_string(),
    }
}
