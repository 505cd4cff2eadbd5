//! Owner signing protocol, version 1.
//!
//! A [`SignRequest`] goes out to the owner's wallet app through an approval
//! channel; a [`SignResponse`] comes back carrying the owner's decision.
//! Both are correlated by `request_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::types::{Tier, TxId};

pub const SIGN_PROTOCOL_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub version: String,
    pub request_id: Uuid,
    /// `solana` or `evm`.
    pub chain: String,
    pub network: String,
    /// Exact text the owner signs.
    pub message: String,
    pub display_message: String,
    pub metadata: SignMetadata,
    pub response_channel: ResponseChannel,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMetadata {
    pub tx_id: TxId,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub policy_tier: Tier,
}

/// Where the wallet app should post its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseChannel {
    #[serde(rename_all = "camelCase")]
    Ntfy {
        response_topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Telegram { bot_username: String },
    Rest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    pub version: String,
    pub request_id: Uuid,
    pub action: SignAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub signer_address: String,
    pub signed_at: DateTime<Utc>,
}

impl SignResponse {
    /// Structural checks that don't need the pending request.
    pub fn validate(&self) -> Result<()> {
        if self.version != SIGN_PROTOCOL_VERSION {
            return Err(WardenError::InvalidSignResponse(format!(
                "unsupported protocol version '{}'",
                self.version
            )));
        }
        if self.signer_address.trim().is_empty() {
            return Err(WardenError::InvalidSignResponse(
                "signerAddress is required".into(),
            ));
        }
        let has_signature = self
            .signature
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        if self.action == SignAction::Approve && !has_signature {
            return Err(WardenError::InvalidSignResponse(
                "signature is required for approve action".into(),
            ));
        }
        Ok(())
    }

    /// Parse from raw JSON, mapping shape errors to `INVALID_SIGN_RESPONSE`.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| WardenError::InvalidSignResponse(e.to_string()))
    }
}
