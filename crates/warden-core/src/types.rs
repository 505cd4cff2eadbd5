use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::WardenError;
use crate::request::TransactionRequest;

/// `at` plus `secs` seconds, or a validation error when the result does not
/// fit in a timestamp.
pub fn after_seconds(at: DateTime<Utc>, secs: u64) -> Result<DateTime<Utc>, WardenError> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| at.checked_add_signed(d))
        .ok_or_else(|| WardenError::Validation(format!("a wait of {secs}s is out of range")))
}

/// Unique identifier for a wallet.
pub type WalletId = Uuid;

/// Unique identifier for a transaction.
pub type TxId = Uuid;

/// Unique identifier for an agent session.
pub type SessionId = Uuid;

/// Risk tier deciding how much friction a transaction gets before execution.
///
/// Ordered: `Instant < Notify < Delay < Approval`, so `max()` combines tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Instant,
    Notify,
    Delay,
    Approval,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instant => "INSTANT",
            Self::Notify => "NOTIFY",
            Self::Delay => "DELAY",
            Self::Approval => "APPROVAL",
        }
    }

    /// Whether this tier suspends the pipeline at the wait stage.
    pub fn halts(&self) -> bool {
        matches!(self, Self::Delay | Self::Approval)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSTANT" => Ok(Self::Instant),
            "NOTIFY" => Ok(Self::Notify),
            "DELAY" => Ok(Self::Delay),
            "APPROVAL" => Ok(Self::Approval),
            other => Err(WardenError::Validation(format!("unknown tier '{other}'"))),
        }
    }
}

/// Lifecycle status of a transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Queued,
    Executing,
    Submitted,
    Confirmed,
    Failed,
    Cancelled,
    Expired,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Executing => "EXECUTING",
            Self::Submitted => "SUBMITTED",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Statuses that hold a reservation against the cumulative windows.
    pub fn holds_reservation(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "QUEUED" => Ok(Self::Queued),
            "EXECUTING" => Ok(Self::Executing),
            "SUBMITTED" => Ok(Self::Submitted),
            "CONFIRMED" => Ok(Self::Confirmed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(WardenError::Validation(format!("unknown status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Transfer,
    TokenTransfer,
    ContractCall,
    Approve,
    Batch,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "TRANSFER",
            Self::TokenTransfer => "TOKEN_TRANSFER",
            Self::ContractCall => "CONTRACT_CALL",
            Self::Approve => "APPROVE",
            Self::Batch => "BATCH",
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxType {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSFER" => Ok(Self::Transfer),
            "TOKEN_TRANSFER" => Ok(Self::TokenTransfer),
            "CONTRACT_CALL" => Ok(Self::ContractCall),
            "APPROVE" => Ok(Self::Approve),
            "BATCH" => Ok(Self::Batch),
            other => Err(WardenError::Validation(format!(
                "unknown transaction type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Solana,
    Ethereum,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solana => "solana",
            Self::Ethereum => "ethereum",
        }
    }

    /// Chain family name used on the signing protocol (`solana` | `evm`).
    pub fn protocol_name(&self) -> &'static str {
        match self {
            Self::Solana => "solana",
            Self::Ethereum => "evm",
        }
    }

    /// Decimals of the chain's native asset.
    pub fn native_decimals(&self) -> u32 {
        match self {
            Self::Solana => 9,
            Self::Ethereum => 18,
        }
    }

    pub fn native_symbol(&self) -> &'static str {
        match self {
            Self::Solana => "SOL",
            Self::Ethereum => "ETH",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solana" => Ok(Self::Solana),
            "ethereum" | "evm" => Ok(Self::Ethereum),
            other => Err(WardenError::Validation(format!("unknown chain '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            other => Err(WardenError::Validation(format!(
                "unknown environment '{other}'"
            ))),
        }
    }
}

/// How an owner is reached for sign-off on APPROVAL-tier transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMethod {
    SdkNtfy,
    SdkTelegram,
    Walletconnect,
    TelegramBot,
    Rest,
}

impl ApprovalMethod {
    /// Global fallback order, highest priority first.
    pub const PRIORITY: [ApprovalMethod; 5] = [
        Self::SdkNtfy,
        Self::SdkTelegram,
        Self::Walletconnect,
        Self::TelegramBot,
        Self::Rest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SdkNtfy => "sdk_ntfy",
            Self::SdkTelegram => "sdk_telegram",
            Self::Walletconnect => "walletconnect",
            Self::TelegramBot => "telegram_bot",
            Self::Rest => "rest",
        }
    }
}

impl fmt::Display for ApprovalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalMethod {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sdk_ntfy" => Ok(Self::SdkNtfy),
            "sdk_telegram" => Ok(Self::SdkTelegram),
            "walletconnect" => Ok(Self::Walletconnect),
            "telegram_bot" => Ok(Self::TelegramBot),
            "rest" => Ok(Self::Rest),
            other => Err(WardenError::Validation(format!(
                "unknown approval method '{other}'"
            ))),
        }
    }
}

/// Global execution gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillSwitchState {
    Active,
    Suspended,
    Locked,
}

impl KillSwitchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Locked => "LOCKED",
        }
    }
}

impl fmt::Display for KillSwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KillSwitchState {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "SUSPENDED" => Ok(Self::Suspended),
            "LOCKED" => Ok(Self::Locked),
            other => Err(WardenError::Validation(format!(
                "unknown kill switch state '{other}'"
            ))),
        }
    }
}

/// Owner lifecycle, derived from the wallet row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerState {
    /// No owner address registered.
    None,
    /// Owner registered but has not signed anything yet.
    Grace,
    /// Owner proved control of the address at least once.
    Locked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub name: String,
    pub chain: Chain,
    pub environment: Environment,
    pub public_key: String,
    pub default_network: Option<String>,
    pub owner_address: Option<String>,
    pub owner_verified: bool,
    /// Preferred approval channel; falls back to the global order when unset or unavailable.
    pub approval_method: Option<ApprovalMethod>,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(
        name: impl Into<String>,
        chain: Chain,
        environment: Environment,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            chain,
            environment,
            public_key: public_key.into(),
            default_network: None,
            owner_address: None,
            owner_verified: false,
            approval_method: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_owner(mut self, owner_address: impl Into<String>) -> Self {
        self.owner_address = Some(owner_address.into());
        self
    }

    pub fn owner_state(&self) -> OwnerState {
        match (&self.owner_address, self.owner_verified) {
            (None, _) => OwnerState::None,
            (Some(_), false) => OwnerState::Grace,
            (Some(_), true) => OwnerState::Locked,
        }
    }
}

/// A transaction row as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub wallet_id: WalletId,
    pub session_id: Option<SessionId>,
    pub tx_type: TxType,
    pub status: TxStatus,
    pub tier: Option<Tier>,
    /// Native amount as an integer string in the chain's smallest unit.
    pub amount: String,
    pub to_address: Option<String>,
    pub network: String,
    pub request: TransactionRequest,
    pub amount_usd: Option<f64>,
    pub reserved_amount: Option<String>,
    pub reserved_amount_usd: Option<f64>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub delay_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Build a fresh PENDING row for a validated request.
    pub fn pending(
        wallet_id: WalletId,
        session_id: Option<SessionId>,
        network: String,
        request: TransactionRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            session_id,
            tx_type: request.tx_type(),
            status: TxStatus::Pending,
            tier: None,
            amount: request.amount_string(),
            to_address: request.primary_destination().map(str::to_string),
            network,
            request,
            amount_usd: None,
            reserved_amount: None,
            reserved_amount_usd: None,
            tx_hash: None,
            error: None,
            queued_at: None,
            delay_seconds: None,
            created_at: now,
            executed_at: None,
        }
    }
}
