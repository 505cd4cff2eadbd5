use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the entire Warden daemon.
#[derive(Error, Debug)]
pub enum WardenError {
    // ── Validation errors ──────────────────────────────────────
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("network mismatch: {0}")]
    NetworkMismatch(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(Uuid),

    #[error("transaction not found: {0}")]
    TxNotFound(Uuid),

    // ── Authorization errors ───────────────────────────────────
    #[error("session revoked")]
    SessionRevoked,

    #[error("session token expired")]
    TokenExpired,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    // ── Policy errors ──────────────────────────────────────────
    #[error("denied by policy: {0}")]
    PolicyDenied(String),

    // ── Approval protocol errors ───────────────────────────────
    #[error("no pending approval for transaction {0}")]
    ApprovalNotFound(Uuid),

    #[error("approval window for transaction {0} has closed")]
    ApprovalTimeout(Uuid),

    #[error("sign request not found: {0}")]
    SignRequestNotFound(Uuid),

    #[error("sign request expired: {0}")]
    SignRequestExpired(Uuid),

    #[error("sign request already processed: {0}")]
    SignRequestAlreadyProcessed(Uuid),

    #[error("invalid sign response: {0}")]
    InvalidSignResponse(String),

    #[error("signer address mismatch: expected {expected}, got {actual}")]
    SignerAddressMismatch { expected: String, actual: String },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("wallet has no owner registered: {0}")]
    OwnerNotSet(Uuid),

    #[error("owner of wallet {0} is verified and cannot be changed")]
    OwnerLocked(Uuid),

    // ── Transaction state errors ───────────────────────────────
    #[error("transaction {id} cannot move from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    // ── Chain errors ───────────────────────────────────────────
    #[error("chain error: {0}")]
    Chain(String),

    #[error("simulation failed: {0}")]
    SimulationFailed(String),

    // ── Oracle errors ──────────────────────────────────────────
    #[error("price not available: {0}")]
    PriceNotAvailable(String),

    #[error("price oracle unavailable: {0}")]
    OracleUnavailable(String),

    // ── Kill switch errors ─────────────────────────────────────
    #[error("kill switch is {0}")]
    KillSwitchEngaged(String),

    #[error("kill switch recovery blocked: cooldown has {remaining_secs}s remaining")]
    RecoveryCooldown { remaining_secs: i64 },

    #[error("kill switch recovery blocked: {attempts} of {max} attempts used")]
    RecoveryAttemptsExhausted { attempts: u32, max: u32 },

    // ── Channel errors ─────────────────────────────────────────
    #[error("channel error: {channel}: {reason}")]
    Channel { channel: String, reason: String },

    #[error("no approval channel available")]
    NoChannelAvailable,

    // ── Store errors ───────────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    /// Stable machine-readable code, used in audit entries and API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NetworkMismatch(_) => "NETWORK_MISMATCH",
            Self::WalletNotFound(_) => "WALLET_NOT_FOUND",
            Self::TxNotFound(_) => "TX_NOT_FOUND",
            Self::SessionRevoked => "SESSION_REVOKED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::PolicyDenied(_) => "POLICY_DENIED",
            Self::ApprovalNotFound(_) => "APPROVAL_NOT_FOUND",
            Self::ApprovalTimeout(_) => "APPROVAL_TIMEOUT",
            Self::SignRequestNotFound(_) => "SIGN_REQUEST_NOT_FOUND",
            Self::SignRequestExpired(_) => "SIGN_REQUEST_EXPIRED",
            Self::SignRequestAlreadyProcessed(_) => "SIGN_REQUEST_ALREADY_PROCESSED",
            Self::InvalidSignResponse(_) => "INVALID_SIGN_RESPONSE",
            Self::SignerAddressMismatch { .. } => "SIGNER_ADDRESS_MISMATCH",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::OwnerNotSet(_) => "OWNER_NOT_SET",
            Self::OwnerLocked(_) => "OWNER_ALREADY_CONNECTED",
            Self::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::Chain(_) => "CHAIN_ERROR",
            Self::SimulationFailed(_) => "SIMULATION_FAILED",
            Self::PriceNotAvailable(_) => "PRICE_NOT_AVAILABLE",
            Self::OracleUnavailable(_) => "ORACLE_UNAVAILABLE",
            Self::KillSwitchEngaged(_) => "KILL_SWITCH_ENGAGED",
            Self::RecoveryCooldown { .. } => "RECOVERY_COOLDOWN",
            Self::RecoveryAttemptsExhausted { .. } => "RECOVERY_ATTEMPTS_EXHAUSTED",
            Self::Channel { .. } => "CHANNEL_ERROR",
            Self::NoChannelAvailable => "NO_CHANNEL_AVAILABLE",
            Self::Store(_) => "STORE_ERROR",
            Self::Config(_) | Self::ConfigValidation { .. } => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
