use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::types::TxType;

/// Bounds on batch size.
pub const MIN_BATCH_INSTRUCTIONS: usize = 2;
pub const MAX_BATCH_INSTRUCTIONS: usize = 20;

/// Largest uint256, the ceiling for an EVM token allowance.
pub const UINT256_MAX: &str =
    "115792089237316195423570985008687907853269984665640564039457584007913129639935";

/// A fungible token referenced by a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub address: String,
    pub decimals: u32,
    pub symbol: String,
}

/// An agent's request to move value, discriminated on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionRequest {
    Transfer {
        to: String,
        amount: String,
        #[serde(default)]
        memo: Option<String>,
        #[serde(default)]
        network: Option<String>,
    },
    TokenTransfer {
        to: String,
        amount: String,
        token: TokenRef,
        #[serde(default)]
        memo: Option<String>,
        #[serde(default)]
        network: Option<String>,
    },
    ContractCall {
        to: String,
        #[serde(default)]
        calldata: Option<String>,
        /// Native value attached to the call.
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        network: Option<String>,
    },
    Approve {
        spender: String,
        token: TokenRef,
        amount: String,
        #[serde(default)]
        network: Option<String>,
    },
    Batch {
        instructions: Vec<BatchInstruction>,
        #[serde(default)]
        network: Option<String>,
    },
}

/// One leg of a BATCH request. Batches cannot nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchInstruction {
    Transfer {
        to: String,
        amount: String,
    },
    TokenTransfer {
        to: String,
        amount: String,
        token: TokenRef,
    },
    ContractCall {
        to: String,
        #[serde(default)]
        calldata: Option<String>,
        #[serde(default)]
        value: Option<String>,
    },
    Approve {
        spender: String,
        token: TokenRef,
        amount: String,
    },
}

impl BatchInstruction {
    fn destination(&self) -> &str {
        match self {
            Self::Transfer { to, .. }
            | Self::TokenTransfer { to, .. }
            | Self::ContractCall { to, .. } => to,
            Self::Approve { spender, .. } => spender,
        }
    }

    fn native_amount(&self) -> Result<u128> {
        match self {
            Self::Transfer { amount, .. } => parse_amount(amount),
            Self::ContractCall { value, .. } => value.as_deref().map_or(Ok(0), parse_amount),
            Self::TokenTransfer { .. } | Self::Approve { .. } => Ok(0),
        }
    }

    fn validate(&self) -> Result<()> {
        require_address("to", self.destination())?;
        match self {
            Self::Transfer { amount, .. } | Self::TokenTransfer { amount, .. } => {
                parse_amount(amount)?;
            }
            Self::Approve { amount, token, .. } => {
                parse_allowance(amount)?;
                require_address("token.address", &token.address)?;
            }
            Self::ContractCall { value, .. } => {
                if let Some(v) = value {
                    parse_amount(v)?;
                }
            }
        }
        if let Self::TokenTransfer { token, .. } = self {
            require_address("token.address", &token.address)?;
        }
        Ok(())
    }
}

impl TransactionRequest {
    pub fn tx_type(&self) -> TxType {
        match self {
            Self::Transfer { .. } => TxType::Transfer,
            Self::TokenTransfer { .. } => TxType::TokenTransfer,
            Self::ContractCall { .. } => TxType::ContractCall,
            Self::Approve { .. } => TxType::Approve,
            Self::Batch { .. } => TxType::Batch,
        }
    }

    /// Network explicitly named by the caller, if any.
    pub fn network(&self) -> Option<&str> {
        match self {
            Self::Transfer { network, .. }
            | Self::TokenTransfer { network, .. }
            | Self::ContractCall { network, .. }
            | Self::Approve { network, .. }
            | Self::Batch { network, .. } => network.as_deref(),
        }
    }

    /// Every address value flows to, in request order.
    pub fn destinations(&self) -> Vec<&str> {
        match self {
            Self::Transfer { to, .. }
            | Self::TokenTransfer { to, .. }
            | Self::ContractCall { to, .. } => vec![to.as_str()],
            Self::Approve { spender, .. } => vec![spender.as_str()],
            Self::Batch { instructions, .. } => {
                instructions.iter().map(BatchInstruction::destination).collect()
            }
        }
    }

    pub fn primary_destination(&self) -> Option<&str> {
        self.destinations().into_iter().next()
    }

    /// Amount of the chain's native asset this request moves, in smallest units.
    ///
    /// Token transfers and approvals move no native value.
    pub fn native_amount(&self) -> Result<u128> {
        match self {
            Self::Transfer { amount, .. } => parse_amount(amount),
            Self::ContractCall { value, .. } => value.as_deref().map_or(Ok(0), parse_amount),
            Self::TokenTransfer { .. } | Self::Approve { .. } => Ok(0),
            Self::Batch { instructions, .. } => {
                instructions.iter().try_fold(0u128, |acc, ix| {
                    let n = ix.native_amount()?;
                    acc.checked_add(n)
                        .ok_or_else(|| WardenError::Validation("batch amount overflows".into()))
                })
            }
        }
    }

    /// Amount recorded on the transaction row.
    pub fn amount_string(&self) -> String {
        match self {
            Self::Transfer { amount, .. }
            | Self::TokenTransfer { amount, .. }
            | Self::Approve { amount, .. } => amount.clone(),
            Self::ContractCall { value, .. } => value.clone().unwrap_or_else(|| "0".into()),
            Self::Batch { .. } => self.native_amount().unwrap_or(0).to_string(),
        }
    }

    pub fn token(&self) -> Option<&TokenRef> {
        match self {
            Self::TokenTransfer { token, .. } | Self::Approve { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Structural validation run at stage 1, before anything is persisted.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Transfer { to, amount, .. } => {
                require_address("to", to)?;
                parse_amount(amount)?;
            }
            Self::TokenTransfer { to, amount, token, .. } => {
                require_address("to", to)?;
                require_address("token.address", &token.address)?;
                parse_amount(amount)?;
            }
            Self::ContractCall { to, value, .. } => {
                require_address("to", to)?;
                if let Some(v) = value {
                    parse_amount(v)?;
                }
            }
            Self::Approve { spender, token, amount, .. } => {
                require_address("spender", spender)?;
                require_address("token.address", &token.address)?;
                parse_allowance(amount)?;
            }
            Self::Batch { instructions, .. } => {
                if instructions.len() < MIN_BATCH_INSTRUCTIONS
                    || instructions.len() > MAX_BATCH_INSTRUCTIONS
                {
                    return Err(WardenError::Validation(format!(
                        "batch must contain {MIN_BATCH_INSTRUCTIONS}-{MAX_BATCH_INSTRUCTIONS} instructions, got {}",
                        instructions.len()
                    )));
                }
                for ix in instructions {
                    ix.validate()?;
                }
                self.native_amount()?;
            }
        }
        Ok(())
    }
}

/// Parse a non-negative integer amount string in smallest units.
pub fn parse_amount(raw: &str) -> Result<u128> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WardenError::Validation(format!(
            "amount '{raw}' must be a non-negative integer string"
        )));
    }
    raw.parse::<u128>()
        .map_err(|_| WardenError::Validation(format!("amount '{raw}' is out of range")))
}

/// Parse an allowance amount, which may span the full uint256 range.
///
/// Returns the value without leading zeros.
pub fn parse_allowance(raw: &str) -> Result<&str> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WardenError::Validation(format!(
            "amount '{raw}' must be a non-negative integer string"
        )));
    }
    let value = trim_zeros(raw);
    if cmp_amounts(value, UINT256_MAX) == Ordering::Greater {
        return Err(WardenError::Validation(format!("amount '{raw}' is out of range")));
    }
    Ok(value)
}

/// Numeric order of two non-negative integer strings of any width.
pub fn cmp_amounts(a: &str, b: &str) -> Ordering {
    let (a, b) = (trim_zeros(a), trim_zeros(b));
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn trim_zeros(raw: &str) -> &str {
    match raw.trim_start_matches('0') {
        "" => "0",
        rest => rest,
    }
}

fn require_address(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(WardenError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}
