//! USD valuation of a request.
//!
//! A failed lookup is never zero. The caller gets one of three outcomes and
//! the policy evaluator treats both failure kinds as "no USD data".

use tracing::{debug, warn};

use warden_core::adapter::PriceInfo;
use warden_core::request::parse_amount;
use warden_core::{BatchInstruction, Chain, PriceOracle, PriceResult, TokenRef, TransactionRequest, WardenError};

/// Convert a raw integer amount to whole units.
pub fn to_units(raw: &str, decimals: u32) -> f64 {
    let value = parse_amount(raw).unwrap_or(0) as f64;
    value / 10f64.powi(decimals as i32)
}

enum Lookup {
    Price(PriceInfo),
    NotListed,
    Down,
}

async fn native_price(oracle: &dyn PriceOracle, chain: Chain) -> Lookup {
    match oracle.get_native_price(chain).await {
        Ok(info) => Lookup::Price(info),
        Err(e) => {
            warn!(%chain, error = %e, "native price unavailable");
            Lookup::Down
        }
    }
}

async fn token_price(oracle: &dyn PriceOracle, token: &TokenRef, chain: Chain, network: &str) -> Lookup {
    match oracle.get_price(token, chain, network).await {
        Ok(info) => Lookup::Price(info),
        Err(WardenError::PriceNotAvailable(_)) => {
            debug!(token = %token.address, "token not listed");
            Lookup::NotListed
        }
        Err(e) => {
            warn!(token = %token.address, error = %e, "token price unavailable");
            Lookup::Down
        }
    }
}

fn not_listed(token: &TokenRef, chain: Chain, failed_count: usize) -> PriceResult {
    PriceResult::NotListed {
        token_address: token.address.clone(),
        chain,
        failed_count,
    }
}

/// Resolve the USD value a request moves.
///
/// - TRANSFER: native price times the amount.
/// - TOKEN_TRANSFER: token price; unlisted tokens are `NotListed`.
/// - CONTRACT_CALL: the attached native value, zero when none.
/// - APPROVE: zero, nothing moves yet.
/// - BATCH: the sum of every leg. Unlisted tokens are counted and the first
///   one is reported; any oracle failure makes the whole batch `OracleDown`.
pub async fn resolve_effective_amount_usd(
    oracle: &dyn PriceOracle,
    chain: Chain,
    network: &str,
    request: &TransactionRequest,
) -> PriceResult {
    let decimals = chain.native_decimals();
    match request {
        TransactionRequest::Transfer { amount, .. } => match native_price(oracle, chain).await {
            Lookup::Price(info) => PriceResult::Success {
                usd_amount: to_units(amount, decimals) * info.usd_price,
                is_stale: info.is_stale,
            },
            _ => PriceResult::OracleDown,
        },
        TransactionRequest::TokenTransfer { amount, token, .. } => {
            match token_price(oracle, token, chain, network).await {
                Lookup::Price(info) => PriceResult::Success {
                    usd_amount: to_units(amount, token.decimals) * info.usd_price,
                    is_stale: info.is_stale,
                },
                Lookup::NotListed => not_listed(token, chain, 1),
                Lookup::Down => PriceResult::OracleDown,
            }
        }
        TransactionRequest::ContractCall { value, .. } => {
            let value = value.as_deref().unwrap_or("0");
            if parse_amount(value).unwrap_or(0) == 0 {
                return PriceResult::Success {
                    usd_amount: 0.0,
                    is_stale: false,
                };
            }
            match native_price(oracle, chain).await {
                Lookup::Price(info) => PriceResult::Success {
                    usd_amount: to_units(value, decimals) * info.usd_price,
                    is_stale: info.is_stale,
                },
                _ => PriceResult::OracleDown,
            }
        }
        TransactionRequest::Approve { .. } => PriceResult::Success {
            usd_amount: 0.0,
            is_stale: false,
        },
        TransactionRequest::Batch { instructions, .. } => {
            resolve_batch(oracle, chain, network, instructions).await
        }
    }
}

async fn resolve_batch(
    oracle: &dyn PriceOracle,
    chain: Chain,
    network: &str,
    instructions: &[BatchInstruction],
) -> PriceResult {
    let native = match native_price(oracle, chain).await {
        Lookup::Price(info) => info,
        _ => return PriceResult::OracleDown,
    };
    let decimals = chain.native_decimals();

    let mut total = 0.0;
    let mut is_stale = native.is_stale;
    let mut failed = 0usize;
    let mut first_unlisted: Option<&TokenRef> = None;

    for ix in instructions {
        match ix {
            BatchInstruction::Transfer { amount, .. } => {
                total += to_units(amount, decimals) * native.usd_price;
            }
            BatchInstruction::ContractCall { value, .. } => {
                if let Some(value) = value {
                    total += to_units(value, decimals) * native.usd_price;
                }
            }
            BatchInstruction::TokenTransfer { amount, token, .. } => {
                match token_price(oracle, token, chain, network).await {
                    Lookup::Price(info) => {
                        total += to_units(amount, token.decimals) * info.usd_price;
                        is_stale |= info.is_stale;
                    }
                    Lookup::NotListed => {
                        failed += 1;
                        first_unlisted.get_or_insert(token);
                    }
                    Lookup::Down => return PriceResult::OracleDown,
                }
            }
            BatchInstruction::Approve { .. } => {}
        }
    }

    match first_unlisted {
        Some(token) if failed > 0 => not_listed(token, chain, failed),
        _ => PriceResult::Success {
            usd_amount: total,
            is_stale,
        },
    }
}
