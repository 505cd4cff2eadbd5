//! Network resolution.
//!
//! A wallet lives on one chain in one environment; every network it may use
//! belongs to that (chain, environment) pair.

use crate::error::{Result, WardenError};
use crate::types::{Chain, Environment};

const SOLANA_MAINNET: &[&str] = &["mainnet"];
const SOLANA_TESTNET: &[&str] = &["devnet", "testnet"];
const EVM_MAINNET: &[&str] = &[
    "ethereum-mainnet",
    "polygon-mainnet",
    "arbitrum-mainnet",
    "optimism-mainnet",
    "base-mainnet",
];
const EVM_TESTNET: &[&str] = &[
    "ethereum-sepolia",
    "polygon-amoy",
    "arbitrum-sepolia",
    "optimism-sepolia",
    "base-sepolia",
];

pub fn networks_for(chain: Chain, environment: Environment) -> &'static [&'static str] {
    match (chain, environment) {
        (Chain::Solana, Environment::Mainnet) => SOLANA_MAINNET,
        (Chain::Solana, Environment::Testnet) => SOLANA_TESTNET,
        (Chain::Ethereum, Environment::Mainnet) => EVM_MAINNET,
        (Chain::Ethereum, Environment::Testnet) => EVM_TESTNET,
    }
}

pub fn default_network(chain: Chain, environment: Environment) -> &'static str {
    networks_for(chain, environment)[0]
}

/// Resolve the network for a request: request > wallet default > environment default.
///
/// The winner must belong to the wallet's chain and environment.
pub fn resolve_network(
    requested: Option<&str>,
    wallet_default: Option<&str>,
    environment: Environment,
    chain: Chain,
) -> Result<String> {
    let resolved = requested
        .or(wallet_default)
        .unwrap_or_else(|| default_network(chain, environment));

    if !networks_for(chain, environment).contains(&resolved) {
        return Err(WardenError::NetworkMismatch(format!(
            "network '{resolved}' is not valid for {chain} {environment}"
        )));
    }
    Ok(resolved.to_string())
}
