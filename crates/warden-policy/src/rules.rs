//! Typed views over the JSON `rules` column, and selection of the winning
//! policy per type.

use serde::{Deserialize, Serialize};

use warden_core::request::parse_allowance;
use warden_core::{Result, Tier, WardenError};
use warden_store::{Policy, PolicyType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendingLimitRules {
    /// Native thresholds, integer strings in the chain's smallest unit.
    #[serde(default)]
    pub instant_max: Option<String>,
    #[serde(default)]
    pub notify_max: Option<String>,
    #[serde(default)]
    pub delay_max: Option<String>,
    #[serde(default)]
    pub delay_seconds: u64,

    #[serde(default)]
    pub instant_max_usd: Option<f64>,
    #[serde(default)]
    pub notify_max_usd: Option<f64>,
    #[serde(default)]
    pub delay_max_usd: Option<f64>,

    /// Rolling 24h limit.
    #[serde(default)]
    pub daily_limit_usd: Option<f64>,
    /// Rolling 30d limit.
    #[serde(default)]
    pub monthly_limit_usd: Option<f64>,

    /// Seconds an owner has to decide an APPROVAL-tier transaction.
    #[serde(default)]
    pub approval_timeout: Option<u64>,
}

impl SpendingLimitRules {
    pub fn has_usd_thresholds(&self) -> bool {
        self.instant_max_usd.is_some() || self.notify_max_usd.is_some() || self.delay_max_usd.is_some()
    }

    pub fn has_cumulative_limits(&self) -> bool {
        self.daily_limit_usd.is_some() || self.monthly_limit_usd.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhitelistRules {
    pub allowed_addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllowedNetworksRules {
    pub networks: Vec<String>,
}

/// Upper bound for `delay_seconds` and `approval_timeout`: one year.
pub const MAX_WAIT_SECS: u64 = 365 * 86_400;

/// Allowances at or above half of uint256 are treated as unlimited.
pub const UNLIMITED_APPROVAL_THRESHOLD: &str =
    "57896044618658097711785492504343953926634992332820282019728792003956564819967";

/// An address entry in a token, contract or spender list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressEntry {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AddressEntry {
    fn matches(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

fn listed(entries: &[AddressEntry], address: &str) -> bool {
    entries.iter().any(|e| e.matches(address))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllowedTokensRules {
    pub tokens: Vec<AddressEntry>,
}

impl AllowedTokensRules {
    pub fn allows(&self, token: &str) -> bool {
        listed(&self.tokens, token)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractWhitelistRules {
    pub contracts: Vec<AddressEntry>,
}

impl ContractWhitelistRules {
    pub fn allows(&self, contract: &str) -> bool {
        listed(&self.contracts, contract)
    }
}

/// Function selectors a contract may be called with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodEntry {
    pub contract_address: String,
    /// 4-byte selectors as `0x`-prefixed hex.
    pub selectors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodWhitelistRules {
    pub methods: Vec<MethodEntry>,
}

impl MethodWhitelistRules {
    /// Selectors listed for `contract`, or `None` when it is unrestricted.
    pub fn selectors_for(&self, contract: &str) -> Option<&[String]> {
        self.methods
            .iter()
            .find(|m| m.contract_address.eq_ignore_ascii_case(contract))
            .map(|m| m.selectors.as_slice())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovedSpendersRules {
    pub spenders: Vec<AddressEntry>,
}

impl ApprovedSpendersRules {
    pub fn allows(&self, spender: &str) -> bool {
        listed(&self.spenders, spender)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproveAmountLimitRules {
    /// Largest allowance, as an integer string in token base units.
    #[serde(default)]
    pub max_amount: Option<String>,
    #[serde(default = "default_block_unlimited")]
    pub block_unlimited: bool,
}

fn default_block_unlimited() -> bool {
    true
}

impl Default for ApproveAmountLimitRules {
    fn default() -> Self {
        Self {
            max_amount: None,
            block_unlimited: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproveTierOverrideRules {
    pub tier: Tier,
}

/// The winning policy of each type for one (wallet, network).
#[derive(Debug, Clone, Default)]
pub struct ResolvedPolicies {
    pub spending: Option<SpendingLimitRules>,
    pub whitelist: Option<WhitelistRules>,
    pub allowed_networks: Option<AllowedNetworksRules>,
    pub allowed_tokens: Option<AllowedTokensRules>,
    pub contract_whitelist: Option<ContractWhitelistRules>,
    pub method_whitelist: Option<MethodWhitelistRules>,
    pub approved_spenders: Option<ApprovedSpendersRules>,
    pub approve_amount_limit: Option<ApproveAmountLimitRules>,
    pub approve_tier_override: Option<ApproveTierOverrideRules>,
}

impl ResolvedPolicies {
    /// Pick one policy per type from the applicable set.
    ///
    /// Highest priority wins; ties go to wallet-scoped over global, then
    /// network-scoped over all-networks. Disabled policies are skipped.
    pub fn resolve(policies: &[Policy]) -> Result<Self> {
        let resolved = Self {
            spending: pick(policies, PolicyType::SpendingLimit)?,
            whitelist: pick(policies, PolicyType::Whitelist)?,
            allowed_networks: pick(policies, PolicyType::AllowedNetworks)?,
            allowed_tokens: pick(policies, PolicyType::AllowedTokens)?,
            contract_whitelist: pick(policies, PolicyType::ContractWhitelist)?,
            method_whitelist: pick(policies, PolicyType::MethodWhitelist)?,
            approved_spenders: pick(policies, PolicyType::ApprovedSpenders)?,
            approve_amount_limit: pick(policies, PolicyType::ApproveAmountLimit)?,
            approve_tier_override: pick(policies, PolicyType::ApproveTierOverride)?,
        };
        resolved.check_bounds()?;
        Ok(resolved)
    }

    /// True when no policy of any type applies.
    pub fn is_empty(&self) -> bool {
        self.spending.is_none()
            && self.whitelist.is_none()
            && self.allowed_networks.is_none()
            && self.allowed_tokens.is_none()
            && self.contract_whitelist.is_none()
            && self.method_whitelist.is_none()
            && self.approved_spenders.is_none()
            && self.approve_amount_limit.is_none()
            && self.approve_tier_override.is_none()
    }

    fn check_bounds(&self) -> Result<()> {
        if let Some(spending) = &self.spending {
            if spending.delay_seconds > MAX_WAIT_SECS {
                return Err(WardenError::Validation(format!(
                    "delay_seconds {} exceeds the {MAX_WAIT_SECS}s maximum",
                    spending.delay_seconds
                )));
            }
            if let Some(timeout) = spending.approval_timeout.filter(|t| *t > MAX_WAIT_SECS) {
                return Err(WardenError::Validation(format!(
                    "approval_timeout {timeout} exceeds the {MAX_WAIT_SECS}s maximum"
                )));
            }
        }
        if let Some(max) = self
            .approve_amount_limit
            .as_ref()
            .and_then(|r| r.max_amount.as_deref())
        {
            parse_allowance(max)?;
        }
        Ok(())
    }
}

fn pick<T: serde::de::DeserializeOwned>(policies: &[Policy], policy_type: PolicyType) -> Result<Option<T>> {
    winner(policies, policy_type).map(parse_rules).transpose()
}

fn winner(policies: &[Policy], policy_type: PolicyType) -> Option<&Policy> {
    policies
        .iter()
        .filter(|p| p.enabled && p.policy_type == policy_type)
        .max_by_key(|p| (p.priority, p.wallet_id.is_some(), p.network.is_some()))
}

fn parse_rules<T: serde::de::DeserializeOwned>(policy: &Policy) -> Result<T> {
    serde_json::from_value(policy.rules.clone()).map_err(|e| {
        WardenError::Validation(format!(
            "policy {} has invalid {} rules: {}",
            policy.id, policy.policy_type, e
        ))
    })
}
