use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use warden_config::TieBreak;
use warden_config::schema::PolicyConfig;
use warden_core::request::{BatchInstruction, cmp_amounts};
use warden_core::{Tier, TransactionRequest, TxType, WalletId};

use crate::rules::{ApproveAmountLimitRules, ResolvedPolicies, UNLIMITED_APPROVAL_THRESHOLD};
use crate::tier::per_tx_tier;

/// One leg of a request, reduced to what the deny rules look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestLeg {
    Transfer { to: String },
    TokenTransfer { to: String, token: String },
    ContractCall { to: String, selector: Option<String> },
    Approve { spender: String, token: String, amount: String },
}

impl RequestLeg {
    /// A single-leg request yields one leg; a batch yields one per instruction.
    pub fn from_request(request: &TransactionRequest) -> Vec<Self> {
        match request {
            TransactionRequest::Transfer { to, .. } => vec![Self::Transfer { to: to.clone() }],
            TransactionRequest::TokenTransfer { to, token, .. } => vec![Self::TokenTransfer {
                to: to.clone(),
                token: token.address.clone(),
            }],
            TransactionRequest::ContractCall { to, calldata, .. } => vec![Self::ContractCall {
                to: to.clone(),
                selector: calldata.as_deref().and_then(selector),
            }],
            TransactionRequest::Approve { spender, token, amount, .. } => vec![Self::Approve {
                spender: spender.clone(),
                token: token.address.clone(),
                amount: amount.clone(),
            }],
            TransactionRequest::Batch { instructions, .. } => {
                instructions.iter().map(Self::from_instruction).collect()
            }
        }
    }

    fn from_instruction(ix: &BatchInstruction) -> Self {
        match ix {
            BatchInstruction::Transfer { to, .. } => Self::Transfer { to: to.clone() },
            BatchInstruction::TokenTransfer { to, token, .. } => Self::TokenTransfer {
                to: to.clone(),
                token: token.address.clone(),
            },
            BatchInstruction::ContractCall { to, calldata, .. } => Self::ContractCall {
                to: to.clone(),
                selector: calldata.as_deref().and_then(selector),
            },
            BatchInstruction::Approve { spender, token, amount } => Self::Approve {
                spender: spender.clone(),
                token: token.address.clone(),
                amount: amount.clone(),
            },
        }
    }

    pub fn is_approve(&self) -> bool {
        matches!(self, Self::Approve { .. })
    }
}

/// The 4-byte function selector at the head of EVM calldata, lowercased.
pub fn selector(calldata: &str) -> Option<String> {
    let hex = calldata
        .strip_prefix("0x")
        .or_else(|| calldata.strip_prefix("0X"))
        .unwrap_or(calldata);
    let head = hex.get(..8)?;
    head.bytes()
        .all(|b| b.is_ascii_hexdigit())
        .then(|| format!("0x{}", head.to_ascii_lowercase()))
}

/// A normalized request as the evaluator sees it.
#[derive(Debug, Clone)]
pub struct EvaluationInput {
    pub wallet_id: WalletId,
    pub tx_type: TxType,
    pub destinations: Vec<String>,
    pub network: String,
    /// Native amount in smallest units.
    pub native_amount: u128,
    /// `None` when USD resolution failed. Never substitute zero.
    pub usd_amount: Option<f64>,
    pub legs: Vec<RequestLeg>,
}

/// Committed plus reserved USD in each trailing window, and the native
/// amount still held by the wallet's in-flight transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpendSnapshot {
    pub daily: f64,
    pub monthly: f64,
    pub reserved_native: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Daily,
    Monthly,
}

impl Window {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }

    fn order(tie_break: TieBreak) -> [Window; 2] {
        match tie_break {
            TieBreak::DailyFirst => [Self::Daily, Self::Monthly],
            TieBreak::MonthlyFirst => [Self::Monthly, Self::Daily],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalReason {
    PerTx,
    CumulativeDaily,
    CumulativeMonthly,
    ApproveOverride,
}

impl ApprovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerTx => "per_tx",
            Self::ApproveOverride => "approve_override",
            Self::CumulativeDaily => "cumulative_daily",
            Self::CumulativeMonthly => "cumulative_monthly",
        }
    }

    fn cumulative(window: Window) -> Self {
        match window {
            Window::Daily => Self::CumulativeDaily,
            Window::Monthly => Self::CumulativeMonthly,
        }
    }
}

/// Informational: a window is at or above the warning ratio without exceeding it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CumulativeWarning {
    #[serde(rename = "type")]
    pub window: Window,
    /// Window total including the current request.
    pub spent: f64,
    pub limit: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub tier: Tier,
    /// Why a deny rule refused the request.
    pub reason: Option<String>,
    pub approval_reason: Option<ApprovalReason>,
    pub cumulative_warning: Option<CumulativeWarning>,
    /// Set only when the final tier is DELAY.
    pub delay_seconds: Option<u64>,
    pub approval_timeout: Option<u64>,
    /// The spending policy's `delay_seconds`, whatever the final tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_delay_seconds: Option<u64>,
}

impl PolicyDecision {
    fn denied(reason: String) -> Self {
        Self {
            allowed: false,
            tier: Tier::Instant,
            reason: Some(reason),
            approval_reason: None,
            cumulative_warning: None,
            delay_seconds: None,
            approval_timeout: None,
            policy_delay_seconds: None,
        }
    }

    /// Turn an APPROVAL decision into a DELAY one using the policy's delay.
    pub fn downgrade_to_delay(&mut self) {
        self.tier = Tier::Delay;
        self.approval_reason = None;
        self.delay_seconds = Some(self.policy_delay_seconds.unwrap_or(0));
    }
}

// ── Deny rules ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleVerdict {
    Pass,
    Deny(String),
}

/// A rule that can refuse a request outright, before tiering.
pub trait DenyRule: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, input: &EvaluationInput, policies: &ResolvedPolicies) -> RuleVerdict;
}

/// Every destination must be whitelisted (case-insensitive).
struct WhitelistRule;

impl DenyRule for WhitelistRule {
    fn name(&self) -> &str {
        "whitelist"
    }

    fn check(&self, input: &EvaluationInput, policies: &ResolvedPolicies) -> RuleVerdict {
        let Some(whitelist) = &policies.whitelist else {
            return RuleVerdict::Pass;
        };
        for dest in &input.destinations {
            let listed = whitelist
                .allowed_addresses
                .iter()
                .any(|a| a.eq_ignore_ascii_case(dest));
            if !listed {
                return RuleVerdict::Deny(format!("destination {dest} is not whitelisted"));
            }
        }
        RuleVerdict::Pass
    }
}

/// The resolved network must be listed.
struct AllowedNetworksRule;

impl DenyRule for AllowedNetworksRule {
    fn name(&self) -> &str {
        "allowed_networks"
    }

    fn check(&self, input: &EvaluationInput, policies: &ResolvedPolicies) -> RuleVerdict {
        match &policies.allowed_networks {
            Some(rules) if !rules.networks.iter().any(|n| n == &input.network) => {
                RuleVerdict::Deny(format!("network {} is not allowed", input.network))
            }
            _ => RuleVerdict::Pass,
        }
    }
}

/// Token transfers must name a listed token. Without an ALLOWED_TOKENS
/// policy they are refused when `default_deny` is set and any other policy
/// applies to the wallet.
struct AllowedTokensRule {
    default_deny: bool,
}

impl DenyRule for AllowedTokensRule {
    fn name(&self) -> &str {
        "allowed_tokens"
    }

    fn check(&self, input: &EvaluationInput, policies: &ResolvedPolicies) -> RuleVerdict {
        for leg in &input.legs {
            let RequestLeg::TokenTransfer { token, .. } = leg else { continue };
            match &policies.allowed_tokens {
                Some(rules) if !rules.allows(token) => {
                    return RuleVerdict::Deny(format!("token {token} is not in the allowed list"));
                }
                None if self.default_deny && !policies.is_empty() => {
                    return RuleVerdict::Deny(
                        "token transfers disabled: no ALLOWED_TOKENS policy configured".into(),
                    );
                }
                _ => {}
            }
        }
        RuleVerdict::Pass
    }
}

/// Contract calls must target a listed contract, with the same default-deny
/// behavior as tokens.
struct ContractWhitelistRule {
    default_deny: bool,
}

impl DenyRule for ContractWhitelistRule {
    fn name(&self) -> &str {
        "contract_whitelist"
    }

    fn check(&self, input: &EvaluationInput, policies: &ResolvedPolicies) -> RuleVerdict {
        for leg in &input.legs {
            let RequestLeg::ContractCall { to, .. } = leg else { continue };
            match &policies.contract_whitelist {
                Some(rules) if !rules.allows(to) => {
                    return RuleVerdict::Deny(format!("contract {to} is not whitelisted"));
                }
                None if self.default_deny && !policies.is_empty() => {
                    return RuleVerdict::Deny(
                        "contract calls disabled: no CONTRACT_WHITELIST policy configured".into(),
                    );
                }
                _ => {}
            }
        }
        RuleVerdict::Pass
    }
}

/// Contracts with a METHOD_WHITELIST entry accept only the listed selectors.
/// Contracts without an entry are unrestricted.
struct MethodWhitelistRule;

impl DenyRule for MethodWhitelistRule {
    fn name(&self) -> &str {
        "method_whitelist"
    }

    fn check(&self, input: &EvaluationInput, policies: &ResolvedPolicies) -> RuleVerdict {
        let Some(rules) = &policies.method_whitelist else {
            return RuleVerdict::Pass;
        };
        for leg in &input.legs {
            let RequestLeg::ContractCall { to, selector } = leg else { continue };
            let Some(allowed) = rules.selectors_for(to) else { continue };
            let Some(selector) = selector else {
                return RuleVerdict::Deny(format!("call to {to} has no function selector"));
            };
            if !allowed.iter().any(|s| s.eq_ignore_ascii_case(selector)) {
                return RuleVerdict::Deny(format!("method {selector} is not whitelisted on {to}"));
            }
        }
        RuleVerdict::Pass
    }
}

/// Approvals must name a listed spender, with the same default-deny
/// behavior as tokens.
struct ApprovedSpendersRule {
    default_deny: bool,
}

impl DenyRule for ApprovedSpendersRule {
    fn name(&self) -> &str {
        "approved_spenders"
    }

    fn check(&self, input: &EvaluationInput, policies: &ResolvedPolicies) -> RuleVerdict {
        for leg in &input.legs {
            let RequestLeg::Approve { spender, .. } = leg else { continue };
            match &policies.approved_spenders {
                Some(rules) if !rules.allows(spender) => {
                    return RuleVerdict::Deny(format!("spender {spender} is not in the approved list"));
                }
                None if self.default_deny && !policies.is_empty() => {
                    return RuleVerdict::Deny(
                        "token approvals disabled: no APPROVED_SPENDERS policy configured".into(),
                    );
                }
                _ => {}
            }
        }
        RuleVerdict::Pass
    }
}

/// Caps allowance size. Unlimited approvals are blocked unless a policy
/// explicitly turns `block_unlimited` off.
struct ApproveAmountLimitRule;

impl DenyRule for ApproveAmountLimitRule {
    fn name(&self) -> &str {
        "approve_amount_limit"
    }

    fn check(&self, input: &EvaluationInput, policies: &ResolvedPolicies) -> RuleVerdict {
        let fallback = ApproveAmountLimitRules::default();
        let rules = policies.approve_amount_limit.as_ref().unwrap_or(&fallback);
        for leg in &input.legs {
            let RequestLeg::Approve { amount, .. } = leg else { continue };
            if rules.block_unlimited && cmp_amounts(amount, UNLIMITED_APPROVAL_THRESHOLD).is_ge() {
                return RuleVerdict::Deny("unlimited token approval is blocked".into());
            }
            if let Some(max) = &rules.max_amount {
                if cmp_amounts(amount, max).is_gt() {
                    return RuleVerdict::Deny(format!("approve amount {amount} exceeds limit {max}"));
                }
            }
        }
        RuleVerdict::Pass
    }
}

// ── Evaluator ──────────────────────────────────────────────────

/// Pure tier computation: deny rules, then per-transaction tier, then
/// cumulative limits over the spend snapshot.
pub struct PolicyEvaluator {
    rules: Vec<Box<dyn DenyRule>>,
    tie_break: TieBreak,
    warning_ratio: f64,
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

impl PolicyEvaluator {
    pub fn new(tie_break: TieBreak, warning_ratio: f64) -> Self {
        Self::from_config(&PolicyConfig {
            cumulative_tie_break: tie_break,
            warning_ratio,
            ..PolicyConfig::default()
        })
    }

    /// Built-in deny rules, in evaluation order.
    pub fn from_config(config: &PolicyConfig) -> Self {
        let mut evaluator = Self {
            rules: Vec::new(),
            tie_break: config.cumulative_tie_break,
            warning_ratio: config.warning_ratio,
        };
        evaluator.add_rule(Box::new(WhitelistRule));
        evaluator.add_rule(Box::new(AllowedNetworksRule));
        evaluator.add_rule(Box::new(AllowedTokensRule {
            default_deny: config.default_deny_tokens,
        }));
        evaluator.add_rule(Box::new(ContractWhitelistRule {
            default_deny: config.default_deny_contracts,
        }));
        evaluator.add_rule(Box::new(MethodWhitelistRule));
        evaluator.add_rule(Box::new(ApprovedSpendersRule {
            default_deny: config.default_deny_spenders,
        }));
        evaluator.add_rule(Box::new(ApproveAmountLimitRule));
        evaluator
    }

    pub fn add_rule(&mut self, rule: Box<dyn DenyRule>) {
        self.rules.push(rule);
    }

    /// Minimum tier for requests that grant an allowance: the
    /// APPROVE_TIER_OVERRIDE tier, or APPROVAL when no override applies.
    /// Wallets with no policies at all get no floor.
    fn approve_floor(input: &EvaluationInput, policies: &ResolvedPolicies) -> Option<Tier> {
        if policies.is_empty() || !input.legs.iter().any(RequestLeg::is_approve) {
            return None;
        }
        Some(
            policies
                .approve_tier_override
                .as_ref()
                .map_or(Tier::Approval, |o| o.tier),
        )
    }

    pub fn evaluate(
        &self,
        input: &EvaluationInput,
        policies: &ResolvedPolicies,
        snapshot: &SpendSnapshot,
    ) -> PolicyDecision {
        for rule in &self.rules {
            if let RuleVerdict::Deny(reason) = rule.check(input, policies) {
                info!(rule = rule.name(), wallet_id = %input.wallet_id, %reason, "policy denied request");
                return PolicyDecision::denied(reason);
            }
        }

        let approve_floor = Self::approve_floor(input, policies);

        let Some(spending) = &policies.spending else {
            let tier = approve_floor.unwrap_or(Tier::Instant);
            return PolicyDecision {
                allowed: true,
                tier,
                reason: None,
                approval_reason: (tier == Tier::Approval).then_some(ApprovalReason::ApproveOverride),
                cumulative_warning: None,
                delay_seconds: (tier == Tier::Delay).then_some(0),
                approval_timeout: None,
                policy_delay_seconds: None,
            };
        };

        // Native value held by the wallet's PENDING/QUEUED transactions counts
        // toward the band. A zero-value request stays INSTANT.
        let effective_native = match input.native_amount {
            0 => 0,
            amount => amount.saturating_add(snapshot.reserved_native),
        };
        let per_tx = per_tx_tier(effective_native, input.usd_amount, spending);

        let mut cumulative_tier = Tier::Instant;
        let mut cumulative_reason = None;
        let mut warning = None;

        if let Some(usd) = input.usd_amount.filter(|u| *u > 0.0) {
            for window in Window::order(self.tie_break) {
                let (limit, spent) = match window {
                    Window::Daily => (spending.daily_limit_usd, snapshot.daily),
                    Window::Monthly => (spending.monthly_limit_usd, snapshot.monthly),
                };
                let Some(limit) = limit else { continue };
                let total = spent + usd;
                if total > limit {
                    cumulative_tier = Tier::Approval;
                    cumulative_reason = Some(ApprovalReason::cumulative(window));
                    debug!(window = window.as_str(), total, limit, "cumulative limit exceeded");
                    break;
                }
                let ratio = if limit > 0.0 { total / limit } else { 1.0 };
                if warning.is_none() && ratio >= self.warning_ratio {
                    warning = Some(CumulativeWarning {
                        window,
                        spent: total,
                        limit,
                        ratio,
                    });
                }
            }
        }

        let amount_tier = per_tx.max(cumulative_tier);
        let tier = approve_floor.map_or(amount_tier, |floor| amount_tier.max(floor));
        let approval_reason = (tier == Tier::Approval).then(|| {
            cumulative_reason
                .or_else(|| (amount_tier < tier).then_some(ApprovalReason::ApproveOverride))
                .unwrap_or(ApprovalReason::PerTx)
        });

        PolicyDecision {
            allowed: true,
            tier,
            reason: None,
            approval_reason,
            cumulative_warning: warning,
            delay_seconds: (tier == Tier::Delay).then_some(spending.delay_seconds),
            approval_timeout: spending.approval_timeout,
            policy_delay_seconds: Some(spending.delay_seconds),
        }
    }
}
