//! # warden-policy
//!
//! Policy evaluation for outgoing transactions: deny rules over destinations,
//! networks, tokens, contracts and approvals, per-transaction
//! tiers from native and USD thresholds, and cumulative USD limits over
//! rolling daily and monthly windows.

pub mod engine;
pub mod evaluator;
pub mod ledger;
pub mod rules;
pub mod tier;

pub use engine::PolicyEngine;
pub use evaluator::{
    ApprovalReason, CumulativeWarning, DenyRule, EvaluationInput, PolicyDecision, PolicyEvaluator,
    RequestLeg, RuleVerdict, SpendSnapshot, Window,
};
pub use ledger::ReservationLedger;
pub use rules::{
    AddressEntry, AllowedNetworksRules, AllowedTokensRules, ApproveAmountLimitRules,
    ApproveTierOverrideRules, ApprovedSpendersRules, ContractWhitelistRules, MethodEntry,
    MAX_WAIT_SECS, MethodWhitelistRules, ResolvedPolicies, SpendingLimitRules,
    UNLIMITED_APPROVAL_THRESHOLD, WhitelistRules,
};
