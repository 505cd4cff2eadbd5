use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use warden_core::{Result, WalletId, WardenError};

use crate::store::{Store, store_err};
use crate::wallets::{from_epoch, parse_uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyType {
    SpendingLimit,
    Whitelist,
    AllowedNetworks,
    AllowedTokens,
    ContractWhitelist,
    MethodWhitelist,
    ApprovedSpenders,
    ApproveAmountLimit,
    ApproveTierOverride,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpendingLimit => "SPENDING_LIMIT",
            Self::Whitelist => "WHITELIST",
            Self::AllowedNetworks => "ALLOWED_NETWORKS",
            Self::AllowedTokens => "ALLOWED_TOKENS",
            Self::ContractWhitelist => "CONTRACT_WHITELIST",
            Self::MethodWhitelist => "METHOD_WHITELIST",
            Self::ApprovedSpenders => "APPROVED_SPENDERS",
            Self::ApproveAmountLimit => "APPROVE_AMOUNT_LIMIT",
            Self::ApproveTierOverride => "APPROVE_TIER_OVERRIDE",
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyType {
    type Err = WardenError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SPENDING_LIMIT" => Ok(Self::SpendingLimit),
            "WHITELIST" => Ok(Self::Whitelist),
            "ALLOWED_NETWORKS" => Ok(Self::AllowedNetworks),
            "ALLOWED_TOKENS" => Ok(Self::AllowedTokens),
            "CONTRACT_WHITELIST" => Ok(Self::ContractWhitelist),
            "METHOD_WHITELIST" => Ok(Self::MethodWhitelist),
            "APPROVED_SPENDERS" => Ok(Self::ApprovedSpenders),
            "APPROVE_AMOUNT_LIMIT" => Ok(Self::ApproveAmountLimit),
            "APPROVE_TIER_OVERRIDE" => Ok(Self::ApproveTierOverride),
            other => Err(WardenError::Validation(format!(
                "unknown policy type '{other}'"
            ))),
        }
    }
}

/// A stored policy. `rules` is type-specific JSON interpreted by the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    /// `None` = applies to every wallet.
    pub wallet_id: Option<WalletId>,
    pub policy_type: PolicyType,
    pub rules: serde_json::Value,
    pub priority: i64,
    pub enabled: bool,
    /// `None` = applies on every network.
    pub network: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(policy_type: PolicyType, rules: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id: None,
            policy_type,
            rules,
            priority: 0,
            enabled: true,
            network: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_wallet(mut self, wallet_id: WalletId) -> Self {
        self.wallet_id = Some(wallet_id);
        self
    }

    pub fn on_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

struct RawPolicy {
    id: String,
    wallet_id: Option<String>,
    policy_type: String,
    rules: String,
    priority: i64,
    enabled: bool,
    network: Option<String>,
    created_at: i64,
}

impl RawPolicy {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            wallet_id: row.get(1)?,
            policy_type: row.get(2)?,
            rules: row.get(3)?,
            priority: row.get(4)?,
            enabled: row.get(5)?,
            network: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_policy(self) -> Result<Policy> {
        Ok(Policy {
            id: parse_uuid(&self.id)?,
            wallet_id: self.wallet_id.as_deref().map(parse_uuid).transpose()?,
            policy_type: self.policy_type.parse()?,
            rules: serde_json::from_str(&self.rules)?,
            priority: self.priority,
            enabled: self.enabled,
            network: self.network,
            created_at: from_epoch(self.created_at),
        })
    }
}

const POLICY_COLUMNS: &str = "id, wallet_id, type, rules, priority, enabled, network, created_at";

fn collect(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Policy>> {
    let mut stmt = conn.prepare(sql).map_err(store_err)?;
    let raws = stmt
        .query_map(params, RawPolicy::read)
        .map_err(store_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_err)?;
    raws.into_iter().map(RawPolicy::into_policy).collect()
}

/// Enabled policies that apply to `wallet_id` on `network`: wallet-scoped or
/// global, network-scoped or all-networks.
pub fn applicable_policies(
    conn: &Connection,
    wallet_id: WalletId,
    network: &str,
) -> Result<Vec<Policy>> {
    let sql = format!(
        "SELECT {POLICY_COLUMNS} FROM policies
         WHERE enabled = 1
           AND (wallet_id IS NULL OR wallet_id = ?1)
           AND (network IS NULL OR network = ?2)
         ORDER BY priority DESC"
    );
    collect(conn, &sql, rusqlite::params![wallet_id.to_string(), network])
}

impl Store {
    pub fn insert_policy(&self, policy: &Policy) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO policies (id, wallet_id, type, rules, priority, enabled, network, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    policy.id.to_string(),
                    policy.wallet_id.map(|w| w.to_string()),
                    policy.policy_type.as_str(),
                    serde_json::to_string(&policy.rules)?,
                    policy.priority,
                    policy.enabled,
                    policy.network,
                    policy.created_at.timestamp(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// All policies, or those scoped to one wallet (global ones included).
    pub fn list_policies(&self, wallet_id: Option<WalletId>) -> Result<Vec<Policy>> {
        let sql = format!(
            "SELECT {POLICY_COLUMNS} FROM policies
             WHERE ?1 IS NULL OR wallet_id IS NULL OR wallet_id = ?1
             ORDER BY priority DESC, created_at"
        );
        collect(
            &self.conn(),
            &sql,
            rusqlite::params![wallet_id.map(|w| w.to_string())],
        )
    }

    pub fn applicable_policies(&self, wallet_id: WalletId, network: &str) -> Result<Vec<Policy>> {
        applicable_policies(&self.conn(), wallet_id, network)
    }

    pub fn set_policy_enabled(&self, id: Uuid, enabled: bool) -> Result<bool> {
        let rows = self
            .conn()
            .execute(
                "UPDATE policies SET enabled = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), enabled],
            )
            .map_err(store_err)?;
        Ok(rows > 0)
    }

    pub fn delete_policy(&self, id: Uuid) -> Result<bool> {
        let rows = self
            .conn()
            .execute(
                "DELETE FROM policies WHERE id = ?1",
                rusqlite::params![id.to_string()],
            )
            .map_err(store_err)?;
        Ok(rows > 0)
    }
}
