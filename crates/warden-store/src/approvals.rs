use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::{Result, TxId};

use crate::store::{Store, store_err};
use crate::wallets::{from_epoch, parse_uuid};

/// One owner sign-off slot per APPROVAL-tier transaction.
///
/// `approved_at` and `rejected_at` are mutually exclusive; the first write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: Uuid,
    pub tx_id: TxId,
    /// Owner address expected to sign.
    pub required_by: String,
    pub expires_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub owner_signature: Option<String>,
    pub approval_channel: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingApproval {
    pub fn is_decided(&self) -> bool {
        self.approved_at.is_some() || self.rejected_at.is_some()
    }
}

const APPROVAL_COLUMNS: &str = "a.id, a.tx_id, a.required_by, a.expires_at, a.approved_at, \
     a.rejected_at, a.owner_signature, a.approval_channel, a.created_at";

struct RawApproval {
    id: String,
    tx_id: String,
    required_by: String,
    expires_at: i64,
    approved_at: Option<i64>,
    rejected_at: Option<i64>,
    owner_signature: Option<String>,
    approval_channel: Option<String>,
    created_at: i64,
}

impl RawApproval {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tx_id: row.get(1)?,
            required_by: row.get(2)?,
            expires_at: row.get(3)?,
            approved_at: row.get(4)?,
            rejected_at: row.get(5)?,
            owner_signature: row.get(6)?,
            approval_channel: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_approval(self) -> Result<PendingApproval> {
        Ok(PendingApproval {
            id: parse_uuid(&self.id)?,
            tx_id: parse_uuid(&self.tx_id)?,
            required_by: self.required_by,
            expires_at: from_epoch(self.expires_at),
            approved_at: self.approved_at.map(from_epoch),
            rejected_at: self.rejected_at.map(from_epoch),
            owner_signature: self.owner_signature,
            approval_channel: self.approval_channel,
            created_at: from_epoch(self.created_at),
        })
    }
}

fn collect(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<PendingApproval>> {
    let mut stmt = conn.prepare(sql).map_err(store_err)?;
    let raws = stmt
        .query_map(params, RawApproval::read)
        .map_err(store_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_err)?;
    raws.into_iter().map(RawApproval::into_approval).collect()
}

pub fn insert_approval(conn: &Connection, approval: &PendingApproval) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_approvals (id, tx_id, required_by, expires_at, approved_at, rejected_at,
                                        owner_signature, approval_channel, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            approval.id.to_string(),
            approval.tx_id.to_string(),
            approval.required_by,
            approval.expires_at.timestamp(),
            approval.approved_at.map(|t| t.timestamp()),
            approval.rejected_at.map(|t| t.timestamp()),
            approval.owner_signature,
            approval.approval_channel,
            approval.created_at.timestamp(),
        ],
    )
    .map_err(store_err)?;
    Ok(())
}

pub fn approval_for_tx(conn: &Connection, tx_id: TxId) -> Result<Option<PendingApproval>> {
    let sql = format!("SELECT {APPROVAL_COLUMNS} FROM pending_approvals a WHERE a.tx_id = ?1");
    conn.query_row(&sql, rusqlite::params![tx_id.to_string()], RawApproval::read)
        .optional()
        .map_err(store_err)?
        .map(RawApproval::into_approval)
        .transpose()
}

/// First writer wins: only an undecided row can be approved.
pub fn record_approval(
    conn: &Connection,
    tx_id: TxId,
    signature: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE pending_approvals SET approved_at = ?2, owner_signature = ?3
             WHERE tx_id = ?1 AND approved_at IS NULL AND rejected_at IS NULL",
            rusqlite::params![tx_id.to_string(), at.timestamp(), signature],
        )
        .map_err(store_err)?;
    Ok(rows > 0)
}

/// First writer wins: only an undecided row can be rejected.
pub fn record_rejection(
    conn: &Connection,
    tx_id: TxId,
    signature: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE pending_approvals SET rejected_at = ?2, owner_signature = ?3
             WHERE tx_id = ?1 AND approved_at IS NULL AND rejected_at IS NULL",
            rusqlite::params![tx_id.to_string(), at.timestamp(), signature],
        )
        .map_err(store_err)?;
    Ok(rows > 0)
}

pub fn set_approval_channel(conn: &Connection, tx_id: TxId, channel: &str) -> Result<()> {
    conn.execute(
        "UPDATE pending_approvals SET approval_channel = ?2 WHERE tx_id = ?1",
        rusqlite::params![tx_id.to_string(), channel],
    )
    .map_err(store_err)?;
    Ok(())
}

/// Undecided approvals whose transaction is still waiting in QUEUED.
pub fn undecided(conn: &Connection) -> Result<Vec<PendingApproval>> {
    let sql = format!(
        "SELECT {APPROVAL_COLUMNS} FROM pending_approvals a
         JOIN transactions t ON t.id = a.tx_id
         WHERE a.approved_at IS NULL AND a.rejected_at IS NULL AND t.status = 'QUEUED'
         ORDER BY a.expires_at"
    );
    collect(conn, &sql, [])
}

/// Undecided approvals past their deadline whose transaction is still QUEUED.
pub fn overdue(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<PendingApproval>> {
    let sql = format!(
        "SELECT {APPROVAL_COLUMNS} FROM pending_approvals a
         JOIN transactions t ON t.id = a.tx_id
         WHERE a.approved_at IS NULL AND a.rejected_at IS NULL
           AND t.status = 'QUEUED' AND a.expires_at <= ?1"
    );
    collect(conn, &sql, rusqlite::params![now.timestamp()])
}

/// Approved transactions that have not been claimed for execution yet.
pub fn approved_awaiting_execution(conn: &Connection) -> Result<Vec<TxId>> {
    let mut stmt = conn
        .prepare(
            "SELECT t.id FROM transactions t
             JOIN pending_approvals a ON a.tx_id = t.id
             WHERE t.status = 'QUEUED' AND a.approved_at IS NOT NULL
             ORDER BY a.approved_at",
        )
        .map_err(store_err)?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(store_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_err)?;
    ids.iter().map(|s| parse_uuid(s)).collect()
}

impl Store {
    pub fn approval_for_tx(&self, tx_id: TxId) -> Result<Option<PendingApproval>> {
        approval_for_tx(&self.conn(), tx_id)
    }

    pub fn undecided_approvals(&self) -> Result<Vec<PendingApproval>> {
        undecided(&self.conn())
    }

    pub fn overdue_approvals(&self, now: DateTime<Utc>) -> Result<Vec<PendingApproval>> {
        overdue(&self.conn(), now)
    }

    pub fn approved_awaiting_execution(&self) -> Result<Vec<TxId>> {
        approved_awaiting_execution(&self.conn())
    }

    pub fn set_approval_channel(&self, tx_id: TxId, channel: &str) -> Result<()> {
        set_approval_channel(&self.conn(), tx_id, channel)
    }
}
