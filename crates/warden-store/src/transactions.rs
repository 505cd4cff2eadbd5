//! Transaction rows and their status transitions.
//!
//! Every transition is a compare-and-set on the current status. Leaving
//! PENDING/QUEUED for any other status nulls the reservation in the same
//! statement, so cumulative sums never see a released reservation.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use warden_core::{Result, SessionId, Tier, Transaction, TxId, TxStatus, WalletId, WardenError};

use crate::store::{Store, store_err};
use crate::wallets::{from_epoch, parse_uuid};

const TX_COLUMNS: &str = "id, wallet_id, session_id, type, status, tier, amount, to_address, \
     network, request, amount_usd, reserved_amount, reserved_amount_usd, tx_hash, error, \
     queued_at, delay_seconds, created_at, executed_at";

struct RawTx {
    id: String,
    wallet_id: String,
    session_id: Option<String>,
    tx_type: String,
    status: String,
    tier: Option<String>,
    amount: String,
    to_address: Option<String>,
    network: String,
    request: String,
    amount_usd: Option<f64>,
    reserved_amount: Option<String>,
    reserved_amount_usd: Option<f64>,
    tx_hash: Option<String>,
    error: Option<String>,
    queued_at: Option<i64>,
    delay_seconds: Option<i64>,
    created_at: i64,
    executed_at: Option<i64>,
}

impl RawTx {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            wallet_id: row.get(1)?,
            session_id: row.get(2)?,
            tx_type: row.get(3)?,
            status: row.get(4)?,
            tier: row.get(5)?,
            amount: row.get(6)?,
            to_address: row.get(7)?,
            network: row.get(8)?,
            request: row.get(9)?,
            amount_usd: row.get(10)?,
            reserved_amount: row.get(11)?,
            reserved_amount_usd: row.get(12)?,
            tx_hash: row.get(13)?,
            error: row.get(14)?,
            queued_at: row.get(15)?,
            delay_seconds: row.get(16)?,
            created_at: row.get(17)?,
            executed_at: row.get(18)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            id: parse_uuid(&self.id)?,
            wallet_id: parse_uuid(&self.wallet_id)?,
            session_id: self.session_id.as_deref().map(parse_uuid).transpose()?,
            tx_type: self.tx_type.parse()?,
            status: self.status.parse()?,
            tier: self.tier.as_deref().map(str::parse::<Tier>).transpose()?,
            amount: self.amount,
            to_address: self.to_address,
            network: self.network,
            request: serde_json::from_str(&self.request)?,
            amount_usd: self.amount_usd,
            reserved_amount: self.reserved_amount,
            reserved_amount_usd: self.reserved_amount_usd,
            tx_hash: self.tx_hash,
            error: self.error,
            queued_at: self.queued_at.map(from_epoch),
            delay_seconds: self.delay_seconds.map(|d| d.max(0) as u64),
            created_at: from_epoch(self.created_at),
            executed_at: self.executed_at.map(from_epoch),
        })
    }
}

fn status_list(statuses: &[TxStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn insert_transaction(conn: &Connection, tx: &Transaction) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions (id, wallet_id, session_id, type, status, tier, amount, to_address,
                                   network, request, amount_usd, reserved_amount, reserved_amount_usd,
                                   tx_hash, error, queued_at, delay_seconds, created_at, executed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        rusqlite::params![
            tx.id.to_string(),
            tx.wallet_id.to_string(),
            tx.session_id.map(|s| s.to_string()),
            tx.tx_type.as_str(),
            tx.status.as_str(),
            tx.tier.map(|t| t.as_str()),
            tx.amount,
            tx.to_address,
            tx.network,
            serde_json::to_string(&tx.request)?,
            tx.amount_usd,
            tx.reserved_amount,
            tx.reserved_amount_usd,
            tx.tx_hash,
            tx.error,
            tx.queued_at.map(|t| t.timestamp()),
            tx.delay_seconds.map(|d| d as i64),
            tx.created_at.timestamp(),
            tx.executed_at.map(|t| t.timestamp()),
        ],
    )
    .map_err(store_err)?;
    Ok(())
}

pub fn get_transaction(conn: &Connection, id: TxId) -> Result<Option<Transaction>> {
    let sql = format!("SELECT {TX_COLUMNS} FROM transactions WHERE id = ?1");
    conn.query_row(&sql, rusqlite::params![id.to_string()], RawTx::read)
        .optional()
        .map_err(store_err)?
        .map(RawTx::into_transaction)
        .transpose()
}

/// Move `id` from any of `from` to `to`. Returns whether the row moved.
pub fn transition(conn: &Connection, id: TxId, from: &[TxStatus], to: TxStatus) -> Result<bool> {
    let clear = if to.holds_reservation() {
        ""
    } else {
        ", reserved_amount = NULL, reserved_amount_usd = NULL"
    };
    let sql = format!(
        "UPDATE transactions SET status = ?2{clear} WHERE id = ?1 AND status IN ({})",
        status_list(from)
    );
    let rows = conn
        .execute(&sql, rusqlite::params![id.to_string(), to.as_str()])
        .map_err(store_err)?;
    Ok(rows > 0)
}

pub fn set_tier(conn: &Connection, id: TxId, tier: Tier) -> Result<()> {
    conn.execute(
        "UPDATE transactions SET tier = ?2 WHERE id = ?1",
        rusqlite::params![id.to_string(), tier.as_str()],
    )
    .map_err(store_err)?;
    Ok(())
}

/// Bind the session that authorized `id`.
pub fn set_session(conn: &Connection, id: TxId, session_id: SessionId) -> Result<()> {
    conn.execute(
        "UPDATE transactions SET session_id = ?2 WHERE id = ?1",
        rusqlite::params![id.to_string(), session_id.to_string()],
    )
    .map_err(store_err)?;
    Ok(())
}

/// Record the stage-3 outcome: tier, USD value, and the reservation.
pub fn write_reservation(
    conn: &Connection,
    id: TxId,
    tier: Tier,
    amount_usd: Option<f64>,
    reserved_amount: &str,
) -> Result<()> {
    let rows = conn
        .execute(
            "UPDATE transactions
             SET tier = ?2, amount_usd = ?3, reserved_amount = ?4, reserved_amount_usd = ?3
             WHERE id = ?1 AND status IN ('PENDING', 'QUEUED')",
            rusqlite::params![id.to_string(), tier.as_str(), amount_usd, reserved_amount],
        )
        .map_err(store_err)?;
    if rows == 0 {
        return Err(WardenError::InvalidTransition {
            id,
            from: "terminal".into(),
            to: "reserved".into(),
        });
    }
    Ok(())
}

pub fn release_reservation(conn: &Connection, id: TxId) -> Result<()> {
    conn.execute(
        "UPDATE transactions SET reserved_amount = NULL, reserved_amount_usd = NULL WHERE id = ?1",
        rusqlite::params![id.to_string()],
    )
    .map_err(store_err)?;
    Ok(())
}

/// PENDING/QUEUED → QUEUED with a release timer. `delay_seconds = None` parks
/// without a timer (approval waits).
pub fn mark_queued(
    conn: &Connection,
    id: TxId,
    queued_at: DateTime<Utc>,
    delay_seconds: Option<u64>,
) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE transactions SET status = 'QUEUED', queued_at = ?2, delay_seconds = ?3
             WHERE id = ?1 AND status IN ('PENDING', 'QUEUED')",
            rusqlite::params![
                id.to_string(),
                queued_at.timestamp(),
                delay_seconds.map(|d| d as i64)
            ],
        )
        .map_err(store_err)?;
    Ok(rows > 0)
}

/// Claim a row for execution. Only one caller can win.
pub fn claim_for_execution(conn: &Connection, id: TxId) -> Result<bool> {
    transition(conn, id, &[TxStatus::Pending, TxStatus::Queued], TxStatus::Executing)
}

pub fn mark_submitted(conn: &Connection, id: TxId, tx_hash: &str) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE transactions SET status = 'SUBMITTED', tx_hash = ?2
             WHERE id = ?1 AND status = 'EXECUTING'",
            rusqlite::params![id.to_string(), tx_hash],
        )
        .map_err(store_err)?;
    Ok(rows > 0)
}

pub fn mark_confirmed(conn: &Connection, id: TxId, executed_at: DateTime<Utc>) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE transactions SET status = 'CONFIRMED', executed_at = ?2
             WHERE id = ?1 AND status IN ('EXECUTING', 'SUBMITTED')",
            rusqlite::params![id.to_string(), executed_at.timestamp()],
        )
        .map_err(store_err)?;
    Ok(rows > 0)
}

/// Mark FAILED unless the row already reached a terminal status.
pub fn mark_failed(conn: &Connection, id: TxId, error: &str) -> Result<bool> {
    let sql = format!(
        "UPDATE transactions
         SET status = 'FAILED', error = ?2, reserved_amount = NULL, reserved_amount_usd = NULL
         WHERE id = ?1 AND status NOT IN ({})",
        status_list(&[
            TxStatus::Confirmed,
            TxStatus::Failed,
            TxStatus::Cancelled,
            TxStatus::Expired
        ])
    );
    let rows = conn
        .execute(&sql, rusqlite::params![id.to_string(), error])
        .map_err(store_err)?;
    Ok(rows > 0)
}

/// Committed plus reserved USD for a wallet since `since`.
///
/// CONFIRMED, EXECUTING and SUBMITTED rows count their `amount_usd`; PENDING
/// and QUEUED rows count their reservation. Everything else counts nothing.
pub fn spent_since(conn: &Connection, wallet_id: WalletId, since: DateTime<Utc>) -> Result<f64> {
    conn.query_row(
        "SELECT COALESCE(SUM(CASE
                    WHEN status IN ('CONFIRMED', 'EXECUTING', 'SUBMITTED') THEN COALESCE(amount_usd, 0)
                    WHEN status IN ('PENDING', 'QUEUED') THEN COALESCE(reserved_amount_usd, 0)
                    ELSE 0 END), 0)
         FROM transactions WHERE wallet_id = ?1 AND created_at >= ?2",
        rusqlite::params![wallet_id.to_string(), since.timestamp()],
        |row| row.get(0),
    )
    .map_err(store_err)
}

/// QUEUED rows whose delay has elapsed.
/// Native base units still held by PENDING/QUEUED transactions of a wallet.
///
/// Amounts are stored as decimal strings wider than SQLite integers, so the
/// sum happens here rather than in SQL.
pub fn reserved_native(conn: &Connection, wallet_id: WalletId) -> Result<u128> {
    let mut stmt = conn
        .prepare(
            "SELECT reserved_amount FROM transactions
             WHERE wallet_id = ?1 AND status IN ('PENDING', 'QUEUED') AND reserved_amount IS NOT NULL",
        )
        .map_err(store_err)?;
    let rows = stmt
        .query_map([wallet_id.to_string()], |row| row.get::<_, String>(0))
        .map_err(store_err)?;
    let mut total: u128 = 0;
    for row in rows {
        let raw = row.map_err(store_err)?;
        let amount = raw
            .parse::<u128>()
            .map_err(|_| WardenError::Store(format!("corrupt reserved amount: {raw}")))?;
        total = total.saturating_add(amount);
    }
    Ok(total)
}

pub fn due_delayed(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<TxId>> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM transactions
             WHERE status = 'QUEUED' AND delay_seconds IS NOT NULL
               AND queued_at + delay_seconds <= ?1
             ORDER BY queued_at",
        )
        .map_err(store_err)?;
    let ids = stmt
        .query_map(rusqlite::params![now.timestamp()], |row| row.get::<_, String>(0))
        .map_err(store_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_err)?;
    ids.iter().map(|s| parse_uuid(s)).collect()
}

pub fn list_transactions(
    conn: &Connection,
    wallet_id: Option<WalletId>,
    status: Option<TxStatus>,
    limit: usize,
) -> Result<Vec<Transaction>> {
    let sql = format!(
        "SELECT {TX_COLUMNS} FROM transactions
         WHERE (?1 IS NULL OR wallet_id = ?1) AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at DESC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql).map_err(store_err)?;
    let raws = stmt
        .query_map(
            rusqlite::params![
                wallet_id.map(|w| w.to_string()),
                status.map(|s| s.as_str()),
                limit as i64
            ],
            RawTx::read,
        )
        .map_err(store_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_err)?;
    raws.into_iter().map(RawTx::into_transaction).collect()
}

/// Row count per status, optionally for one wallet. Statuses with no rows are omitted.
pub fn count_by_status(conn: &Connection, wallet_id: Option<WalletId>) -> Result<Vec<(TxStatus, u64)>> {
    let mut stmt = conn
        .prepare(
            "SELECT status, COUNT(*) FROM transactions
             WHERE (?1 IS NULL OR wallet_id = ?1)
             GROUP BY status ORDER BY status",
        )
        .map_err(store_err)?;
    let rows = stmt
        .query_map(rusqlite::params![wallet_id.map(|w| w.to_string())], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(store_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_err)?;
    rows.into_iter()
        .map(|(status, count)| Ok((status.parse()?, count as u64)))
        .collect()
}

impl Store {
    pub fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        insert_transaction(&self.conn(), tx)
    }

    /// Fetch a transaction, failing with `TxNotFound`.
    pub fn get_transaction(&self, id: TxId) -> Result<Transaction> {
        get_transaction(&self.conn(), id)?.ok_or(WardenError::TxNotFound(id))
    }

    pub fn transition(&self, id: TxId, from: &[TxStatus], to: TxStatus) -> Result<bool> {
        transition(&self.conn(), id, from, to)
    }

    pub fn set_tier(&self, id: TxId, tier: Tier) -> Result<()> {
        set_tier(&self.conn(), id, tier)
    }

    pub fn set_session(&self, id: TxId, session_id: SessionId) -> Result<()> {
        set_session(&self.conn(), id, session_id)
    }

    pub fn mark_queued(
        &self,
        id: TxId,
        queued_at: DateTime<Utc>,
        delay_seconds: Option<u64>,
    ) -> Result<bool> {
        mark_queued(&self.conn(), id, queued_at, delay_seconds)
    }

    pub fn claim_for_execution(&self, id: TxId) -> Result<bool> {
        claim_for_execution(&self.conn(), id)
    }

    pub fn mark_submitted(&self, id: TxId, tx_hash: &str) -> Result<bool> {
        mark_submitted(&self.conn(), id, tx_hash)
    }

    pub fn mark_confirmed(&self, id: TxId, executed_at: DateTime<Utc>) -> Result<bool> {
        mark_confirmed(&self.conn(), id, executed_at)
    }

    pub fn mark_failed(&self, id: TxId, error: &str) -> Result<bool> {
        mark_failed(&self.conn(), id, error)
    }

    pub fn release_reservation(&self, id: TxId) -> Result<()> {
        release_reservation(&self.conn(), id)
    }

    pub fn spent_since(&self, wallet_id: WalletId, since: DateTime<Utc>) -> Result<f64> {
        spent_since(&self.conn(), wallet_id, since)
    }

    pub fn reserved_native(&self, wallet_id: WalletId) -> Result<u128> {
        reserved_native(&self.conn(), wallet_id)
    }

    pub fn due_delayed(&self, now: DateTime<Utc>) -> Result<Vec<TxId>> {
        due_delayed(&self.conn(), now)
    }

    pub fn list_transactions(
        &self,
        wallet_id: Option<WalletId>,
        status: Option<TxStatus>,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        list_transactions(&self.conn(), wallet_id, status, limit)
    }

    pub fn count_by_status(&self, wallet_id: Option<WalletId>) -> Result<Vec<(TxStatus, u64)>> {
        count_by_status(&self.conn(), wallet_id)
    }
}
