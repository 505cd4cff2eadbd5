use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use warden_core::{ApprovalMethod, Result, Wallet, WalletId, WardenError};

use crate::store::{Store, store_err};

const WALLET_COLUMNS: &str = "id, name, chain, environment, public_key, default_network, \
     owner_address, owner_verified, approval_method, created_at";

struct RawWallet {
    id: String,
    name: String,
    chain: String,
    environment: String,
    public_key: String,
    default_network: Option<String>,
    owner_address: Option<String>,
    owner_verified: bool,
    approval_method: Option<String>,
    created_at: i64,
}

impl RawWallet {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            chain: row.get(2)?,
            environment: row.get(3)?,
            public_key: row.get(4)?,
            default_network: row.get(5)?,
            owner_address: row.get(6)?,
            owner_verified: row.get(7)?,
            approval_method: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_wallet(self) -> Result<Wallet> {
        Ok(Wallet {
            id: parse_uuid(&self.id)?,
            name: self.name,
            chain: self.chain.parse()?,
            environment: self.environment.parse()?,
            public_key: self.public_key,
            default_network: self.default_network,
            owner_address: self.owner_address,
            owner_verified: self.owner_verified,
            approval_method: self
                .approval_method
                .as_deref()
                .map(str::parse::<ApprovalMethod>)
                .transpose()?,
            created_at: from_epoch(self.created_at),
        })
    }
}

pub(crate) fn parse_uuid(raw: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(raw).map_err(|e| WardenError::Store(format!("bad uuid '{raw}': {e}")))
}

pub(crate) fn from_epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

pub fn get_wallet(conn: &Connection, id: WalletId) -> Result<Option<Wallet>> {
    let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = ?1");
    conn.query_row(&sql, rusqlite::params![id.to_string()], RawWallet::read)
        .optional()
        .map_err(store_err)?
        .map(RawWallet::into_wallet)
        .transpose()
}

impl Store {
    pub fn insert_wallet(&self, wallet: &Wallet) -> Result<()> {
        let db = self.conn();
        db.execute(
            "INSERT INTO wallets (id, name, chain, environment, public_key, default_network,
                                  owner_address, owner_verified, approval_method, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                wallet.id.to_string(),
                wallet.name,
                wallet.chain.as_str(),
                wallet.environment.as_str(),
                wallet.public_key,
                wallet.default_network,
                wallet.owner_address,
                wallet.owner_verified,
                wallet.approval_method.map(|m| m.as_str()),
                wallet.created_at.timestamp(),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Fetch a wallet, failing with `WalletNotFound`.
    pub fn get_wallet(&self, id: WalletId) -> Result<Wallet> {
        get_wallet(&self.conn(), id)?.ok_or(WardenError::WalletNotFound(id))
    }

    pub fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let db = self.conn();
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets ORDER BY created_at");
        let mut stmt = db.prepare(&sql).map_err(store_err)?;
        let raws = stmt
            .query_map([], RawWallet::read)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        raws.into_iter().map(RawWallet::into_wallet).collect()
    }

    /// Register (or replace) the owner address. A new owner starts unverified.
    pub fn set_owner(&self, id: WalletId, owner_address: &str) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE wallets SET owner_address = ?2, owner_verified = 0 WHERE id = ?1",
                rusqlite::params![id.to_string(), owner_address],
            )
            .map_err(store_err)?;
        if rows == 0 {
            return Err(WardenError::WalletNotFound(id));
        }
        Ok(())
    }

    /// Drop an unverified owner. Returns false when there was none to drop.
    pub fn clear_owner(&self, id: WalletId) -> Result<bool> {
        let rows = self
            .conn()
            .execute(
                "UPDATE wallets SET owner_address = NULL, owner_verified = 0
                 WHERE id = ?1 AND owner_address IS NOT NULL AND owner_verified = 0",
                rusqlite::params![id.to_string()],
            )
            .map_err(store_err)?;
        Ok(rows > 0)
    }

    /// GRACE → LOCKED. Returns false when already verified or no owner is set.
    pub fn mark_owner_verified(&self, id: WalletId) -> Result<bool> {
        let rows = self
            .conn()
            .execute(
                "UPDATE wallets SET owner_verified = 1
                 WHERE id = ?1 AND owner_address IS NOT NULL AND owner_verified = 0",
                rusqlite::params![id.to_string()],
            )
            .map_err(store_err)?;
        Ok(rows > 0)
    }

    pub fn set_approval_method(&self, id: WalletId, method: Option<ApprovalMethod>) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE wallets SET approval_method = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), method.map(|m| m.as_str())],
            )
            .map_err(store_err)?;
        if rows == 0 {
            return Err(WardenError::WalletNotFound(id));
        }
        Ok(())
    }
}
