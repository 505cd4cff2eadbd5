use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use warden_core::{Result, WardenError};

/// Map a rusqlite error into the store error variant.
pub(crate) fn store_err(e: rusqlite::Error) -> WardenError {
    WardenError::Store(e.to_string())
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS wallets (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        chain TEXT NOT NULL,
        environment TEXT NOT NULL,
        public_key TEXT NOT NULL,
        default_network TEXT,
        owner_address TEXT,
        owner_verified INTEGER NOT NULL DEFAULT 0,
        approval_method TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        wallet_id TEXT NOT NULL REFERENCES wallets(id),
        session_id TEXT,
        type TEXT NOT NULL,
        status TEXT NOT NULL,
        tier TEXT,
        amount TEXT NOT NULL,
        to_address TEXT,
        network TEXT NOT NULL,
        request TEXT NOT NULL,
        amount_usd REAL,
        reserved_amount TEXT,
        reserved_amount_usd REAL,
        tx_hash TEXT,
        error TEXT,
        queued_at INTEGER,
        delay_seconds INTEGER,
        created_at INTEGER NOT NULL,
        executed_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS policies (
        id TEXT PRIMARY KEY,
        wallet_id TEXT,
        type TEXT NOT NULL,
        rules TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1,
        network TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pending_approvals (
        id TEXT PRIMARY KEY,
        tx_id TEXT NOT NULL UNIQUE REFERENCES transactions(id),
        required_by TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        approved_at INTEGER,
        rejected_at INTEGER,
        owner_signature TEXT,
        approval_channel TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS key_value_store (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        action TEXT NOT NULL,
        details TEXT,
        checksum TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tx_wallet_created ON transactions(wallet_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_tx_status ON transactions(status);
    CREATE INDEX IF NOT EXISTS idx_policies_wallet ON policies(wallet_id);
    CREATE INDEX IF NOT EXISTS idx_approvals_expires ON pending_approvals(expires_at);
    CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
";

/// The daemon's single source of truth: wallets, transactions, policies,
/// pending approvals, the key/value table and the audit log.
///
/// Query helpers are free functions over `&Connection` so they compose inside
/// [`Store::with_immediate`]; the `Store` methods wrap them for single calls.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, Duration::from_millis(5000))
    }

    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        info!(?path, "opening store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(store_err)?;
        conn.busy_timeout(busy_timeout).map_err(store_err)?;

        // WAL for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Raw connection for one-off queries.
    pub fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.db.lock()
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so a read-then-write sequence inside
    /// `f` cannot interleave with another writer. Commits on `Ok`, rolls back on `Err`.
    pub fn with_immediate<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.db.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;
        let out = f(&tx)?;
        tx.commit().map_err(store_err)?;
        Ok(out)
    }

    // ── Key/value ──────────────────────────────────────────────

    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        kv_get(&self.conn(), key)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        kv_set(&self.conn(), key, value)
    }

    /// Insert only if the key is absent. Returns whether a row was written.
    pub fn kv_insert_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let db = self.conn();
        let rows = db
            .execute(
                "INSERT OR IGNORE INTO key_value_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![key, value, chrono::Utc::now().timestamp()],
            )
            .map_err(store_err)?;
        Ok(rows > 0)
    }

    // ── Audit ──────────────────────────────────────────────────

    /// Write an audit log entry with a tamper-evident checksum.
    pub fn audit(&self, event_type: &str, action: &str, details: Option<&str>) -> Result<()> {
        audit(&self.conn(), event_type, action, details)
    }

    /// Most recent audit entries, newest first.
    pub fn audit_log(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let db = self.conn();
        let mut stmt = db
            .prepare(
                "SELECT id, timestamp, event_type, action, details, checksum
                 FROM audit_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    event_type: row.get(2)?,
                    action: row.get(3)?,
                    details: row.get(4)?,
                    checksum: row.get(5)?,
                })
            })
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(rows)
    }
}

pub fn kv_get(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM key_value_store WHERE key = ?1",
        rusqlite::params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(store_err)
}

pub fn kv_set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO key_value_store (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        rusqlite::params![key, value, chrono::Utc::now().timestamp()],
    )
    .map_err(store_err)?;
    Ok(())
}

pub fn kv_delete(conn: &Connection, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM key_value_store WHERE key = ?1",
        rusqlite::params![key],
    )
    .map_err(store_err)?;
    Ok(())
}

/// Set `key` to `new` only while it still holds `expected`.
pub fn kv_compare_and_set(conn: &Connection, key: &str, expected: &str, new: &str) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE key_value_store SET value = ?3, updated_at = ?4 WHERE key = ?1 AND value = ?2",
            rusqlite::params![key, expected, new, chrono::Utc::now().timestamp()],
        )
        .map_err(store_err)?;
    Ok(rows > 0)
}

pub fn audit(conn: &Connection, event_type: &str, action: &str, details: Option<&str>) -> Result<()> {
    let timestamp = chrono::Utc::now().to_rfc3339();
    let checksum = audit_checksum(&timestamp, event_type, action, details);
    conn.execute(
        "INSERT INTO audit_log (timestamp, event_type, action, details, checksum) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![timestamp, event_type, action, details, checksum],
    )
    .map_err(store_err)?;
    Ok(())
}

fn audit_checksum(timestamp: &str, event_type: &str, action: &str, details: Option<&str>) -> String {
    let input = format!(
        "{}:{}:{}:{}",
        timestamp,
        event_type,
        action,
        details.unwrap_or("")
    );
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub event_type: String,
    pub action: String,
    pub details: Option<String>,
    pub checksum: String,
}

impl AuditEntry {
    /// Recompute the checksum and compare.
    pub fn verify(&self) -> bool {
        audit_checksum(
            &self.timestamp,
            &self.event_type,
            &self.action,
            self.details.as_deref(),
        ) == self.checksum
    }
}
