//! Reservation ledger: what a wallet has spent or holds in flight per window,
//! and the native amount its in-flight transactions still reserve.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use warden_core::{Result, Tier, TxId, WalletId};
use warden_store::transactions;

use crate::evaluator::SpendSnapshot;

pub const DAILY_WINDOW_SECS: i64 = 86_400;
pub const MONTHLY_WINDOW_SECS: i64 = 30 * DAILY_WINDOW_SECS;

/// Stateless view over the `transactions` table. Every call takes the
/// connection of the surrounding write transaction so that snapshot and
/// reservation commit together.
pub struct ReservationLedger;

impl ReservationLedger {
    pub fn snapshot(conn: &Connection, wallet_id: WalletId, now: DateTime<Utc>) -> Result<SpendSnapshot> {
        Ok(SpendSnapshot {
            daily: transactions::spent_since(conn, wallet_id, now - Duration::seconds(DAILY_WINDOW_SECS))?,
            monthly: transactions::spent_since(
                conn,
                wallet_id,
                now - Duration::seconds(MONTHLY_WINDOW_SECS),
            )?,
            reserved_native: transactions::reserved_native(conn, wallet_id)?,
        })
    }

    pub fn reserve(
        conn: &Connection,
        tx_id: TxId,
        tier: Tier,
        amount_usd: Option<f64>,
        native_amount: u128,
    ) -> Result<()> {
        transactions::write_reservation(conn, tx_id, tier, amount_usd, &native_amount.to_string())
    }

    pub fn release(conn: &Connection, tx_id: TxId) -> Result<()> {
        transactions::release_reservation(conn, tx_id)
    }
}
