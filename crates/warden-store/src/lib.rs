//! # warden-store
//!
//! SQLite persistence for the Warden daemon. The store is the only source of
//! truth for transaction status and reservations; nothing is cached in front of it.

pub mod approvals;
pub mod policies;
pub mod store;
pub mod transactions;
pub mod wallets;

pub use approvals::PendingApproval;
pub use policies::{Policy, PolicyType};
pub use store::{AuditEntry, Store};
