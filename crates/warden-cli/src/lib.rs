//! # warden-cli
//!
//! Operator command-line interface for the Warden wallet daemon.
//!
//! ## Commands
//!
//! - `warden init`: Write a starter `warden.toml`
//! - `warden config`: Show the effective configuration
//! - `warden doctor`: Audit configuration and database
//! - `warden status`: Kill switch, wallets and transaction counts
//! - `warden wallet`: Register wallets and owners
//! - `warden tx`: Inspect transactions
//! - `warden approvals`: List, approve or reject pending approvals
//! - `warden kill-switch`: Activate, escalate or recover the kill switch
//! - `warden policy`: Manage spending, whitelist and network policies
//! - `warden logs`: Show the audit log
//!
//! Every command works on the database directly. A running daemon picks up
//! approvals and kill-switch changes on its next sweep.

pub mod commands;

pub use commands::Cli;
