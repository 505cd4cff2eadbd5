//! # warden-core
//!
//! Core types, traits, and primitives for the Warden wallet daemon.
//! This crate defines the shared vocabulary used by every other crate in the workspace.

pub mod adapter;
pub mod error;
pub mod event;
pub mod mock;
pub mod network;
pub mod protocol;
pub mod request;
pub mod types;

pub use adapter::{
    ChainAdapter, Notification, NotificationEvent, Notifier, PriceOracle, PriceResult,
    SessionInfo, SessionVerifier,
};
pub use error::{Result, WardenError};
pub use event::{Event, EventBus};
pub use protocol::{SignAction, SignRequest, SignResponse};
pub use request::{BatchInstruction, TokenRef, TransactionRequest};
pub use types::*;
