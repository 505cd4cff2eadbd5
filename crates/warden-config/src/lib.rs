//! # warden-config
//!
//! Configuration for the Warden daemon. Reads `warden.toml`, then applies
//! environment variable overrides, then validates.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{ConfigWarning, TieBreak, WardenConfig, WarningSeverity};
