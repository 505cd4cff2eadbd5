//! # warden-channels
//!
//! Ways of reaching a wallet owner: signing channels that deliver sign
//! requests and carry responses back, the router that picks one per wallet,
//! and the notification fan-out.

pub mod adapter;
pub mod notify;
pub mod ntfy;
pub mod rest;
pub mod router;
pub mod telegram;
pub mod walletconnect;

pub use adapter::{ChannelEvent, SignDispatch, SigningChannel, decode_sign_response, encode_payload};
pub use notify::NotificationService;
pub use ntfy::{NtfyChannel, NtfyNotifier};
pub use rest::RestChannel;
pub use router::ChannelRouter;
pub use telegram::{TelegramApi, TelegramBotChannel, TelegramNotifier, TelegramPoller, TelegramSigningChannel};
pub use walletconnect::WalletConnectChannel;
