use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use warden_config::WardenConfig;
use warden_core::{ApprovalMethod, Result, WardenError};

use crate::adapter::{ChannelEvent, SignDispatch, SigningChannel};
use crate::ntfy::NtfyChannel;
use crate::rest::RestChannel;
use crate::telegram::{TelegramApi, TelegramBotChannel, TelegramSigningChannel};
use crate::walletconnect::WalletConnectChannel;

/// Ordered set of signing channels.
///
/// A wallet's configured method is used when its backend is available;
/// otherwise channels are tried in [`ApprovalMethod::PRIORITY`] order and
/// the first that accepts the request wins.
pub struct ChannelRouter {
    channels: Vec<Arc<dyn SigningChannel>>,
    rest: Option<Arc<RestChannel>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            rest: None,
        }
    }

    /// Build every backend from config. Channel events flow into `events`.
    pub fn from_config(
        config: &WardenConfig,
        telegram: Option<Arc<TelegramApi>>,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Self {
        let channels = &config.channels;
        let rest = Arc::new(RestChannel::new(channels.rest.max_pending));
        let mut router = Self::new()
            .with_channel(Arc::new(NtfyChannel::new(channels.ntfy.clone(), events)))
            .with_channel(Arc::new(TelegramSigningChannel::new(
                telegram.clone(),
                &channels.telegram,
            )))
            .with_channel(Arc::new(WalletConnectChannel::new(channels.walletconnect.clone())))
            .with_channel(Arc::new(TelegramBotChannel::new(telegram, &channels.telegram)));
        router.rest = Some(Arc::clone(&rest));
        router.with_channel(rest)
    }

    pub fn with_channel(mut self, channel: Arc<dyn SigningChannel>) -> Self {
        self.channels.push(channel);
        self.channels.sort_by_key(|c| priority_of(c.method()));
        self
    }

    pub fn rest(&self) -> Option<&Arc<RestChannel>> {
        self.rest.as_ref()
    }

    pub fn get(&self, method: ApprovalMethod) -> Option<&Arc<dyn SigningChannel>> {
        self.channels.iter().find(|c| c.method() == method)
    }

    pub fn available(&self) -> Vec<ApprovalMethod> {
        self.channels
            .iter()
            .filter(|c| c.is_available())
            .map(|c| c.method())
            .collect()
    }

    /// The channel that would be tried first for a wallet preferring `preferred`.
    pub fn select(&self, preferred: Option<ApprovalMethod>) -> Result<ApprovalMethod> {
        self.candidates(preferred)
            .first()
            .map(|c| c.method())
            .ok_or(WardenError::NoChannelAvailable)
    }

    /// Deliver a sign request, falling back through the candidates.
    ///
    /// `build` is called once per channel tried, so each attempt carries a
    /// request addressed to that channel. A request that cannot be built for
    /// a channel skips it. Returns the method that accepted and what it sent.
    pub async fn route<F>(
        &self,
        preferred: Option<ApprovalMethod>,
        mut build: F,
    ) -> Result<(ApprovalMethod, SignDispatch)>
    where
        F: FnMut(ApprovalMethod) -> Result<SignDispatch>,
    {
        for channel in self.candidates(preferred) {
            let method = channel.method();
            let dispatch = match build(method) {
                Ok(dispatch) => dispatch,
                Err(e) => {
                    warn!(channel = %method, error = %e, "request not buildable for channel, skipping");
                    continue;
                }
            };
            match channel.send_request(&dispatch).await {
                Ok(()) => {
                    info!(
                        tx_id = %dispatch.tx_id(),
                        channel = %method,
                        "approval request routed"
                    );
                    return Ok((method, dispatch));
                }
                Err(e) => warn!(channel = %method, error = %e, "channel failed, falling back"),
            }
        }
        Err(WardenError::NoChannelAvailable)
    }

    /// Stop waiting for `request_id` on every channel.
    pub fn cancel(&self, request_id: Uuid) {
        for channel in &self.channels {
            channel.cancel(request_id);
        }
    }

    pub async fn shutdown(&self) {
        for channel in &self.channels {
            channel.shutdown().await;
        }
    }

    fn candidates(&self, preferred: Option<ApprovalMethod>) -> Vec<&Arc<dyn SigningChannel>> {
        let available = self.channels.iter().filter(|c| c.is_available());
        match preferred.and_then(|m| self.get(m)).filter(|c| c.is_available()) {
            Some(first) => std::iter::once(first)
                .chain(available.filter(|c| c.method() != first.method()))
                .collect(),
            None => available.collect(),
        }
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn priority_of(method: ApprovalMethod) -> usize {
    ApprovalMethod::PRIORITY
        .iter()
        .position(|m| *m == method)
        .unwrap_or(usize::MAX)
}
