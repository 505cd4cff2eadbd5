use std::sync::Arc;

use tracing::{debug, warn};

use warden_core::{Notification, Notifier, Result, WardenError};

/// Render a notification's body and variables as plain text.
pub fn render_text(notification: &Notification) -> String {
    let mut text = notification.body.clone();
    for (key, value) in &notification.vars {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("{key}: {value}"));
    }
    if let Some(wallet_id) = notification.wallet_id {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("wallet: {wallet_id}"));
    }
    text
}

/// Fans notifications out to the configured transports.
///
/// Ordinary events go to the first notifier that accepts them. Critical
/// events (kill switch, auto-stop) go to every notifier.
#[derive(Clone, Default)]
pub struct NotificationService {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn add(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver `notification`. Returns how many notifiers accepted it.
    ///
    /// With no notifiers configured this is a no-op. Otherwise it fails only
    /// when no notifier accepted the event.
    pub async fn notify(&self, notification: &Notification) -> Result<usize> {
        if self.notifiers.is_empty() {
            debug!(event = notification.event.as_str(), "no notifiers configured");
            return Ok(0);
        }

        if notification.event.is_broadcast() {
            let results =
                futures::future::join_all(self.notifiers.iter().map(|n| n.notify(notification)))
                    .await;
            let mut delivered = 0;
            for (notifier, result) in self.notifiers.iter().zip(results) {
                match result {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!(notifier = notifier.name(), error = %e, "broadcast delivery failed"),
                }
            }
            return if delivered > 0 {
                Ok(delivered)
            } else {
                Err(WardenError::NoChannelAvailable)
            };
        }

        for notifier in &self.notifiers {
            match notifier.notify(notification).await {
                Ok(()) => return Ok(1),
                Err(e) => warn!(notifier = notifier.name(), error = %e, "notification failed, trying next"),
            }
        }
        Err(WardenError::NoChannelAvailable)
    }
}
