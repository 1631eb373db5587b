//! Customer notification dispatch.
//!
//! - `WebhookNotifier`: signed POST to a mailer webhook
//! - `LogNotifier`: records the notification in the log only, used when no
//!   webhook is configured

pub mod webhook;

pub use webhook::WebhookNotifier;

use async_trait::async_trait;

use crate::models::notification::KeyNotification;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The webhook answered with a non-success status.
    #[error("Webhook responded with status {0}")]
    Rejected(u16),

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid webhook configuration: {0}")]
    Config(String),
}

/// Sends the consolidated key notification for an order.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &KeyNotification) -> Result<(), NotifyError>;
}

/// Notifier that only logs. Key values are masked.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &KeyNotification) -> Result<(), NotifyError> {
        tracing::info!(
            order_id = %notification.order_id,
            recipient = %notification.recipient,
            keys = notification.keys.len(),
            "No notification webhook configured, activation key notification logged only"
        );
        Ok(())
    }
}
