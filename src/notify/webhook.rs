//! Webhook notifier.
//!
//! Delivers key notifications to a mailer over HTTP, with HMAC signature
//! generation so the receiver can verify the sender.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use super::{Notifier, NotifyError};
use crate::models::notification::{KeyNotification, NotificationPayload};

type HmacSha256 = Hmac<Sha256>;

/// Sends notifications to one configured endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    /// Build a notifier for `url`, signing with `secret`.
    ///
    /// # Errors
    ///
    /// - `Config`: URL rejected by [`validate_webhook_url`] or empty secret
    /// - `Client`: the HTTP client could not be built
    pub fn new(url: &str, secret: &str, timeout: Duration) -> Result<Self, NotifyError> {
        validate_webhook_url(url)?;

        if secret.is_empty() {
            return Err(NotifyError::Config(
                "Webhook secret must not be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            secret: secret.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    /// Send one notification.
    ///
    /// # Headers Sent
    ///
    /// - `Content-Type: application/json`
    /// - `X-Webhook-Signature: sha256=<hex>`
    /// - `X-Webhook-Event-Id: <uuid>`
    ///
    /// Any non-2xx answer is an error, so the order event gets redelivered.
    async fn send(&self, notification: &KeyNotification) -> Result<(), NotifyError> {
        let event_id = Uuid::new_v4();

        let payload = NotificationPayload::new(event_id, notification.clone());
        let payload_json = serde_json::to_string(&payload)?;

        let signature = generate_signature(&self.secret, &payload_json)?;

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", &signature)
            .header("X-Webhook-Event-Id", event_id.to_string())
            .body(payload_json)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(
                order_id = %notification.order_id,
                %event_id,
                status = status.as_u16(),
                "Notification webhook rejected delivery"
            );
            return Err(NotifyError::Rejected(status.as_u16()));
        }

        tracing::info!(
            order_id = %notification.order_id,
            %event_id,
            keys = notification.keys.len(),
            "Activation key notification delivered"
        );

        Ok(())
    }
}

/// Generate HMAC-SHA256 signature for a webhook payload.
///
/// # Format
///
/// `sha256=<hex_encoded_hmac>`
///
/// # Verification
///
/// Receivers should:
/// 1. Extract signature from `X-Webhook-Signature` header
/// 2. Compute HMAC-SHA256(secret, request_body)
/// 3. Compare using constant-time comparison
pub fn generate_signature(secret: &str, payload: &str) -> Result<String, NotifyError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Config(format!("Invalid HMAC key: {e}")))?;
    mac.update(payload.as_bytes());
    let result = mac.finalize();
    Ok(format!("sha256={}", hex::encode(result.into_bytes())))
}

/// Validate webhook URL format.
///
/// # Rules
///
/// - Must be valid URL
/// - Must be HTTPS (HTTP localhost allowed for development)
/// - Maximum 2048 characters
pub fn validate_webhook_url(url: &str) -> Result<(), NotifyError> {
    if url.len() > 2048 {
        return Err(NotifyError::Config(
            "URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed =
        url::Url::parse(url).map_err(|e| NotifyError::Config(format!("Invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            // Allow HTTP for localhost/127.0.0.1 (testing)
            if matches!(
                parsed.host_str(),
                Some("localhost") | Some("127.0.0.1") | Some("0.0.0.0")
            ) {
                Ok(())
            } else {
                Err(NotifyError::Config(
                    "HTTP is only allowed for localhost. Use HTTPS for production.".to_string(),
                ))
            }
        }
        _ => Err(NotifyError::Config(
            "URL must use HTTP or HTTPS".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_prefixed_hex_hmac() {
        let signature = generate_signature("secret", "{}").unwrap();
        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), "sha256=".len() + 64);
        assert_eq!(signature, generate_signature("secret", "{}").unwrap());
        assert_ne!(signature, generate_signature("other", "{}").unwrap());
    }

    #[test]
    fn webhook_url_rules() {
        assert!(validate_webhook_url("https://mailer.example.com/hook").is_ok());
        assert!(validate_webhook_url("http://localhost:8025/hook").is_ok());
        assert!(validate_webhook_url("http://127.0.0.1/hook").is_ok());
        assert!(validate_webhook_url("http://mailer.example.com/hook").is_err());
        assert!(validate_webhook_url("ftp://mailer.example.com/hook").is_err());
        assert!(validate_webhook_url("not a url").is_err());

        let long = format!("https://example.com/{}", "a".repeat(2048));
        assert!(validate_webhook_url(&long).is_err());
    }

    #[test]
    fn empty_secret_is_rejected() {
        let err = WebhookNotifier::new("https://mailer.example.com", "", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, NotifyError::Config(_)));
    }
}
