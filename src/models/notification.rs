//! Customer notification models.
//!
//! One notification is sent per fulfilled order, listing every key the
//! customer received.
//!
//! # Webhook Flow
//!
//! 1. An order is fulfilled and at least one key was allocated
//! 2. The service builds a `NotificationPayload` around a `KeyNotification`
//! 3. The payload is POSTed to the configured webhook, signed with HMAC-SHA256
//! 4. The receiver (mailer) verifies the signature and emails the customer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type carried by every notification payload.
pub const ACTIVATION_KEYS_EVENT: &str = "order.activation_keys";

/// The message for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyNotification {
    pub order_id: String,
    pub recipient: String,
    pub customer_name: String,
    pub keys: Vec<NotifiedKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifiedKey {
    pub key_value: String,
    pub product_label: String,
}

/// Webhook payload sent to the notification endpoint.
///
/// # Example
///
/// ```json
/// {
///   "event_type": "order.activation_keys",
///   "event_id": "550e8400-e29b-41d4-a716-446655440000",
///   "created_at": "2025-01-15T10:30:00Z",
///   "data": {
///     "order_id": "order_01J8Z6",
///     "recipient": "buyer@example.com",
///     "customer_name": "Ivan Petrov",
///     "keys": [
///       { "key_value": "AAAA-BBBB-CCCC", "product_label": "Steam Wallet - 500 RUB" }
///     ]
///   }
/// }
/// ```
///
/// # Signature Verification
///
/// The webhook includes an `X-Webhook-Signature` header with format:
/// `sha256=<hex_encoded_hmac>`
///
/// Receivers should verify this by computing HMAC-SHA256(secret, json_body)
#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub event_type: String,
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub data: KeyNotification,
}

impl NotificationPayload {
    pub fn new(event_id: Uuid, notification: KeyNotification) -> Self {
        Self {
            event_type: ACTIVATION_KEYS_EVENT.to_string(),
            event_id,
            created_at: Utc::now(),
            data: notification,
        }
    }
}
