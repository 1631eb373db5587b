//! Order completion event and fulfillment report.
//!
//! The storefront emits an order-completed event once payment is captured.
//! Delivery is at-least-once, so the same event may arrive several times.
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "order_id": "order_01J8Z6",
//!   "email": "buyer@example.com",
//!   "customer_name": "Ivan Petrov",
//!   "items": [
//!     {
//!       "variant_id": "variant_01J8STEAM500",
//!       "quantity": 2,
//!       "product_title": "Steam Wallet",
//!       "variant_title": "500 RUB"
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label used when a line item carries no product title.
pub const UNKNOWN_PRODUCT: &str = "Unknown Product";

/// Label used when a line item carries no variant title.
pub const DEFAULT_VARIANT: &str = "Default";

/// Name used in notifications when the order has no customer name.
pub const DEFAULT_CUSTOMER_NAME: &str = "Customer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCompletedEvent {
    pub order_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderLineItem>,
}

/// One line of a completed order.
///
/// Lines without a variant (shipping, custom items) are skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineItem {
    #[serde(default)]
    pub variant_id: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub product_title: Option<String>,
    #[serde(default)]
    pub variant_title: Option<String>,
}

impl OrderLineItem {
    /// Label shown next to the key in the customer notification.
    pub fn product_label(&self) -> String {
        let product = non_blank(self.product_title.as_deref()).unwrap_or(UNKNOWN_PRODUCT);
        let variant = non_blank(self.variant_title.as_deref()).unwrap_or(DEFAULT_VARIANT);
        format!("{product} - {variant}")
    }
}

impl OrderCompletedEvent {
    /// Recipient address, if the order has a usable one.
    pub fn recipient(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    pub fn customer_name(&self) -> &str {
        non_blank(self.customer_name.as_deref()).unwrap_or(DEFAULT_CUSTOMER_NAME)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A key delivered for an order unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedKey {
    pub key_id: Uuid,
    pub key_value: String,
    pub variant_id: String,
    pub order_slot: i32,
    pub product_label: String,
    /// True when the key had already been allocated by an earlier delivery of this event
    pub replayed: bool,
}

/// A line item that could not be fully served because the pool ran dry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    pub variant_id: String,
    pub requested: u32,
    pub allocated: u32,
}

/// Outcome of processing one order-completed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentReport {
    pub order_id: String,
    pub keys: Vec<AssignedKey>,
    pub shortages: Vec<Shortage>,
    /// Whether the consolidated notification was dispatched
    pub notified: bool,
}

impl FulfillmentReport {
    pub fn is_partial(&self) -> bool {
        !self.shortages.is_empty()
    }
}
