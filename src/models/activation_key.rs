//! Activation key data models and API request/response types.
//!
//! This module defines:
//! - `ActivationKey`: Database entity representing one license code
//! - `KeyStatus`: The two states a key moves through
//! - Request types for creating, importing, listing and allocating keys
//! - Response types returned to the back office

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an activation key.
///
/// A key is created `available` and becomes `used` exactly once, when it is
/// allocated to an order. There is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "key_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Available,
    Used,
}

/// Represents an activation key record from the database.
///
/// # Database Table
///
/// Maps to the `activation_keys` table. Each key:
/// - Unlocks exactly one product variant (many keys per variant)
/// - Is either `available` or `used`
/// - Carries `order_id`, `order_slot` and `used_at` only once used
///
/// # Money Storage
///
/// `cost_cents` is the purchase cost of the key in cents, like every other
/// amount in this service. It is informational and never affects allocation.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct ActivationKey {
    /// Unique identifier for this key
    pub id: Uuid,

    /// The license code handed to the customer
    pub key_value: String,

    /// Product variant this key unlocks
    pub variant_id: String,

    /// Current lifecycle state
    pub status: KeyStatus,

    /// Order that consumed this key (set together with `used_at`)
    pub order_id: Option<String>,

    /// Unit index within the order for this variant
    ///
    /// An order line with quantity 3 consumes slots 0, 1 and 2. The triple
    /// `(order_id, variant_id, order_slot)` identifies one delivered unit and
    /// is unique among used keys.
    pub order_slot: Option<i32>,

    /// When the key was allocated
    pub used_at: Option<DateTime<Utc>>,

    /// Purchase cost in cents
    pub cost_cents: Option<i64>,

    /// Label of the API key that provisioned this key
    pub created_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker. Deleted keys are never listed or allocated.
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ActivationKey {
    /// Build a fresh, available key. Used by the in-memory store.
    pub fn new_available(new_key: NewKey, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key_value: new_key.key_value,
            variant_id: new_key.variant_id,
            status: KeyStatus::Available,
            order_id: None,
            order_slot: None,
            used_at: None,
            cost_cents: new_key.cost_cents,
            created_by: new_key.created_by,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    /// Whether this key can still be allocated.
    pub fn is_available(&self) -> bool {
        self.status == KeyStatus::Available && self.deleted_at.is_none()
    }

    /// Key value with everything past the first few characters hidden.
    ///
    /// Used whenever a key has to appear in logs.
    pub fn masked_value(&self) -> String {
        mask_key(&self.key_value)
    }
}

/// Mask a key value for logging: `ABCD-EFGH-IJKL` becomes `ABCD***`.
pub fn mask_key(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}***")
}

/// A key about to be inserted.
#[derive(Debug, Clone)]
pub struct NewKey {
    pub key_value: String,
    pub variant_id: String,
    pub cost_cents: Option<i64>,
    pub created_by: Option<String>,
}

/// One key or a list of keys.
///
/// The create endpoint accepts both `"keys": "ABC"` and `"keys": ["ABC", "DEF"]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum KeyInput {
    One(String),
    Many(Vec<String>),
}

impl KeyInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            KeyInput::One(key) => vec![key],
            KeyInput::Many(keys) => keys,
        }
    }
}

/// Request body for creating one or more keys.
///
/// # JSON Example
///
/// ```json
/// {
///   "variant_id": "variant_01J8STEAM500",
///   "keys": ["AAAA-BBBB-CCCC", "DDDD-EEEE-FFFF"],
///   "cost_cents": 450
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateKeysRequest {
    pub variant_id: String,
    pub keys: KeyInput,
    #[serde(default)]
    pub cost_cents: Option<i64>,
}

/// Request body for the bulk text import.
///
/// `text` holds one key per line. Lines are trimmed and blank lines skipped.
#[derive(Debug, Deserialize)]
pub struct ImportKeysRequest {
    pub variant_id: String,
    pub text: String,
    #[serde(default)]
    pub cost_cents: Option<i64>,
}

/// Query string accepted by `GET /api/v1/activation-keys`.
///
/// All filters are exact matches except `q`, which is a case-insensitive
/// substring search over the key value.
#[derive(Debug, Default, Deserialize)]
pub struct ListKeysQuery {
    pub variant_id: Option<String>,
    pub status: Option<KeyStatus>,
    pub order_id: Option<String>,
    pub created_by: Option<String>,
    pub q: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Request body for a manual allocation.
///
/// Always the order's first unit of the variant; further units come only
/// from fulfillment, which derives them from the ordered quantity.
#[derive(Debug, Deserialize)]
pub struct AllocateRequest {
    pub variant_id: String,
    pub order_id: String,
}

/// Response body for key endpoints.
///
/// Identical to `ActivationKey` minus the internal soft-delete marker.
#[derive(Debug, Serialize)]
pub struct ActivationKeyResponse {
    pub id: Uuid,
    pub key_value: String,
    pub variant_id: String,
    pub status: KeyStatus,
    pub order_id: Option<String>,
    pub order_slot: Option<i32>,
    pub used_at: Option<DateTime<Utc>>,
    pub cost_cents: Option<i64>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ActivationKey> for ActivationKeyResponse {
    fn from(key: ActivationKey) -> Self {
        Self {
            id: key.id,
            key_value: key.key_value,
            variant_id: key.variant_id,
            status: key.status,
            order_id: key.order_id,
            order_slot: key.order_slot,
            used_at: key.used_at,
            cost_cents: key.cost_cents,
            created_by: key.created_by,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}

/// Response body for the create and import endpoints.
#[derive(Debug, Serialize)]
pub struct CreatedKeysResponse {
    pub activation_keys: Vec<ActivationKeyResponse>,
}

/// Response body for the list endpoint.
///
/// `count` is the number of keys in this page, `total` the number matching
/// the filters across all pages.
#[derive(Debug, Serialize)]
pub struct ListKeysResponse {
    pub count: usize,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub sort: String,
    pub order: String,
    pub activation_keys: Vec<ActivationKeyResponse>,
}

/// Per-variant pool summary. `available == 0` means the variant needs restock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    pub variant_id: String,
    pub available: i64,
    pub used: i64,
}

/// Response body for a manual allocation.
#[derive(Debug, Serialize)]
pub struct AllocationResponse {
    /// True when the order unit had already been served and the existing key was returned
    pub replayed: bool,
    pub activation_key: ActivationKeyResponse,
}
