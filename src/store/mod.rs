//! Storage layer.
//!
//! The store is the only place where state is shared between requests. Every
//! operation the allocator depends on is atomic inside the store:
//!
//! - `PgStore`: PostgreSQL via sqlx, used in production
//! - `MemoryStore`: a mutex-guarded pool, used without a database and in tests
//!
//! Handlers and services receive the store as an injected `Arc<dyn Store>`,
//! never as ambient state.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    activation_key::{ActivationKey, KeyStatus, NewKey, StockSummary},
    api_key::ApiKey,
};

/// Errors raised by a store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed (connection, query, or constraint we don't map).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A key value already exists among live keys. Carries the masked value.
    #[error("Activation key {0} already exists")]
    DuplicateKey(String),

    #[error("Activation key not found")]
    NotFound,

    /// The key has been allocated and can no longer be deleted.
    #[error("Activation key already used")]
    AlreadyUsed,
}

/// One order unit asking for a key.
#[derive(Debug, Clone, Copy)]
pub struct Claim<'a> {
    pub variant_id: &'a str,
    pub order_id: &'a str,
    pub slot: i32,
}

/// Result of a single atomic claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// A fresh key was transitioned to used for this claim.
    Claimed(ActivationKey),
    /// This order unit already holds a key; it is returned unchanged.
    Existing(ActivationKey),
    /// The variant has no available key left.
    Exhausted,
    /// Available keys exist but all were locked by concurrent claims.
    Contended,
}

/// Column a key listing can be sorted by.
///
/// Parsing is a whitelist: anything else falls back to `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    #[default]
    CreatedAt,
    UpdatedAt,
    UsedAt,
    KeyValue,
    VariantId,
    Status,
    OrderId,
    CostCents,
    CreatedBy,
}

impl SortColumn {
    pub fn parse(value: &str) -> Option<Self> {
        let column = match value.trim().to_ascii_lowercase().as_str() {
            "created_at" => Self::CreatedAt,
            "updated_at" => Self::UpdatedAt,
            "used_at" => Self::UsedAt,
            "key_value" | "key" => Self::KeyValue,
            "variant_id" | "product_variant_id" => Self::VariantId,
            "status" => Self::Status,
            "order_id" => Self::OrderId,
            "cost_cents" | "cost" => Self::CostCents,
            "created_by" => Self::CreatedBy,
            _ => return None,
        };
        Some(column)
    }

    /// Column name, safe to splice into SQL.
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::UsedAt => "used_at",
            Self::KeyValue => "key_value",
            Self::VariantId => "variant_id",
            Self::Status => "status",
            Self::OrderId => "order_id",
            Self::CostCents => "cost_cents",
            Self::CreatedBy => "created_by",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// `asc` (any case) is ascending, everything else descending.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filters for a key listing. `None` means "don't filter".
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    pub variant_id: Option<String>,
    pub status: Option<KeyStatus>,
    pub order_id: Option<String>,
    pub created_by: Option<String>,
    /// Case-insensitive substring of the key value
    pub search: Option<String>,
}

/// A normalized key listing request.
#[derive(Debug, Clone)]
pub struct KeyQuery {
    pub filter: KeyFilter,
    pub sort: SortColumn,
    pub direction: SortDirection,
    pub limit: i64,
    pub offset: i64,
}

impl KeyQuery {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 1000;
}

impl Default for KeyQuery {
    fn default() -> Self {
        Self {
            filter: KeyFilter::default(),
            sort: SortColumn::default(),
            direction: SortDirection::default(),
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// One page of a key listing.
#[derive(Debug, Clone)]
pub struct KeyPage {
    pub keys: Vec<ActivationKey>,
    /// Number of keys matching the filter across all pages
    pub total: i64,
}

/// Activation key persistence.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Insert a batch of keys atomically: either all are stored or none.
    async fn insert_keys(&self, keys: Vec<NewKey>) -> Result<Vec<ActivationKey>, StoreError>;

    /// Fetch one live key.
    async fn get_key(&self, id: Uuid) -> Result<Option<ActivationKey>, StoreError>;

    async fn list_keys(&self, query: &KeyQuery) -> Result<KeyPage, StoreError>;

    /// Soft-delete a key that is still available.
    ///
    /// Fails with `NotFound` for unknown or already deleted keys and with
    /// `AlreadyUsed` for allocated ones.
    async fn delete_available_key(&self, id: Uuid) -> Result<(), StoreError>;

    /// Keys allocated to an order, in allocation order.
    async fn keys_for_order(&self, order_id: &str) -> Result<Vec<ActivationKey>, StoreError>;

    async fn stock(&self, variant_id: &str) -> Result<StockSummary, StoreError>;

    /// Atomically serve one order unit.
    ///
    /// Returns the unit's existing key if it already holds one, otherwise
    /// transitions the oldest available key of the variant to used. Two
    /// concurrent claims never receive the same key, and two concurrent
    /// claims for the same unit never consume two keys.
    async fn claim_key(&self, claim: &Claim<'_>) -> Result<ClaimOutcome, StoreError>;

    /// Connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// API key lookup for the authentication middleware.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn find_active_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;

    /// Register (or re-activate) an API key by hash.
    async fn register_api_key(&self, key_hash: &str, label: &str) -> Result<ApiKey, StoreError>;
}

/// Everything the application needs from storage.
pub trait Store: KeyStore + ApiKeyStore {}

impl<T: KeyStore + ApiKeyStore + ?Sized> Store for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_column_is_a_whitelist() {
        assert_eq!(SortColumn::parse("used_at"), Some(SortColumn::UsedAt));
        assert_eq!(SortColumn::parse(" KEY "), Some(SortColumn::KeyValue));
        assert_eq!(SortColumn::parse("cost"), Some(SortColumn::CostCents));
        assert_eq!(SortColumn::parse("id; DROP TABLE activation_keys"), None);
    }

    #[test]
    fn sort_direction_defaults_to_desc() {
        assert_eq!(SortDirection::parse("ASC"), SortDirection::Asc);
        assert_eq!(SortDirection::parse("desc"), SortDirection::Desc);
        assert_eq!(SortDirection::parse("sideways"), SortDirection::Desc);
    }
}
