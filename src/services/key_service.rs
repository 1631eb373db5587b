//! Key provisioning service.
//!
//! Validates and stores keys entered by administrators, one at a time or as a
//! bulk text import, and turns raw list query strings into a [`KeyQuery`].

use std::collections::HashSet;

use crate::{
    error::AppError,
    models::activation_key::{ActivationKey, ListKeysQuery, NewKey, mask_key},
    store::{KeyFilter, KeyQuery, KeyStore, SortColumn, SortDirection},
};

/// Longest accepted key value.
pub const MAX_KEY_LENGTH: usize = 512;

/// Most keys accepted in one create or import request.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Split a bulk import text into key values: one per line, trimmed, blank lines skipped.
pub fn parse_key_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Create a batch of keys for one variant.
///
/// # Process
///
/// 1. Trim and validate every value
/// 2. Reject duplicates inside the batch
/// 3. Insert the whole batch atomically (a clash with an existing key stores nothing)
///
/// # Errors
///
/// - `InvalidRequest`: empty variant, empty batch, blank or oversized value,
///   negative cost, duplicate inside the batch, batch too large
/// - `DuplicateKey`: a value already exists in the store
pub async fn create_keys<S>(
    store: &S,
    variant_id: &str,
    values: Vec<String>,
    cost_cents: Option<i64>,
    created_by: &str,
) -> Result<Vec<ActivationKey>, AppError>
where
    S: KeyStore + ?Sized,
{
    let variant_id = variant_id.trim();
    if variant_id.is_empty() {
        return Err(AppError::InvalidRequest(
            "variant_id is required".to_string(),
        ));
    }

    if values.is_empty() {
        return Err(AppError::InvalidRequest(
            "At least one key is required".to_string(),
        ));
    }

    if values.len() > MAX_BATCH_SIZE {
        return Err(AppError::InvalidRequest(format!(
            "At most {MAX_BATCH_SIZE} keys can be created at once"
        )));
    }

    if cost_cents.is_some_and(|c| c < 0) {
        return Err(AppError::InvalidRequest(
            "cost_cents must not be negative".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(values.len());
    let mut new_keys = Vec::with_capacity(values.len());

    for value in values {
        let value = value.trim();

        if value.is_empty() {
            return Err(AppError::InvalidRequest(
                "Keys must not be blank".to_string(),
            ));
        }
        if value.chars().count() > MAX_KEY_LENGTH {
            return Err(AppError::InvalidRequest(format!(
                "Keys must be at most {MAX_KEY_LENGTH} characters"
            )));
        }
        if !seen.insert(value.to_string()) {
            return Err(AppError::InvalidRequest(format!(
                "Key {} appears more than once in the request",
                mask_key(value)
            )));
        }

        new_keys.push(NewKey {
            key_value: value.to_string(),
            variant_id: variant_id.to_string(),
            cost_cents,
            created_by: Some(created_by.to_string()),
        });
    }

    let count = new_keys.len();
    let keys = store.insert_keys(new_keys).await?;

    tracing::info!(variant_id, count, created_by, "Activation keys created");

    Ok(keys)
}

/// Bulk text import: one key per line.
pub async fn import_keys<S>(
    store: &S,
    variant_id: &str,
    text: &str,
    cost_cents: Option<i64>,
    created_by: &str,
) -> Result<Vec<ActivationKey>, AppError>
where
    S: KeyStore + ?Sized,
{
    let values = parse_key_lines(text);
    if values.is_empty() {
        return Err(AppError::InvalidRequest(
            "Import text contains no keys".to_string(),
        ));
    }

    create_keys(store, variant_id, values, cost_cents, created_by).await
}

/// Normalize list query parameters.
///
/// # Rules
///
/// - Unknown `sort` falls back to `created_at`
/// - `order` is `desc` unless it says `asc`
/// - `limit` is clamped to `0..=1000` and defaults to 100
/// - negative `offset` becomes 0
/// - blank filters are ignored
pub fn build_key_query(params: ListKeysQuery) -> KeyQuery {
    let blank_to_none = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    KeyQuery {
        filter: KeyFilter {
            variant_id: blank_to_none(params.variant_id),
            status: params.status,
            order_id: blank_to_none(params.order_id),
            created_by: blank_to_none(params.created_by),
            search: blank_to_none(params.q),
        },
        sort: params
            .sort
            .as_deref()
            .and_then(SortColumn::parse)
            .unwrap_or_default(),
        direction: params
            .order
            .as_deref()
            .map(SortDirection::parse)
            .unwrap_or_default(),
        limit: params
            .limit
            .unwrap_or(KeyQuery::DEFAULT_LIMIT)
            .clamp(0, KeyQuery::MAX_LIMIT),
        offset: params.offset.unwrap_or(0).max(0),
    }
}
