//! In-memory store.
//!
//! Holds every key behind one async mutex, so each operation is a single
//! critical section. Used when no `DATABASE_URL` is configured and by the
//! test suite. Nothing survives a restart.

use std::cmp::Ordering;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ApiKeyStore, Claim, ClaimOutcome, KeyFilter, KeyPage, KeyQuery, KeyStore, SortColumn,
    SortDirection, StoreError,
};
use crate::models::{
    activation_key::{ActivationKey, KeyStatus, NewKey, StockSummary, mask_key},
    api_key::ApiKey,
};

#[derive(Debug, Default)]
struct Inner {
    keys: Vec<ActivationKey>,
    api_keys: Vec<ApiKey>,
    last_created_at: Option<DateTime<Utc>>,
}

impl Inner {
    /// Strictly increasing creation timestamps, so insertion order is allocation order.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let created_at = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(created_at);
        created_at
    }

    fn live_keys(&self) -> impl Iterator<Item = &ActivationKey> {
        self.keys.iter().filter(|k| k.deleted_at.is_none())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert fully formed keys as-is, bypassing validation.
    ///
    /// Lets fixtures control `created_at` and status directly.
    pub async fn seed(&self, keys: impl IntoIterator<Item = ActivationKey>) {
        let mut inner = self.inner.lock().await;
        inner.keys.extend(keys);
    }
}

fn matches(key: &ActivationKey, filter: &KeyFilter) -> bool {
    if key.deleted_at.is_some() {
        return false;
    }
    if filter.variant_id.as_ref().is_some_and(|v| *v != key.variant_id) {
        return false;
    }
    if filter.status.is_some_and(|s| s != key.status) {
        return false;
    }
    if filter
        .order_id
        .as_ref()
        .is_some_and(|o| key.order_id.as_ref() != Some(o))
    {
        return false;
    }
    if filter
        .created_by
        .as_ref()
        .is_some_and(|c| key.created_by.as_ref() != Some(c))
    {
        return false;
    }
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        if !key.key_value.to_lowercase().contains(&needle) {
            return false;
        }
    }
    true
}

/// Compare optional values the way PostgreSQL does by default: NULL sorts as
/// larger than any value.
fn cmp_nullable<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
    }
}

fn status_rank(status: KeyStatus) -> u8 {
    // Enum order as declared in the key_status type
    match status {
        KeyStatus::Available => 0,
        KeyStatus::Used => 1,
    }
}

fn compare(a: &ActivationKey, b: &ActivationKey, column: SortColumn) -> Ordering {
    match column {
        SortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
        SortColumn::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortColumn::UsedAt => cmp_nullable(&a.used_at, &b.used_at),
        SortColumn::KeyValue => a.key_value.cmp(&b.key_value),
        SortColumn::VariantId => a.variant_id.cmp(&b.variant_id),
        SortColumn::Status => status_rank(a.status).cmp(&status_rank(b.status)),
        SortColumn::OrderId => cmp_nullable(&a.order_id, &b.order_id),
        SortColumn::CostCents => cmp_nullable(&a.cost_cents, &b.cost_cents),
        SortColumn::CreatedBy => cmp_nullable(&a.created_by, &b.created_by),
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn insert_keys(&self, keys: Vec<NewKey>) -> Result<Vec<ActivationKey>, StoreError> {
        let mut inner = self.inner.lock().await;

        // Validate the whole batch before touching the pool
        let mut taken: HashSet<&str> = inner.live_keys().map(|k| k.key_value.as_str()).collect();
        for key in &keys {
            if !taken.insert(key.key_value.as_str()) {
                return Err(StoreError::DuplicateKey(mask_key(&key.key_value)));
            }
        }

        let mut inserted = Vec::with_capacity(keys.len());
        for key in keys {
            let created_at = inner.next_created_at();
            let row = ActivationKey::new_available(key, created_at);
            inner.keys.push(row.clone());
            inserted.push(row);
        }

        Ok(inserted)
    }

    async fn get_key(&self, id: Uuid) -> Result<Option<ActivationKey>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.live_keys().find(|k| k.id == id).cloned())
    }

    async fn list_keys(&self, query: &KeyQuery) -> Result<KeyPage, StoreError> {
        let inner = self.inner.lock().await;

        let mut keys: Vec<ActivationKey> = inner
            .keys
            .iter()
            .filter(|k| matches(k, &query.filter))
            .cloned()
            .collect();

        keys.sort_by(|a, b| {
            let ordering = compare(a, b, query.sort).then_with(|| a.id.cmp(&b.id));
            match query.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        let total = keys.len() as i64;
        let offset = usize::try_from(query.offset).unwrap_or(0);
        let limit = usize::try_from(query.limit).unwrap_or(0);
        let keys = keys.into_iter().skip(offset).take(limit).collect();

        Ok(KeyPage { keys, total })
    }

    async fn delete_available_key(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        let key = inner
            .keys
            .iter_mut()
            .find(|k| k.id == id && k.deleted_at.is_none())
            .ok_or(StoreError::NotFound)?;

        if key.status == KeyStatus::Used {
            return Err(StoreError::AlreadyUsed);
        }

        let now = Utc::now();
        key.deleted_at = Some(now);
        key.updated_at = now;

        Ok(())
    }

    async fn keys_for_order(&self, order_id: &str) -> Result<Vec<ActivationKey>, StoreError> {
        let inner = self.inner.lock().await;

        let mut keys: Vec<ActivationKey> = inner
            .live_keys()
            .filter(|k| k.status == KeyStatus::Used && k.order_id.as_deref() == Some(order_id))
            .cloned()
            .collect();
        keys.sort_by(|a, b| {
            cmp_nullable(&a.used_at, &b.used_at)
                .then_with(|| a.variant_id.cmp(&b.variant_id))
                .then_with(|| cmp_nullable(&a.order_slot, &b.order_slot))
        });

        Ok(keys)
    }

    async fn stock(&self, variant_id: &str) -> Result<StockSummary, StoreError> {
        let inner = self.inner.lock().await;

        let (mut available, mut used) = (0, 0);
        for key in inner.live_keys().filter(|k| k.variant_id == variant_id) {
            match key.status {
                KeyStatus::Available => available += 1,
                KeyStatus::Used => used += 1,
            }
        }

        Ok(StockSummary {
            variant_id: variant_id.to_string(),
            available,
            used,
        })
    }

    async fn claim_key(&self, claim: &Claim<'_>) -> Result<ClaimOutcome, StoreError> {
        let mut inner = self.inner.lock().await;

        let existing = inner.keys.iter().find(|k| {
            k.status == KeyStatus::Used
                && k.order_id.as_deref() == Some(claim.order_id)
                && k.variant_id == claim.variant_id
                && k.order_slot == Some(claim.slot)
        });
        if let Some(existing) = existing {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }

        let candidate = inner
            .keys
            .iter_mut()
            .filter(|k| k.variant_id == claim.variant_id && k.is_available())
            .min_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        let Some(key) = candidate else {
            return Ok(ClaimOutcome::Exhausted);
        };

        let now = Utc::now();
        key.status = KeyStatus::Used;
        key.order_id = Some(claim.order_id.to_string());
        key.order_slot = Some(claim.slot);
        key.used_at = Some(now);
        key.updated_at = now;

        Ok(ClaimOutcome::Claimed(key.clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn find_active_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .api_keys
            .iter()
            .find(|k| k.key_hash == key_hash && k.is_active)
            .cloned())
    }

    async fn register_api_key(&self, key_hash: &str, label: &str) -> Result<ApiKey, StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.api_keys.iter_mut().find(|k| k.key_hash == key_hash) {
            existing.label = label.to_string();
            existing.is_active = true;
            return Ok(existing.clone());
        }

        let api_key = ApiKey {
            id: Uuid::new_v4(),
            key_hash: key_hash.to_string(),
            label: label.to_string(),
            created_at: Utc::now(),
            is_active: true,
        };
        inner.api_keys.push(api_key.clone());

        Ok(api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_key(value: &str, variant: &str) -> NewKey {
        NewKey {
            key_value: value.to_string(),
            variant_id: variant.to_string(),
            cost_cents: None,
            created_by: Some("tests".to_string()),
        }
    }

    #[tokio::test]
    async fn batch_with_duplicate_inserts_nothing() {
        let store = MemoryStore::new();
        store.insert_keys(vec![new_key("AAA", "v1")]).await.unwrap();

        let err = store
            .insert_keys(vec![new_key("BBB", "v1"), new_key("AAA", "v2")])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateKey(_)));
        let stock = store.stock("v1").await.unwrap();
        assert_eq!(stock.available, 1, "BBB must not have been stored");
    }

    #[tokio::test]
    async fn creation_timestamps_strictly_increase() {
        let store = MemoryStore::new();
        let keys = store
            .insert_keys((0..50).map(|i| new_key(&format!("K{i}"), "v1")).collect())
            .await
            .unwrap();

        assert!(keys.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[tokio::test]
    async fn deleted_value_can_be_imported_again() {
        let store = MemoryStore::new();
        let keys = store.insert_keys(vec![new_key("AAA", "v1")]).await.unwrap();
        store.delete_available_key(keys[0].id).await.unwrap();

        store.insert_keys(vec![new_key("AAA", "v1")]).await.unwrap();

        assert_eq!(store.stock("v1").await.unwrap().available, 1);
    }

    #[tokio::test]
    async fn used_key_cannot_be_deleted() {
        let store = MemoryStore::new();
        store.insert_keys(vec![new_key("AAA", "v1")]).await.unwrap();
        let claim = Claim {
            variant_id: "v1",
            order_id: "o1",
            slot: 0,
        };
        let ClaimOutcome::Claimed(key) = store.claim_key(&claim).await.unwrap() else {
            panic!("expected a fresh claim");
        };

        let err = store.delete_available_key(key.id).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyUsed));

        let err = store.delete_available_key(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn listing_sorts_nulls_last_ascending() {
        let store = MemoryStore::new();
        store
            .insert_keys(vec![new_key("AAA", "v1"), new_key("BBB", "v1")])
            .await
            .unwrap();
        store
            .claim_key(&Claim {
                variant_id: "v1",
                order_id: "o1",
                slot: 0,
            })
            .await
            .unwrap();

        let page = store
            .list_keys(&KeyQuery {
                sort: SortColumn::UsedAt,
                direction: SortDirection::Asc,
                ..KeyQuery::default()
            })
            .await
            .unwrap();

        assert_eq!(page.total, 2);
        assert_eq!(page.keys[0].key_value, "AAA");
        assert_eq!(page.keys[1].used_at, None);
    }
}
