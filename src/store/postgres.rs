//! PostgreSQL store.
//!
//! # Atomicity Guarantees
//!
//! Allocation is a single conditional `UPDATE`: the candidate row is picked
//! and locked with `FOR UPDATE SKIP LOCKED` in a subquery, and the update only
//! applies while the row is still `available`. Concurrent claims for the same
//! variant therefore each lock a different row or see none at all.
//!
//! The partial unique index `activation_keys_order_slot_idx` guarantees at
//! most one key per `(order_id, variant_id, order_slot)` even when two
//! deliveries of the same event race past the replay check.

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    ApiKeyStore, Claim, ClaimOutcome, KeyFilter, KeyPage, KeyQuery, KeyStore, StoreError,
};
use crate::{
    db::DbPool,
    models::{
        activation_key::{ActivationKey, KeyStatus, NewKey, StockSummary, mask_key},
        api_key::ApiKey,
    },
};

const KEY_VALUE_INDEX: &str = "activation_keys_key_value_live_idx";
const ORDER_SLOT_INDEX: &str = "activation_keys_order_slot_idx";

/// PostgreSQL unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// Pick the oldest available key of the variant and mark it used, in one statement.
const CLAIM_SQL: &str = r#"
    UPDATE activation_keys
    SET status = 'used',
        order_id = $2,
        order_slot = $3,
        used_at = NOW(),
        updated_at = NOW()
    WHERE id = (
        SELECT id
        FROM activation_keys
        WHERE variant_id = $1
          AND status = 'available'
          AND deleted_at IS NULL
        ORDER BY created_at ASC, id ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    AND status = 'available'
    RETURNING *
"#;

const EXISTING_CLAIM_SQL: &str = r#"
    SELECT *
    FROM activation_keys
    WHERE order_id = $1
      AND variant_id = $2
      AND order_slot = $3
      AND status = 'used'
"#;

/// Store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn existing_claim(&self, claim: &Claim<'_>) -> Result<Option<ActivationKey>, StoreError> {
        let key = sqlx::query_as::<_, ActivationKey>(EXISTING_CLAIM_SQL)
            .bind(claim.order_id)
            .bind(claim.variant_id)
            .bind(claim.slot)
            .fetch_optional(&self.pool)
            .await?;

        Ok(key)
    }
}

/// Whether `err` is a unique violation on the given index.
fn is_unique_violation(err: &sqlx::Error, index: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(UNIQUE_VIOLATION) && db_err.constraint() == Some(index)
        }
        _ => false,
    }
}

/// Append the WHERE clause shared by the count and page queries.
/// `ILIKE` pattern matching `needle` as a literal substring.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a KeyFilter) {
    builder.push(" WHERE deleted_at IS NULL");

    if let Some(variant_id) = &filter.variant_id {
        builder.push(" AND variant_id = ").push_bind(variant_id);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status);
    }
    if let Some(order_id) = &filter.order_id {
        builder.push(" AND order_id = ").push_bind(order_id);
    }
    if let Some(created_by) = &filter.created_by {
        builder.push(" AND created_by = ").push_bind(created_by);
    }
    if let Some(search) = &filter.search {
        builder
            .push(" AND key_value ILIKE ")
            .push_bind(contains_pattern(search))
            .push(r" ESCAPE '\'");
    }
}

#[async_trait]
impl KeyStore for PgStore {
    async fn insert_keys(&self, keys: Vec<NewKey>) -> Result<Vec<ActivationKey>, StoreError> {
        // One transaction for the whole batch: a duplicate anywhere rolls back everything
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(keys.len());

        for key in keys {
            // clock_timestamp() (not NOW()) so keys of one batch keep their order
            let result = sqlx::query_as::<_, ActivationKey>(
                r#"
                INSERT INTO activation_keys (key_value, variant_id, cost_cents, created_by, created_at, updated_at)
                VALUES ($1, $2, $3, $4, clock_timestamp(), clock_timestamp())
                RETURNING *
                "#,
            )
            .bind(&key.key_value)
            .bind(&key.variant_id)
            .bind(key.cost_cents)
            .bind(&key.created_by)
            .fetch_one(&mut *tx)
            .await;

            match result {
                Ok(row) => inserted.push(row),
                Err(e) if is_unique_violation(&e, KEY_VALUE_INDEX) => {
                    tx.rollback().await?;
                    return Err(StoreError::DuplicateKey(mask_key(&key.key_value)));
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;

        Ok(inserted)
    }

    async fn get_key(&self, id: Uuid) -> Result<Option<ActivationKey>, StoreError> {
        let key = sqlx::query_as::<_, ActivationKey>(
            "SELECT * FROM activation_keys WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn list_keys(&self, query: &KeyQuery) -> Result<KeyPage, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM activation_keys");
        push_filters(&mut count, &query.filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut page = QueryBuilder::<Postgres>::new("SELECT * FROM activation_keys");
        push_filters(&mut page, &query.filter);
        // Column and direction come from whitelisted enums, never from user text
        page.push(format!(
            " ORDER BY {column} {direction}, id {direction}",
            column = query.sort.column(),
            direction = query.direction.keyword(),
        ));
        page.push(" LIMIT ").push_bind(query.limit);
        page.push(" OFFSET ").push_bind(query.offset);

        let keys = page
            .build_query_as::<ActivationKey>()
            .fetch_all(&self.pool)
            .await?;

        Ok(KeyPage { keys, total })
    }

    async fn delete_available_key(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE activation_keys
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL AND status = 'available'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Nothing deleted: tell "unknown" apart from "already allocated"
        let status: Option<KeyStatus> = sqlx::query_scalar(
            "SELECT status FROM activation_keys WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match status {
            Some(KeyStatus::Used) => Err(StoreError::AlreadyUsed),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn keys_for_order(&self, order_id: &str) -> Result<Vec<ActivationKey>, StoreError> {
        let keys = sqlx::query_as::<_, ActivationKey>(
            r#"
            SELECT *
            FROM activation_keys
            WHERE order_id = $1 AND status = 'used'
            ORDER BY used_at ASC, variant_id ASC, order_slot ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn stock(&self, variant_id: &str) -> Result<StockSummary, StoreError> {
        let (available, used): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'available'),
                COUNT(*) FILTER (WHERE status = 'used')
            FROM activation_keys
            WHERE variant_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(variant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(StockSummary {
            variant_id: variant_id.to_string(),
            available,
            used,
        })
    }

    async fn claim_key(&self, claim: &Claim<'_>) -> Result<ClaimOutcome, StoreError> {
        // Replayed delivery: this unit already has its key
        if let Some(existing) = self.existing_claim(claim).await? {
            return Ok(ClaimOutcome::Existing(existing));
        }

        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query_as::<_, ActivationKey>(CLAIM_SQL)
            .bind(claim.variant_id)
            .bind(claim.order_id)
            .bind(claim.slot)
            .fetch_optional(&mut *tx)
            .await;

        match claimed {
            Ok(Some(key)) => {
                tx.commit().await?;
                Ok(ClaimOutcome::Claimed(key))
            }
            Ok(None) => {
                // No unlocked candidate. Either the pool is empty or every
                // remaining key is locked by a concurrent claim.
                let any_available: bool = sqlx::query_scalar(
                    r#"
                    SELECT EXISTS(
                        SELECT 1 FROM activation_keys
                        WHERE variant_id = $1 AND status = 'available' AND deleted_at IS NULL
                    )
                    "#,
                )
                .bind(claim.variant_id)
                .fetch_one(&mut *tx)
                .await?;

                tx.rollback().await?;

                if any_available {
                    Ok(ClaimOutcome::Contended)
                } else {
                    Ok(ClaimOutcome::Exhausted)
                }
            }
            Err(e) if is_unique_violation(&e, ORDER_SLOT_INDEX) => {
                // A concurrent delivery of the same event served this unit first
                tx.rollback().await?;
                match self.existing_claim(claim).await? {
                    Some(existing) => Ok(ClaimOutcome::Existing(existing)),
                    None => Ok(ClaimOutcome::Contended),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for PgStore {
    async fn find_active_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let api_key = sqlx::query_as::<_, ApiKey>(
            "SELECT id, key_hash, label, created_at, is_active
             FROM api_keys
             WHERE key_hash = $1 AND is_active = true",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(api_key)
    }

    async fn register_api_key(&self, key_hash: &str, label: &str) -> Result<ApiKey, StoreError> {
        let api_key = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO api_keys (key_hash, label)
            VALUES ($1, $2)
            ON CONFLICT (key_hash) DO UPDATE
            SET label = EXCLUDED.label, is_active = true
            RETURNING id, key_hash, label, created_at, is_active
            "#,
        )
        .bind(key_hash)
        .bind(label)
        .fetch_one(&self.pool)
        .await?;

        Ok(api_key)
    }
}
