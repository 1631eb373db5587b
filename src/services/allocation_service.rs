//! Allocation service - hands out activation keys to orders.
//!
//! This service handles:
//! - Input validation
//! - Idempotent replay of already served order units
//! - Bounded retry when concurrent claims lock every candidate
//!
//! # Atomicity Guarantees
//!
//! The select-and-mark step is a single store operation (see
//! [`KeyStore::claim_key`]). This module never reads a key and writes it back
//! in two steps.

use std::time::Duration;

use rand::Rng;

use crate::{
    models::activation_key::ActivationKey,
    store::{Claim, ClaimOutcome, KeyStore, StoreError},
};

/// How hard to try before reporting contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total claim attempts, at least 1
    pub max_attempts: u32,
    /// Base pause between attempts; a random jitter of up to the same amount is added
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    /// Pause before the next attempt: `backoff` plus up to `backoff` of random jitter.
    pub fn next_delay(&self) -> Duration {
        let base = u64::try_from(self.backoff.as_millis()).unwrap_or(u64::MAX);
        if base == 0 {
            return Duration::ZERO;
        }
        let jitter = rand::rng().random_range(0..=base);
        Duration::from_millis(base.saturating_add(jitter))
    }
}

/// A successful allocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Allocation {
    /// A key was transitioned to used by this call.
    Issued(ActivationKey),
    /// The order unit already held this key; nothing was consumed.
    Replayed(ActivationKey),
}

impl Allocation {
    pub fn key(&self) -> &ActivationKey {
        match self {
            Allocation::Issued(key) | Allocation::Replayed(key) => key,
        }
    }

    pub fn into_key(self) -> ActivationKey {
        match self {
            Allocation::Issued(key) | Allocation::Replayed(key) => key,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Allocation::Replayed(_))
    }
}

/// Why an allocation did not produce a key.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The variant has no available key. Expected; the variant needs restock.
    #[error("No activation key available for variant {variant_id}")]
    NoKeyAvailable { variant_id: String },

    /// Every attempt found the remaining keys locked by concurrent claims.
    #[error("Allocation for variant {variant_id} still contended after {attempts} attempts")]
    Contention { variant_id: String, attempts: u32 },

    #[error("Invalid allocation request: {0}")]
    InvalidRequest(String),

    /// The store failed. Transient from the caller's point of view.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl AllocationError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AllocationError::Contention { .. } | AllocationError::Storage(_)
        )
    }
}

/// Allocate a key for the first unit of `variant_id` in `order_id`.
///
/// Shorthand for [`allocate_unit`] with slot 0.
pub async fn allocate<S>(
    store: &S,
    policy: &RetryPolicy,
    variant_id: &str,
    order_id: &str,
) -> Result<Allocation, AllocationError>
where
    S: KeyStore + ?Sized,
{
    allocate_unit(store, policy, variant_id, order_id, 0).await
}

/// Allocate a key for one unit of an order.
///
/// # Process
///
/// 1. Validate the identifiers
/// 2. Ask the store to claim a key for `(order_id, variant_id, slot)`
/// 3. On contention, wait [`RetryPolicy::next_delay`] and try again, up to `policy.max_attempts`
///
/// # Arguments
///
/// * `store` - Injected storage handle
/// * `policy` - Retry budget
/// * `variant_id` - Variant whose pool to draw from
/// * `order_id` - Order the key is attributed to
/// * `slot` - Zero-based unit index of this variant within the order
///
/// # Returns
///
/// - `Allocation::Issued` when a key was consumed by this call
/// - `Allocation::Replayed` when the unit had been served before
///
/// # Errors
///
/// - `NoKeyAvailable`: pool exhausted (business outcome)
/// - `Contention`: retry budget exhausted (transient)
/// - `InvalidRequest`: blank identifiers or negative slot
/// - `Storage`: store failure (transient)
pub async fn allocate_unit<S>(
    store: &S,
    policy: &RetryPolicy,
    variant_id: &str,
    order_id: &str,
    slot: i32,
) -> Result<Allocation, AllocationError>
where
    S: KeyStore + ?Sized,
{
    let variant_id = variant_id.trim();
    let order_id = order_id.trim();

    if variant_id.is_empty() {
        return Err(AllocationError::InvalidRequest(
            "variant_id must not be empty".to_string(),
        ));
    }
    if order_id.is_empty() {
        return Err(AllocationError::InvalidRequest(
            "order_id must not be empty".to_string(),
        ));
    }
    if slot < 0 {
        return Err(AllocationError::InvalidRequest(
            "slot must not be negative".to_string(),
        ));
    }

    let claim = Claim {
        variant_id,
        order_id,
        slot,
    };
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        match store.claim_key(&claim).await? {
            ClaimOutcome::Claimed(key) => {
                tracing::info!(
                    key_id = %key.id,
                    variant_id,
                    order_id,
                    slot,
                    "Activation key {} allocated",
                    key.masked_value()
                );
                return Ok(Allocation::Issued(key));
            }
            ClaimOutcome::Existing(key) => {
                tracing::info!(
                    key_id = %key.id,
                    variant_id,
                    order_id,
                    slot,
                    "Order unit already served, returning existing key"
                );
                return Ok(Allocation::Replayed(key));
            }
            ClaimOutcome::Exhausted => {
                return Err(AllocationError::NoKeyAvailable {
                    variant_id: variant_id.to_string(),
                });
            }
            ClaimOutcome::Contended => {
                tracing::debug!(variant_id, order_id, attempt, "Key claim contended");
                if attempt < attempts {
                    tokio::time::sleep(policy.next_delay()).await;
                }
            }
        }
    }

    Err(AllocationError::Contention {
        variant_id: variant_id.to_string(),
        attempts,
    })
}
