//! Common test utilities for the activation key service.
//!
//! - `TestApp`: the real router over a `MemoryStore`, with an API key registered
//! - `RecordingNotifier`: captures notifications, can be told to fail
//! - `FlakyStore`: reports contention a fixed number of times before delegating
//! - Request helpers that return `(StatusCode, serde_json::Value)`

#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};
use std::time::Duration;

use activation_key_service::{
    middleware::auth::hash_api_key,
    models::{
        activation_key::{ActivationKey, NewKey, StockSummary},
        api_key::ApiKey,
        notification::KeyNotification,
    },
    notify::{Notifier, NotifyError},
    routes,
    services::allocation_service::RetryPolicy,
    state::AppState,
    store::{
        ApiKeyStore, Claim, ClaimOutcome, KeyPage, KeyQuery, KeyStore, MemoryStore, StoreError,
    },
};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

/// Bearer token registered in every `TestApp`.
pub const TEST_API_KEY: &str = "test-admin-key";

/// Label of the test API key, recorded as `created_by`.
pub const TEST_API_KEY_LABEL: &str = "back-office";

/// Skip test if environment variable is not set
#[macro_export]
macro_rules! skip_without_env {
    ($var:expr) => {
        if std::env::var($var).is_err() {
            eprintln!("Skipping test: {} environment variable not set", $var);
            return;
        }
    };
}

/// Retry budget with a tiny backoff so contention tests stay fast.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
    }
}

pub fn new_key(value: &str, variant_id: &str) -> NewKey {
    NewKey {
        key_value: value.to_string(),
        variant_id: variant_id.to_string(),
        cost_cents: None,
        created_by: Some("fixtures".to_string()),
    }
}

/// Insert available keys for a variant, in the given order.
pub async fn seed_keys<S>(store: &S, variant_id: &str, values: &[&str]) -> Vec<ActivationKey>
where
    S: KeyStore + ?Sized,
{
    store
        .insert_keys(values.iter().map(|v| new_key(v, variant_id)).collect())
        .await
        .expect("seeding keys")
}

/// Notifier that remembers what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<KeyNotification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `send` fail with a rejected status.
    pub fn fail_with_rejection(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<KeyNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &KeyNotification) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected(502));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Store wrapper whose first `contended` claims report `Contended`.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    contended: AtomicU32,
    claim_calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(contended: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            contended: AtomicU32::new(contended),
            claim_calls: AtomicU32::new(0),
        }
    }

    pub fn claim_calls(&self) -> u32 {
        self.claim_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyStore for FlakyStore {
    async fn insert_keys(&self, keys: Vec<NewKey>) -> Result<Vec<ActivationKey>, StoreError> {
        self.inner.insert_keys(keys).await
    }

    async fn get_key(&self, id: Uuid) -> Result<Option<ActivationKey>, StoreError> {
        self.inner.get_key(id).await
    }

    async fn list_keys(&self, query: &KeyQuery) -> Result<KeyPage, StoreError> {
        self.inner.list_keys(query).await
    }

    async fn delete_available_key(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_available_key(id).await
    }

    async fn keys_for_order(&self, order_id: &str) -> Result<Vec<ActivationKey>, StoreError> {
        self.inner.keys_for_order(order_id).await
    }

    async fn stock(&self, variant_id: &str) -> Result<StockSummary, StoreError> {
        self.inner.stock(variant_id).await
    }

    async fn claim_key(&self, claim: &Claim<'_>) -> Result<ClaimOutcome, StoreError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.contended.load(Ordering::SeqCst);
        if remaining > 0 {
            self.contended.store(remaining - 1, Ordering::SeqCst);
            return Ok(ClaimOutcome::Contended);
        }

        self.inner.claim_key(claim).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

#[async_trait]
impl ApiKeyStore for FlakyStore {
    async fn find_active_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        self.inner.find_active_api_key(key_hash).await
    }

    async fn register_api_key(&self, key_hash: &str, label: &str) -> Result<ApiKey, StoreError> {
        self.inner.register_api_key(key_hash, label).await
    }
}

/// The real router over an in-memory store.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .register_api_key(&hash_api_key(TEST_API_KEY), TEST_API_KEY_LABEL)
            .await
            .expect("registering test API key");

        let notifier = Arc::new(RecordingNotifier::new());
        let state = AppState::new(store.clone(), notifier.clone(), fast_policy());

        Self {
            store,
            notifier,
            router: routes::router(state),
        }
    }

    /// Send an authenticated request.
    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        send_request(&self.router, method, uri, body, Some(TEST_API_KEY)).await
    }

    /// Send a request without credentials.
    pub async fn send_anonymous(&self, method: &str, uri: &str) -> (StatusCode, Value) {
        send_request(&self.router, method, uri, None, None).await
    }
}

/// Run one request through the router and decode the JSON body.
///
/// Empty bodies (204) decode to `Value::Null`.
pub async fn send_request(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    api_key: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(api_key) = api_key {
        builder = builder.header("Authorization", format!("Bearer {api_key}"));
    }

    let request = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, json)
}

/// Error code from a standard `{"error": {"code", "message"}}` body.
pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}
