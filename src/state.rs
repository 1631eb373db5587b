//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::{notify::Notifier, services::allocation_service::RetryPolicy, store::Store};

/// Dependencies injected into handlers via Axum's `State` extractor.
///
/// Cloning is cheap: everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
    pub retry_policy: RetryPolicy,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, retry_policy: RetryPolicy) -> Self {
        Self {
            store,
            notifier,
            retry_policy,
        }
    }
}
