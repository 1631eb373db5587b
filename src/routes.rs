//! HTTP router assembly.
//!
//! Kept out of `main.rs` so integration tests can drive the exact same
//! router with `tower::ServiceExt::oneshot`.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware, state::AppState};

/// Build the application router.
///
/// Everything under `/api/v1` requires an API key; `/health` is public.
pub fn router(state: AppState) -> Router {
    // Create authenticated routes (API endpoints)
    let authenticated_routes = Router::new()
        // Key provisioning and inspection
        .route(
            "/api/v1/activation-keys",
            post(handlers::activation_keys::create_keys).get(handlers::activation_keys::list_keys),
        )
        .route(
            "/api/v1/activation-keys/import",
            post(handlers::activation_keys::import_keys),
        )
        .route(
            "/api/v1/activation-keys/{id}",
            get(handlers::activation_keys::get_key).delete(handlers::activation_keys::delete_key),
        )
        // Pool and order views
        .route(
            "/api/v1/variants/{variant_id}/stock",
            get(handlers::inventory::variant_stock),
        )
        .route(
            "/api/v1/orders/{order_id}/activation-keys",
            get(handlers::inventory::order_keys),
        )
        // Allocation
        .route(
            "/api/v1/allocations",
            post(handlers::allocations::allocate_key),
        )
        .route(
            "/api/v1/events/order-completed",
            post(handlers::events::order_completed),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
