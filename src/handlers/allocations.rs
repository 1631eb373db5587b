//! Manual allocation endpoint.
//!
//! Lets an operator issue a key for an order by hand, e.g. when re-sending a
//! key for a support ticket. Goes through the same allocator as fulfillment.

use crate::{
    error::AppError,
    models::activation_key::{AllocateRequest, AllocationResponse},
    services::allocation_service,
    state::AppState,
};
use axum::{Json, extract::State};

/// Allocate (or re-send) the key for an order's variant.
///
/// # Endpoint
///
/// `POST /api/v1/allocations`
///
/// # Request Body
///
/// ```json
/// { "variant_id": "variant_01J8STEAM500", "order_id": "order_01J8Z6" }
/// ```
///
/// If the order already holds a key for the variant, that key comes back
/// with `"replayed": true` and nothing is consumed.
///
/// # Response
///
/// - **Success (200 OK)**: `{ "replayed": false, "activation_key": { ... } }`
/// - **Error (409)**: `no_key_available`, the variant needs restock
/// - **Error (503)**: `allocation_contention`, retry later
pub async fn allocate_key(
    State(state): State<AppState>,
    Json(request): Json<AllocateRequest>,
) -> Result<Json<AllocationResponse>, AppError> {
    let allocation = allocation_service::allocate(
        &*state.store,
        &state.retry_policy,
        &request.variant_id,
        &request.order_id,
    )
    .await?;

    Ok(Json(AllocationResponse {
        replayed: allocation.is_replay(),
        activation_key: allocation.into_key().into(),
    }))
}
