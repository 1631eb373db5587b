//! Read-only views over the key pool.
//!
//! - GET /api/v1/variants/:variant_id/stock - Available and used counts
//! - GET /api/v1/orders/:order_id/activation-keys - Keys delivered to an order

use crate::{
    error::AppError,
    models::activation_key::{ActivationKeyResponse, StockSummary},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
};

/// Pool summary for one variant. `available: 0` means it needs restock.
///
/// # Response (200 OK)
///
/// ```json
/// { "variant_id": "variant_01J8STEAM500", "available": 12, "used": 30 }
/// ```
pub async fn variant_stock(
    State(state): State<AppState>,
    Path(variant_id): Path<String>,
) -> Result<Json<StockSummary>, AppError> {
    let stock = state.store.stock(&variant_id).await?;

    Ok(Json(stock))
}

/// Keys allocated to an order, oldest allocation first.
///
/// Unknown orders return an empty list.
pub async fn order_keys(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<ActivationKeyResponse>>, AppError> {
    let keys = state.store.keys_for_order(&order_id).await?;

    Ok(Json(keys.into_iter().map(Into::into).collect()))
}
