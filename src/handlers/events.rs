//! Order event ingress.
//!
//! The storefront posts here once an order's payment is captured. Delivery is
//! at-least-once: any non-2xx answer means "send it again".

use crate::{
    error::AppError,
    models::order::{FulfillmentReport, OrderCompletedEvent},
    services::fulfillment_service,
    state::AppState,
};
use axum::{Json, extract::State};

/// Fulfill a completed order.
///
/// # Endpoint
///
/// `POST /api/v1/events/order-completed`
///
/// # Response
///
/// - **Success (200 OK)**: `FulfillmentReport`, possibly with shortages
/// - **Error (400)**: Malformed event, redelivery won't help
/// - **Error (503 / 500)**: Transient failure, redeliver the event
///
/// ```json
/// {
///   "order_id": "order_01J8Z6",
///   "keys": [
///     {
///       "key_id": "550e8400-e29b-41d4-a716-446655440000",
///       "key_value": "AAAA-BBBB-CCCC",
///       "variant_id": "variant_01J8STEAM500",
///       "order_slot": 0,
///       "product_label": "Steam Wallet - 500 RUB",
///       "replayed": false
///     }
///   ],
///   "shortages": [],
///   "notified": true
/// }
/// ```
pub async fn order_completed(
    State(state): State<AppState>,
    Json(event): Json<OrderCompletedEvent>,
) -> Result<Json<FulfillmentReport>, AppError> {
    let report = fulfillment_service::fulfill_order(
        &*state.store,
        &*state.notifier,
        &state.retry_policy,
        &event,
    )
    .await?;

    if report.is_partial() {
        tracing::warn!(
            order_id = %report.order_id,
            shortages = report.shortages.len(),
            "Order partially fulfilled"
        );
    }

    Ok(Json(report))
}
