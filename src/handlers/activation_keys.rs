//! Activation key management HTTP handlers.
//!
//! This module implements the back-office endpoints:
//! - POST /api/v1/activation-keys - Create one or more keys
//! - POST /api/v1/activation-keys/import - Bulk text import
//! - GET /api/v1/activation-keys - List, filter, sort and paginate keys
//! - GET /api/v1/activation-keys/:id - Get one key
//! - DELETE /api/v1/activation-keys/:id - Delete an unused key

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::activation_key::{
        ActivationKeyResponse, CreateKeysRequest, CreatedKeysResponse, ImportKeysRequest,
        ListKeysQuery, ListKeysResponse,
    },
    services::key_service,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// Create one or more keys for a variant.
///
/// # Request Body
///
/// ```json
/// {
///   "variant_id": "variant_01J8STEAM500",
///   "keys": ["AAAA-BBBB-CCCC", "DDDD-EEEE-FFFF"],
///   "cost_cents": 450
/// }
/// ```
///
/// `keys` may also be a single string.
///
/// # Response
///
/// - **Success (201 Created)**: `{ "activation_keys": [...] }`
/// - **Error (400)**: Invalid input
/// - **Error (409)**: A key value already exists; nothing was stored
pub async fn create_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateKeysRequest>,
) -> Result<impl IntoResponse, AppError> {
    let keys = key_service::create_keys(
        &*state.store,
        &request.variant_id,
        request.keys.into_vec(),
        request.cost_cents,
        &auth.label,
    )
    .await?;

    let response = CreatedKeysResponse {
        activation_keys: keys.into_iter().map(Into::into).collect(),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Bulk import keys from text, one key per line.
///
/// # Request Body
///
/// ```json
/// {
///   "variant_id": "variant_01J8STEAM500",
///   "text": "AAAA-BBBB-CCCC\nDDDD-EEEE-FFFF\n",
///   "cost_cents": 450
/// }
/// ```
///
/// The whole batch is stored atomically.
pub async fn import_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ImportKeysRequest>,
) -> Result<impl IntoResponse, AppError> {
    let keys = key_service::import_keys(
        &*state.store,
        &request.variant_id,
        &request.text,
        request.cost_cents,
        &auth.label,
    )
    .await?;

    let response = CreatedKeysResponse {
        activation_keys: keys.into_iter().map(Into::into).collect(),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// List keys.
///
/// # Query Parameters
///
/// - `variant_id`, `status`, `order_id`, `created_by`: exact filters
/// - `q`: case-insensitive search in key values
/// - `sort`: column name, defaults to `created_at`
/// - `order`: `asc` or `desc` (default)
/// - `limit`: page size, 0 to 1000, default 100
/// - `offset`: keys to skip
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "count": 1,
///   "total": 42,
///   "limit": 1,
///   "offset": 0,
///   "sort": "created_at",
///   "order": "desc",
///   "activation_keys": [ ... ]
/// }
/// ```
pub async fn list_keys(
    State(state): State<AppState>,
    Query(params): Query<ListKeysQuery>,
) -> Result<Json<ListKeysResponse>, AppError> {
    let query = key_service::build_key_query(params);
    let page = state.store.list_keys(&query).await?;

    let activation_keys: Vec<ActivationKeyResponse> =
        page.keys.into_iter().map(Into::into).collect();

    Ok(Json(ListKeysResponse {
        count: activation_keys.len(),
        total: page.total,
        limit: query.limit,
        offset: query.offset,
        sort: query.sort.column().to_string(),
        order: query.direction.keyword().to_ascii_lowercase(),
        activation_keys,
    }))
}

/// Get a single key by ID.
///
/// # Response
///
/// - **Success (200 OK)**: The key
/// - **Error (404)**: Unknown or deleted key
pub async fn get_key(
    State(state): State<AppState>,
    Path(key_id): Path<Uuid>,
) -> Result<Json<ActivationKeyResponse>, AppError> {
    let key = state
        .store
        .get_key(key_id)
        .await?
        .ok_or(AppError::KeyNotFound)?;

    Ok(Json(key.into()))
}

/// Delete an unused key (soft delete).
///
/// # Response
///
/// - **Success (204 No Content)**
/// - **Error (404)**: Unknown or already deleted key
/// - **Error (409)**: The key was already allocated to an order
pub async fn delete_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(key_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.store.delete_available_key(key_id).await?;

    tracing::info!(%key_id, deleted_by = %auth.label, "Activation key deleted");

    Ok(StatusCode::NO_CONTENT)
}
