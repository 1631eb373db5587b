//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{
    notify::NotifyError, services::allocation_service::AllocationError, store::StoreError,
};

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error message.
///
/// # Error Categories
///
/// - **Storage Errors**: database failures, always reported as 500
/// - **Authentication Errors**: invalid or missing API keys
/// - **Resource Errors**: requested key not found
/// - **Business Outcomes**: pool exhausted, key already used, duplicate key
/// - **Transient Errors**: allocation contention, notification failure (retry later)
/// - **Validation Errors**: invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// API key is missing, invalid, or inactive.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Requested activation key does not exist (or was deleted).
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Activation key not found")]
    KeyNotFound,

    /// The variant's key pool is exhausted.
    ///
    /// An expected business outcome, not a fault. Returns HTTP 409 Conflict.
    #[error("No activation key available for variant {variant_id} (needs restock)")]
    NoKeyAvailable { variant_id: String },

    /// The key was already allocated to an order and can't be changed.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Activation key already used")]
    KeyAlreadyUsed,

    /// A key with the same value already exists. Carries the masked value.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Activation key {0} already exists")]
    DuplicateKey(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Allocation lost the race too many times. Safe to retry.
    ///
    /// Returns HTTP 503 Service Unavailable.
    #[error("Allocation contention: {0}")]
    AllocationContention(String),

    /// The customer notification could not be delivered. Safe to retry.
    ///
    /// Returns HTTP 503 Service Unavailable.
    #[error("Notification failed: {0}")]
    Notification(#[from] NotifyError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => AppError::Database(e),
            StoreError::DuplicateKey(masked) => AppError::DuplicateKey(masked),
            StoreError::NotFound => AppError::KeyNotFound,
            StoreError::AlreadyUsed => AppError::KeyAlreadyUsed,
        }
    }
}

impl From<AllocationError> for AppError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::NoKeyAvailable { variant_id } => AppError::NoKeyAvailable { variant_id },
            AllocationError::Contention {
                variant_id,
                attempts,
            } => AppError::AllocationContention(format!(
                "variant {variant_id} still contended after {attempts} attempts"
            )),
            AllocationError::InvalidRequest(msg) => AppError::InvalidRequest(msg),
            AllocationError::Storage(e) => e.into(),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `InvalidApiKey` → 401 Unauthorized
/// - `KeyNotFound` → 404 Not Found
/// - `NoKeyAvailable`, `KeyAlreadyUsed`, `DuplicateKey` → 409 Conflict
/// - `InvalidRequest` → 400 Bad Request
/// - `AllocationContention`, `Notification` → 503 Service Unavailable
/// - `Database` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::KeyNotFound => (
                StatusCode::NOT_FOUND,
                "activation_key_not_found",
                self.to_string(),
            ),
            AppError::NoKeyAvailable { .. } => {
                (StatusCode::CONFLICT, "no_key_available", self.to_string())
            }
            AppError::KeyAlreadyUsed => {
                (StatusCode::CONFLICT, "activation_key_used", self.to_string())
            }
            AppError::DuplicateKey(_) => (StatusCode::CONFLICT, "duplicate_key", self.to_string()),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::AllocationContention(_) => {
                tracing::warn!("{}", self);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "allocation_contention",
                    self.to_string(),
                )
            }
            AppError::Notification(ref e) => {
                tracing::error!("Notification delivery failed: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "notification_failed",
                    "Notification could not be delivered, retry later".to_string(),
                )
            }
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
