//! Activation key service.
//!
//! Back-office service that stores pre-purchased activation keys per product
//! variant and hands each one out exactly once when an order completes.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Storage**: PostgreSQL with sqlx, or an in-memory store without a database
//! - **Authentication**: API key with SHA-256 hashing
//! - **Notifications**: HMAC-signed webhook to the mailer

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
