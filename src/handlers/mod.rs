//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Calls the store or a service
//! 3. Returns HTTP response (JSON, status code)

/// Key provisioning and listing endpoints
pub mod activation_keys;
/// Manual allocation endpoint
pub mod allocations;
/// Order event ingress
pub mod events;
pub mod health;
/// Stock and per-order views
pub mod inventory;
