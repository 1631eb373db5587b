//! Data models representing database entities and API payloads.

/// Activation key entity and admin API types
pub mod activation_key;
/// API key authentication model
pub mod api_key;
/// Customer notification payloads
pub mod notification;
/// Order completion event and fulfillment report
pub mod order;
