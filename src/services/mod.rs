//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They take the store as an explicit argument and never hold state.

pub mod allocation_service;
pub mod fulfillment_service;
pub mod key_service;
