//! Common types module for the order service.
//!
//! This module defines the core data types shared by the storage, repository
//! and HTTP layers so that every component agrees on the persisted and wire
//! representation of an order.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Order entity, line items and lifecycle status types.
pub mod order;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Storage key namespaces.
pub mod storage;
/// Configuration validation types for backend configuration tables.
pub mod validation;

// Re-export all types for convenient access
pub use api::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use validation::*;
