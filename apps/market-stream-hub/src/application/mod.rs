//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (persistence, broadcast).
pub mod ports;

/// Application services: event routing, persistence flushing, facade.
pub mod services;
