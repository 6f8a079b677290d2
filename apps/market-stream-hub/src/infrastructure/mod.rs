//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Exchange combined-stream WebSocket session.
pub mod upstream;

/// Subscriber WebSocket endpoint and control surface.
pub mod downstream;

/// Actor that fans envelopes out to subscribers.
pub mod broadcast;

/// Snapshot store adapters.
pub mod persistence;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OpenTelemetry setup.
pub mod telemetry;
