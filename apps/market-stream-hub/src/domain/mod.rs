//! Domain Layer - Core market data types and state.
//!
//! This layer contains the core domain types for market data streaming.
//! Nothing here performs I/O; all types are plain Rust with
//! serialization support.

/// Market data types (snapshots, trades, candles, depth) and envelopes.
pub mod streaming;

/// Instrument/channel subscriptions and routing keys.
pub mod subscription;

/// Latest-state cache keyed by symbol.
pub mod cache;
