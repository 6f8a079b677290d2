//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: Frames received, decode errors, connection state
//! - **Fan-out**: Envelopes published, subscribers, slow-consumer evictions
//! - **State**: Cached symbols and discarded stale tickers
//! - **Persistence**: Flushed snapshots and failed writes
//! - **Latency**: Event routing time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before `init_metrics` is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Upstream
    describe_counter!(
        "market_hub_upstream_frames_total",
        "Decoded frames received from the exchange by kind"
    );
    describe_counter!(
        "market_hub_upstream_decode_errors_total",
        "Upstream frames skipped because they could not be decoded"
    );
    describe_counter!(
        "market_hub_upstream_reconnects_total",
        "Upstream reconnection attempts"
    );
    describe_gauge!(
        "market_hub_upstream_connected",
        "1 while the upstream connection is open"
    );

    // Fan-out
    describe_counter!(
        "market_hub_envelopes_published_total",
        "Envelopes fanned out to subscribers by kind"
    );
    describe_counter!(
        "market_hub_subscribers_evicted_total",
        "Subscribers disconnected because their queue was full"
    );
    describe_gauge!(
        "market_hub_subscribers",
        "Number of registered downstream subscribers"
    );

    // State
    describe_gauge!(
        "market_hub_cached_symbols",
        "Number of symbols in the state cache"
    );
    describe_counter!(
        "market_hub_stale_tickers_total",
        "Tickers discarded because a newer snapshot was cached"
    );

    describe_counter!(
        "market_hub_ticker_refreshes_total",
        "Polled ticker refresh passes by outcome"
    );

    // Persistence
    describe_counter!(
        "market_hub_snapshots_flushed_total",
        "Snapshots written by the periodic flusher"
    );
    describe_counter!(
        "market_hub_persistence_failures_total",
        "Failed persistence writes by record kind"
    );

    // Latency
    describe_histogram!(
        "market_hub_event_routing_seconds",
        "Time to cache, persist and publish one upstream event"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

#[allow(clippy::cast_precision_loss)]
fn as_gauge(value: usize) -> f64 {
    value as f64
}

/// Record a decoded upstream frame.
pub fn record_upstream_frame(kind: &'static str) {
    counter!("market_hub_upstream_frames_total", "kind" => kind).increment(1);
}

/// Record an upstream frame that failed to decode.
pub fn record_decode_error() {
    counter!("market_hub_upstream_decode_errors_total").increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_upstream_reconnect() {
    counter!("market_hub_upstream_reconnects_total").increment(1);
}

/// Update the upstream connection state.
pub fn set_upstream_connected(connected: bool) {
    gauge!("market_hub_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record an envelope fanned out by the hub.
pub fn record_envelope_published(kind: &'static str) {
    counter!("market_hub_envelopes_published_total", "kind" => kind).increment(1);
}

/// Record a slow subscriber being disconnected.
pub fn record_subscriber_evicted() {
    counter!("market_hub_subscribers_evicted_total").increment(1);
}

/// Update the registered subscriber count.
pub fn set_subscriber_count(count: usize) {
    gauge!("market_hub_subscribers").set(as_gauge(count));
}

/// Update the number of cached symbols.
pub fn set_cached_symbols(count: usize) {
    gauge!("market_hub_cached_symbols").set(as_gauge(count));
}

/// Record a ticker discarded as stale.
pub fn record_stale_ticker() {
    counter!("market_hub_stale_tickers_total").increment(1);
}

/// Record one polled ticker refresh pass.
pub fn record_ticker_refresh(outcome: &'static str) {
    counter!("market_hub_ticker_refreshes_total", "outcome" => outcome).increment(1);
}

/// Record snapshots written by one flush pass.
pub fn record_snapshots_flushed(count: usize) {
    counter!("market_hub_snapshots_flushed_total")
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record a failed persistence write.
pub fn record_persistence_failure(record: &'static str) {
    counter!("market_hub_persistence_failures_total", "record" => record).increment(1);
}

/// Record how long one upstream event took to route.
pub fn record_routing_duration(kind: &'static str, duration: Duration) {
    histogram!("market_hub_event_routing_seconds", "kind" => kind)
        .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_upstream_frame("ticker");
        record_decode_error();
        set_upstream_connected(true);
        set_subscriber_count(3);
        record_persistence_failure("trade");
        record_routing_duration("trade", Duration::from_millis(1));
    }

    #[test]
    fn gauge_conversion() {
        assert!((as_gauge(42) - 42.0).abs() < f64::EPSILON);
    }
}
