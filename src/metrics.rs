//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Session lifecycle
//! - Snapshot progress
//! - Key transfers (copied, missing, failed)
//! - Notification feed traffic and heartbeat liveness
//! - Channel state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `rds_channel_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No recorder is installed by this crate; without one every call is a no-op.
//!
//! # Usage
//!
//! ```rust,no_run
//! use rds_channel::metrics;
//!
//! metrics::record_scan_page(10);
//! metrics::record_key_copied("snapshot", 512);
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a session open attempt.
pub fn record_session_open(role: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("rds_channel_session_opens_total", "role" => role.to_string(), "status" => status).increment(1);
}

/// Record a released session.
pub fn record_session_released(role: &str) {
    counter!("rds_channel_sessions_released_total", "role" => role.to_string()).increment(1);
}

// =============================================================================
// Transfer Metrics
// =============================================================================

/// Record a successful key copy. `phase` is "snapshot" or "catch_up".
pub fn record_key_copied(phase: &'static str, blob_bytes: usize) {
    counter!("rds_channel_keys_copied_total", "phase" => phase).increment(1);
    histogram!("rds_channel_dump_size_bytes").record(blob_bytes as f64);
}

/// Record a key that vanished before it could be dumped.
pub fn record_key_missing(phase: &'static str) {
    counter!("rds_channel_keys_missing_total", "phase" => phase).increment(1);
}

/// Record a failed key transfer.
pub fn record_transfer_failure(phase: &'static str) {
    counter!("rds_channel_transfer_failures_total", "phase" => phase).increment(1);
}

/// Record how long one transfer took (DUMP plus the destination batch).
pub fn record_transfer_latency(duration: Duration) {
    histogram!("rds_channel_transfer_latency_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Snapshot Metrics
// =============================================================================

/// Record one SCAN page.
pub fn record_scan_page(keys: usize) {
    counter!("rds_channel_scan_pages_total").increment(1);
    counter!("rds_channel_scan_keys_total").increment(keys as u64);
}

/// Record a page whose remaining keys were skipped after a failure.
pub fn record_scan_page_abandoned() {
    counter!("rds_channel_scan_pages_abandoned_total").increment(1);
}

/// Record total snapshot duration.
pub fn record_snapshot_duration(duration: Duration) {
    histogram!("rds_channel_snapshot_duration_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Feed Metrics
// =============================================================================

/// Record an event received on the notification feed.
pub fn record_event(class: &'static str) {
    counter!("rds_channel_events_total", "class" => class).increment(1);
}

/// Record a heartbeat published by the prober.
pub fn record_heartbeat_published() {
    counter!("rds_channel_heartbeats_published_total").increment(1);
}

/// Record a watchdog expiry.
pub fn record_heartbeat_timeout() {
    counter!("rds_channel_heartbeat_timeouts_total").increment(1);
}

// =============================================================================
// Channel State
// =============================================================================

/// Set the channel state gauge.
pub fn set_channel_state(state: &str) {
    // Numeric for alerting
    let value = match state {
        "Created" => 0.0,
        "Connecting" => 1.0,
        "Snapshotting" => 2.0,
        "Replicating" => 3.0,
        "ShuttingDown" => 4.0,
        "Stopped" => 5.0,
        "Failed" => 6.0,
        _ => -1.0,
    };
    gauge!("rds_channel_state").set(value);
}
