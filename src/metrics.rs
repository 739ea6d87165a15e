// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation.
//!
//! Uses the `metrics` crate facade; the binary (or embedding process) picks
//! the exporter. Without an installed recorder every call is a no-op.
//!
//! # Metric Naming Convention
//! - `plfs_gateway_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `namespace`: registered namespace, or `batch` for whole-batch outcomes
//! - `operation`: append, append_batch, get
//! - `status`: success, rejected, aborted, or a failure code

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a facade operation outcome
pub fn record_operation(namespace: &str, operation: &str, status: &str) {
    counter!(
        "plfs_gateway_operations_total",
        "namespace" => namespace.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "plfs_gateway_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// FLUSH
// ═══════════════════════════════════════════════════════════════════════════

/// Record one drain of the write-back cache
pub fn record_flush_cycle(flushed: usize, failed: usize, duration: Duration) {
    counter!("plfs_gateway_flush_cycles_total").increment(1);
    counter!("plfs_gateway_flushed_values_total").increment(flushed as u64);
    counter!("plfs_gateway_flush_failures_total").increment(failed as u64);
    histogram!("plfs_gateway_flush_cycle_seconds").record(duration.as_secs_f64());
}

/// Set number of keys held by the cache
pub fn set_cache_entries(count: usize) {
    gauge!("plfs_gateway_cache_entries").set(count as f64);
}

/// Set number of values waiting to be flushed
pub fn set_pending_values(count: usize) {
    gauge!("plfs_gateway_pending_values").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Record startup/shutdown phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "plfs_gateway_startup_phase_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Track lifecycle state transitions
pub fn set_gateway_state(state: &str) {
    counter!(
        "plfs_gateway_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record a backend handle open/finish/close failure
pub fn record_backend_error(namespace: &str, operation: &str) {
    counter!(
        "plfs_gateway_backend_errors_total",
        "namespace" => namespace.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record an RPC connection accepted
pub fn record_connection() {
    counter!("plfs_gateway_connections_total").increment(1);
}
