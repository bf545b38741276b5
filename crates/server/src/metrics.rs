//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the gateway server:
//! - HTTP request metrics (latency, counts, in-flight)
//! - Orchestrator queue depths and cache size (collected dynamically)
//! - Core batching metrics, re-registered from `batchgate_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use regex_lite::Regex;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "batchgate_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        // Sync-mode chat requests block for the whole batch.
        .buckets(vec![
            0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 1800.0, 3600.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("batchgate_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "batchgate_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Orchestrator Metrics (collected dynamically)
// =============================================================================

/// Orchestrator running state (1 = running, 0 = stopped).
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "batchgate_orchestrator_running",
        "Whether the orchestrator is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Fingerprints waiting for the next collation window.
pub static ORCHESTRATOR_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "batchgate_orchestrator_pending",
        "Fingerprints queued for the next batch",
    )
    .unwrap()
});

/// Fingerprints that are queued or inside a live batch.
pub static ORCHESTRATOR_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "batchgate_orchestrator_in_flight",
        "Fingerprints with an unresolved result",
    )
    .unwrap()
});

/// Callers blocked on an unresolved fingerprint.
pub static ORCHESTRATOR_WAITERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "batchgate_orchestrator_waiters",
        "Callers waiting for a batch result",
    )
    .unwrap()
});

/// Rows in the response cache.
pub static CACHED_RESPONSES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "batchgate_cached_responses",
        "Number of responses in the result cache",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Orchestrator
    registry
        .register(Box::new(ORCHESTRATOR_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(ORCHESTRATOR_PENDING.clone()))
        .unwrap();
    registry
        .register(Box::new(ORCHESTRATOR_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(ORCHESTRATOR_WAITERS.clone()))
        .unwrap();
    registry
        .register(Box::new(CACHED_RESPONSES.clone()))
        .unwrap();

    // Core metrics (requests, batches, polling, cache, provider calls)
    for metric in batchgate_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the orchestrator and cache
/// at scrape time.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.orchestrator().status();
    ORCHESTRATOR_RUNNING.set(if status.running { 1 } else { 0 });
    ORCHESTRATOR_PENDING.set(status.pending_count as i64);
    ORCHESTRATOR_IN_FLIGHT.set(status.in_flight_count as i64);
    ORCHESTRATOR_WAITERS.set(status.waiter_count as i64);

    if let Ok(count) = state.store().count_cached_responses() {
        CACHED_RESPONSES.set(count);
    }
}

static FINGERPRINT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9a-f]{64}").unwrap());
static BATCH_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/batch_[0-9A-Za-z_]+").unwrap());
static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = FINGERPRINT_RE.replace_all(path, "{fingerprint}");
    let result = BATCH_ID_RE.replace_all(&result, "/{batch_id}");
    let result = UUID_RE.replace_all(&result, "{id}");
    let result = NUMERIC_RE.replace_all(&result, "/{id}$1");
    result.to_string()
}
