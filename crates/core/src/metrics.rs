//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (request outcomes, recovery)
//! - Batch processor (submissions, polls, outcomes)
//! - Result cache (writes)
//! - Provider HTTP calls

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Orchestrator
// =============================================================================

/// Requests received by the orchestrator, by outcome.
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("batchgate_requests_total", "Total requests by outcome"),
        &["outcome"], // "cache_hit", "coalesced", "queued", "cache_miss", "fingerprint_error"
    )
    .unwrap()
});

/// Fingerprints resolved by fan-out, by result.
pub static ITEMS_RESOLVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "batchgate_items_resolved_total",
            "Total fingerprints resolved and fanned out",
        ),
        &["result"], // "completed", "failed"
    )
    .unwrap()
});

/// Window sizes (distinct fingerprints per flushed window).
pub static WINDOW_SIZE: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "batchgate_window_size",
            "Number of distinct requests per collation window",
        )
        .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0, 1000.0]),
    )
    .unwrap()
});

/// Dangling batches handled by recovery, by result.
pub static RECOVERED_BATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "batchgate_recovered_batches_total",
            "Total dangling batches handled by recovery",
        ),
        &["result"], // "recovered", "terminal", "failed"
    )
    .unwrap()
});

// =============================================================================
// Batch processor
// =============================================================================

/// Batches submitted to the provider.
pub static BATCHES_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "batchgate_batches_submitted_total",
        "Total batches submitted to the provider",
    )
    .unwrap()
});

/// Batch outcomes.
pub static BATCH_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("batchgate_batch_outcomes_total", "Total batch outcomes"),
        &["result"], // "completed", "failed"
    )
    .unwrap()
});

/// Status observations while polling, by observed status.
pub static POLL_OBSERVATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "batchgate_poll_observations_total",
            "Total batch status observations",
        ),
        &["status"],
    )
    .unwrap()
});

/// Time from submission (or recovery) to a terminal status.
pub static BATCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "batchgate_batch_duration_seconds",
            "Duration from submission to terminal status",
        )
        .buckets(vec![
            10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 14400.0, 86400.0,
        ]),
        &["result"],
    )
    .unwrap()
});

// =============================================================================
// Result cache
// =============================================================================

/// Cache writes by result.
pub static CACHE_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("batchgate_cache_writes_total", "Total result cache writes"),
        &["result"], // "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Provider
// =============================================================================

/// Provider call duration in seconds.
pub static PROVIDER_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "batchgate_provider_duration_seconds",
            "Duration of provider calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation"],
    )
    .unwrap()
});

/// Provider requests total.
pub static PROVIDER_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("batchgate_provider_requests_total", "Total provider requests"),
        &["operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrator
        Box::new(REQUESTS_TOTAL.clone()),
        Box::new(ITEMS_RESOLVED.clone()),
        Box::new(WINDOW_SIZE.clone()),
        Box::new(RECOVERED_BATCHES.clone()),
        // Processor
        Box::new(BATCHES_SUBMITTED.clone()),
        Box::new(BATCH_OUTCOMES.clone()),
        Box::new(POLL_OBSERVATIONS.clone()),
        Box::new(BATCH_DURATION.clone()),
        // Cache
        Box::new(CACHE_WRITES.clone()),
        // Provider
        Box::new(PROVIDER_DURATION.clone()),
        Box::new(PROVIDER_REQUESTS.clone()),
    ]
}
