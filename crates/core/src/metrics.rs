//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Admission decisions (by resulting state, with latency)
//! - Request channel traffic (publishes, redeliveries)
//! - Worker pool activity
//!
//! Metrics are created lazily; the server registers them with its registry.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Admission Metrics
// =============================================================================

/// Admission decisions total by resulting state.
pub static ADMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("turnstile_admissions_total", "Total admission decisions"),
        &["result"], // "admitted", "already_admitted", "rejected_*", "retry_requested"
    )
    .unwrap()
});

/// Admission decision latency in seconds.
pub static ADMISSION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "turnstile_admission_duration_seconds",
            "Time taken to reach an admission decision",
        )
        .buckets(vec![
            0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
        ]),
        &["result"],
    )
    .unwrap()
});

/// Seats reserved total.
pub static TICKETS_RESERVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "turnstile_tickets_reserved_total",
        "Total seats granted across all admitted reservations",
    )
    .unwrap()
});

// =============================================================================
// Channel Metrics
// =============================================================================

/// Publish attempts by result.
pub static PUBLISHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("turnstile_publish_total", "Booking requests published"),
        &["result"], // "ok", "error"
    )
    .unwrap()
});

/// Deliveries of a message that had been delivered before.
pub static REDELIVERIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "turnstile_redeliveries_total",
        "Booking requests delivered more than once",
    )
    .unwrap()
});

/// Messages nacked for a later retry.
pub static RETRIES_SCHEDULED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "turnstile_retries_scheduled_total",
        "Booking requests returned to the queue after a transient failure",
    )
    .unwrap()
});

// =============================================================================
// Worker Metrics
// =============================================================================

/// Worker tasks currently running.
pub static WORKERS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("turnstile_workers_active", "Number of running admission workers")
        .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Admission
        Box::new(ADMISSIONS.clone()),
        Box::new(ADMISSION_DURATION.clone()),
        Box::new(TICKETS_RESERVED.clone()),
        // Channel
        Box::new(PUBLISHES.clone()),
        Box::new(REDELIVERIES.clone()),
        Box::new(RETRIES_SCHEDULED.clone()),
        // Workers
        Box::new(WORKERS_ACTIVE.clone()),
    ]
}
