//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the turnstile server:
//! - HTTP request metrics (latency, counts)
//! - Booking API traffic
//! - Worker pool and queue status (collected dynamically)
//!
//! Admission and channel metrics live in `turnstile_core::metrics` and are
//! registered here as well.

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
            "turnstile_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("turnstile_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "turnstile_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Booking API Metrics
// =============================================================================

/// Booking submissions by HTTP outcome.
pub static BOOKINGS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "turnstile_bookings_submitted_total",
            "Booking requests received by the API",
        ),
        &["result"], // "accepted", "invalid", "error"
    )
    .unwrap()
});

// =============================================================================
// Worker Metrics (collected dynamically)
// =============================================================================

/// Worker pool running state (1 = running, 0 = stopped).
pub static WORKER_POOL_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "turnstile_worker_pool_running",
        "Whether the worker pool is running (1) or stopped (0)",
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

    // Bookings
    registry
        .register(Box::new(BOOKINGS_SUBMITTED.clone()))
        .unwrap();

    // Workers
    registry
        .register(Box::new(WORKER_POOL_RUNNING.clone()))
        .unwrap();

    // Core metrics (admission, channel, workers)
    for metric in turnstile_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the worker pool right now.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let running = state.workers().is_some_and(|pool| pool.is_running());
    WORKER_POOL_RUNNING.set(i64::from(running));
}

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

/// Matches the free-form id segment of resource paths.
static RESOURCE_ID_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/api/v1/(?:tickets|events|queue))/([^/]+)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
///
/// Ticket ids may be chosen by clients, so every segment after a resource
/// collection is collapsed, not only UUID-shaped ones.
pub fn normalize_path(path: &str) -> String {
    let result = UUID_SEGMENT.replace_all(path, "{id}");
    let result = RESOURCE_ID_SEGMENT.replace(&result, |caps: &regex_lite::Captures| {
        if &caps[2] == "book" {
            caps[0].to_string()
        } else {
            format!("{}/{{id}}", &caps[1])
        }
    });
    result.to_string()
}
