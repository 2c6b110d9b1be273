//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Enable/disable the workers.
    /// When disabled, bookings are queued but never admitted by this process.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Number of concurrent workers.
    #[serde(default = "default_count")]
    pub count: usize,

    /// Backoff for requests that hit a transient store failure.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Redelivery backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first redelivery (milliseconds).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound on the delay (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive attempts.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_count() -> usize {
    4
}

fn default_initial_delay() -> u64 {
    100
}

fn default_max_delay() -> u64 {
    30_000 // 30 seconds
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            count: default_count(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}
