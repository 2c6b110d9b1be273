//! Exponential backoff for redelivering requests after transient failures.

use std::time::Duration;

use super::config::RetryConfig;

/// Backoff policy for redeliveries.
///
/// There is no retry limit: a request that keeps failing transiently is
/// redelivered at `max_delay` intervals until the store recovers.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first redelivery
    pub initial_delay: Duration,
    /// Cap for the exponential growth
    pub max_delay: Duration,
    /// Multiplier between attempts
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    /// Delay for a zero-based attempt number.
    ///
    /// `delay = initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;

        if !delay_ms.is_finite() || delay_ms >= max_ms {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    /// Delay before redelivering a message that has been delivered
    /// `delivery_count` times.
    #[must_use]
    pub fn delay_for_delivery(&self, delivery_count: u32) -> Duration {
        self.delay_for_attempt(delivery_count.saturating_sub(1))
    }
}
