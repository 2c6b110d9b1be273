//! Types for the worker pool.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admission::AdmissionOutcome;

/// Errors that can occur when controlling the pool.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// `start` was called on a running pool.
    #[error("worker pool already running")]
    AlreadyRunning,

    /// `stop` was called on a stopped pool.
    #[error("worker pool not running")]
    NotRunning,

    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(String),
}

/// A terminal admission result as seen by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeReport {
    /// Ticket id, when the message could be decoded.
    pub ticket_id: Option<String>,
    /// Event id, when the message could be decoded.
    pub event_id: Option<String>,
    /// How many times the message had been delivered.
    pub delivery_count: u32,
    pub outcome: AdmissionOutcome,
}

/// Current status of the worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolStatus {
    /// Whether the pool is running.
    pub running: bool,
    /// Number of worker tasks.
    pub workers: usize,
    /// Deliveries handled, retries included.
    pub processed: u64,
    /// Requests that created a reservation.
    pub admitted: u64,
    /// Redelivered requests whose reservation already existed.
    pub already_admitted: u64,
    /// Requests rejected (malformed, unknown event, sold out).
    pub rejected: u64,
    /// Deliveries returned to the channel after a transient failure.
    pub retried: u64,
}
