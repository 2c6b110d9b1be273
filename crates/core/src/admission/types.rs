//! Admission outcomes and errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Why a booking request was turned down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// The request itself is invalid. Never retried.
    Malformed { detail: String },
    /// The event does not exist (never did, or was deleted).
    ResourceNotFound { event_id: String },
    /// Not enough seats left. A business outcome, not a failure.
    InsufficientCapacity { requested: u32, remaining: u32 },
}

impl RejectionReason {
    /// Stable reason code, matching the serialized `reason` tag.
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::Malformed { .. } => "malformed",
            RejectionReason::ResourceNotFound { .. } => "resource_not_found",
            RejectionReason::InsufficientCapacity { .. } => "insufficient_capacity",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            RejectionReason::Malformed { detail } => detail.clone(),
            RejectionReason::ResourceNotFound { event_id } => {
                format!("event {} does not exist", event_id)
            }
            RejectionReason::InsufficientCapacity {
                requested,
                remaining,
            } => format!(
                "requested {} ticket(s) but only {} remaining",
                requested, remaining
            ),
        }
    }
}

/// Terminal result of admitting a booking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdmissionOutcome {
    /// A new reservation was recorded.
    Admitted {
        reservation_id: String,
        remaining: u32,
    },
    /// The reservation already existed; nothing changed.
    AlreadyAdmitted { reservation_id: String },
    /// The request was refused.
    Rejected(RejectionReason),
}

/// Per-request processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionState {
    Pending,
    Admitted,
    AlreadyAdmitted,
    RejectedMalformed,
    RejectedNotFound,
    RejectedInsufficientCapacity,
    RetryRequested,
}

impl AdmissionState {
    /// Terminal states are acknowledged and never processed again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AdmissionState::Pending | AdmissionState::RetryRequested)
    }

    /// Short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionState::Pending => "pending",
            AdmissionState::Admitted => "admitted",
            AdmissionState::AlreadyAdmitted => "already_admitted",
            AdmissionState::RejectedMalformed => "rejected_malformed",
            AdmissionState::RejectedNotFound => "rejected_not_found",
            AdmissionState::RejectedInsufficientCapacity => "rejected_insufficient_capacity",
            AdmissionState::RetryRequested => "retry_requested",
        }
    }
}

impl AdmissionOutcome {
    pub fn state(&self) -> AdmissionState {
        match self {
            AdmissionOutcome::Admitted { .. } => AdmissionState::Admitted,
            AdmissionOutcome::AlreadyAdmitted { .. } => AdmissionState::AlreadyAdmitted,
            AdmissionOutcome::Rejected(RejectionReason::Malformed { .. }) => {
                AdmissionState::RejectedMalformed
            }
            AdmissionOutcome::Rejected(RejectionReason::ResourceNotFound { .. }) => {
                AdmissionState::RejectedNotFound
            }
            AdmissionOutcome::Rejected(RejectionReason::InsufficientCapacity { .. }) => {
                AdmissionState::RejectedInsufficientCapacity
            }
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionOutcome::Admitted { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, AdmissionOutcome::Rejected(_))
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        AdmissionOutcome::Rejected(RejectionReason::Malformed {
            detail: detail.into(),
        })
    }
}

/// Admission could not reach a decision.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The store failed transiently. The request should be redelivered.
    #[error("retryable store failure: {0}")]
    Retryable(#[source] StoreError),
}

impl AdmissionError {
    pub fn state(&self) -> AdmissionState {
        AdmissionState::RetryRequested
    }
}
