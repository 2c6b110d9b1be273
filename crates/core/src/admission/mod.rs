//! Admission control for booking requests.
//!
//! A request moves from `Pending` to exactly one terminal state
//! (`Admitted`, `AlreadyAdmitted` or one of the rejections) or to
//! `RetryRequested`, which loops back to `Pending` when the request is
//! redelivered.

mod engine;
mod types;

pub use engine::AdmissionEngine;
pub use types::{AdmissionError, AdmissionOutcome, AdmissionState, RejectionReason};
