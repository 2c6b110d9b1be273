//! Worker pool that drains the request channel through the admission engine.
//!
//! Every worker is an independent task:
//! - **Receive**: wait for the next delivery (or shutdown)
//! - **Admit**: decode and hand the request to the engine
//! - **Settle**: ack terminal outcomes, nack transient failures with backoff
//!
//! Workers hold no per-event locks; capacity is serialized by the store.

mod config;
mod pool;
mod retry;
mod types;

pub use config::{RetryConfig, WorkerConfig};
pub use pool::{OutcomeCallback, WorkerPool};
pub use retry::RetryPolicy;
pub use types::{OutcomeReport, WorkerError, WorkerPoolStatus};
