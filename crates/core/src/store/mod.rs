//! Capacity accounting and the reservation ledger.
//!
//! Both backends implement all three traits on one type so that the capacity
//! check and the ticket insert share a single atomic step.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, DEFAULT_BUSY_TIMEOUT};
pub use traits::{CapacityStore, EventRegistry, ReservationLedger, ReserveOutcome, StoreError};
