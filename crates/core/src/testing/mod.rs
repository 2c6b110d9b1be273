//! Testing utilities: failure-injecting stores and fixtures.
//!
//! # Example
//!
//! ```rust,ignore
//! use turnstile_core::testing::{fixtures, FlakyStore};
//!
//! let (store, event_id) = FlakyStore::with_event(10);
//! store.fail_next(2);
//!
//! // The next two store calls return `StoreError::Unavailable`.
//! let request = fixtures::booking("t-1", &event_id, 1);
//! ```

mod flaky_store;

pub use flaky_store::FlakyStore;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;

    use crate::booking::{
        BookingRequest, CreateEventRequest, Rejection, Reservation, UpdateEventRequest,
    };

    /// Create an event registration request with reasonable defaults.
    pub fn event_request(name: &str, capacity: u32) -> CreateEventRequest {
        CreateEventRequest {
            name: name.to_string(),
            description: format!("{} (test event)", name),
            capacity,
            owner: "organizer@example.com".to_string(),
        }
    }

    /// Replacement values for an event.
    pub fn event_update(name: &str, capacity: u32) -> UpdateEventRequest {
        UpdateEventRequest {
            name: name.to_string(),
            description: format!("{} (updated)", name),
            capacity,
        }
    }

    /// Create a recorded rejection with the given reason code.
    pub fn rejection(reservation_id: &str, event_id: &str, reason: &str) -> Rejection {
        Rejection {
            reservation_id: reservation_id.to_string(),
            event_id: event_id.to_string(),
            reason: reason.to_string(),
            detail: format!("rejected: {}", reason),
            created_at: Utc::now(),
        }
    }

    /// Create a reservation for an event.
    pub fn reservation(id: &str, event_id: &str, quantity: u32) -> Reservation {
        Reservation {
            id: id.to_string(),
            event_id: event_id.to_string(),
            email: format!("{}@example.com", id),
            quantity,
            created_at: Utc::now(),
        }
    }

    /// Create a booking request. `quantity` is signed so malformed requests
    /// can be built too.
    pub fn booking(ticket_id: &str, event_id: &str, quantity: i64) -> BookingRequest {
        BookingRequest::new(ticket_id, event_id, "fan@example.com", quantity)
    }
}
