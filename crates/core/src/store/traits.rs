//! Storage traits for events, capacity and reservations.

use thiserror::Error;

use crate::booking::{CreateEventRequest, Event, Rejection, Reservation, UpdateEventRequest};

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Event does not exist.
    #[error("event not found: {0}")]
    EventNotFound(String),

    /// A reservation with this id already exists.
    #[error("duplicate reservation: {0}")]
    DuplicateReservation(String),

    /// Event still has reservations and cannot be deleted.
    #[error("event {event_id} has {reservations} reservation(s) and cannot be deleted")]
    EventInUse { event_id: String, reservations: u64 },

    /// A capacity change would leave fewer seats than are already sold.
    #[error("event {event_id} has {sold} ticket(s) sold; capacity {capacity} is too low")]
    CapacityBelowSold {
        event_id: String,
        capacity: u32,
        sold: u32,
    },

    /// The store could not be reached or timed out. Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be read back.
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the operation may succeed if attempted again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Result of an atomic check-and-reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The reservation was persisted. `remaining` is the capacity left after it.
    Granted { remaining: u32 },
    /// Not enough capacity; nothing was written.
    Denied { remaining: u32 },
}

/// Authoritative capacity accounting.
///
/// Implementations must serialize `try_reserve` per event so that no two
/// concurrent callers are both granted room that together exceeds capacity.
/// Calls for different events should not block each other.
pub trait CapacityStore: Send + Sync {
    /// Total capacity of an event, `None` when the event does not exist.
    fn get_capacity(&self, event_id: &str) -> Result<Option<u32>, StoreError>;

    /// Sum of reserved quantities for an event (0 when none).
    fn sold_quantity(&self, event_id: &str) -> Result<u32, StoreError>;

    /// Atomically check remaining capacity and persist the reservation.
    ///
    /// Fails with `DuplicateReservation` if the reservation id is already
    /// recorded, and `EventNotFound` if the event is missing. State is left
    /// unchanged on every non-`Granted` return.
    fn try_reserve(&self, reservation: &Reservation) -> Result<ReserveOutcome, StoreError>;
}

/// Ticket records and rejected requests, keyed by reservation id.
///
/// Reservations are only ever written by [`CapacityStore::try_reserve`].
pub trait ReservationLedger: Send + Sync {
    /// Get a reservation by id.
    fn get(&self, reservation_id: &str) -> Result<Option<Reservation>, StoreError>;

    /// All reservations for an event, oldest first.
    fn list_for_event(&self, event_id: &str) -> Result<Vec<Reservation>, StoreError>;

    /// Remember that a request was rejected. A later rejection of the same
    /// id replaces the earlier one.
    fn record_rejection(&self, rejection: &Rejection) -> Result<(), StoreError>;

    /// Get the rejection recorded for a reservation id.
    fn get_rejection(&self, reservation_id: &str) -> Result<Option<Rejection>, StoreError>;
}

/// Minimal event management.
pub trait EventRegistry: Send + Sync {
    /// Register a new event with a generated id.
    fn create_event(&self, request: CreateEventRequest) -> Result<Event, StoreError>;

    /// Get an event by id.
    fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError>;

    /// Replace an event's name, description and capacity.
    ///
    /// The capacity check runs under the same lock as reservations, so a
    /// capacity below the sold quantity fails with `CapacityBelowSold`.
    fn update_event(
        &self,
        event_id: &str,
        request: UpdateEventRequest,
    ) -> Result<Event, StoreError>;

    /// Delete an event. Refused while reservations reference it.
    fn delete_event(&self, event_id: &str) -> Result<Event, StoreError>;
}

/// Remaining capacity, saturating at zero.
pub(crate) fn remaining(capacity: u32, sold: u32) -> u32 {
    capacity.saturating_sub(sold)
}
