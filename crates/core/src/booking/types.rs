//! Booking domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A capacity-bounded event that tickets are reserved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Freeform description.
    pub description: String,
    /// Total number of tickets that can ever be reserved.
    pub capacity: u32,
    /// Principal that owns the event.
    pub owner: String,
    /// When the event was registered.
    pub created_at: DateTime<Utc>,
}

/// Request to register a new event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub description: String,
    pub capacity: u32,
    pub owner: String,
}

/// Replacement values for an existing event. The owner never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEventRequest {
    pub name: String,
    pub description: String,
    /// May not drop below the quantity already sold.
    pub capacity: u32,
}

/// A booking request that was turned down, kept so its status can be queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Reservation identifier of the rejected request.
    pub reservation_id: String,
    /// Event the request targeted (may not exist).
    pub event_id: String,
    /// Machine-readable reason, e.g. `insufficient_capacity`.
    pub reason: String,
    /// Human-readable explanation.
    pub detail: String,
    /// When the rejection was decided.
    pub created_at: DateTime<Utc>,
}

/// A granted reservation (one ticket record, possibly covering several seats).
///
/// Created exactly once per successful admission and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier, doubles as the idempotency key.
    pub id: String,
    /// Event this reservation counts against.
    pub event_id: String,
    /// Requester identity.
    pub email: String,
    /// Number of seats held.
    pub quantity: u32,
    /// When the reservation was admitted.
    pub created_at: DateTime<Utc>,
}

/// A booking request as carried on the request channel.
///
/// Field names on the wire follow the public booking API (`ticket_id` is the
/// reservation identifier). `quantity` is signed so that a negative value
/// survives decoding and can be rejected as malformed instead of failing to
/// parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    #[serde(rename = "ticket_id")]
    pub reservation_id: String,
    pub event_id: String,
    pub email: String,
    pub quantity: i64,
}

impl BookingRequest {
    pub fn new(
        reservation_id: impl Into<String>,
        event_id: impl Into<String>,
        email: impl Into<String>,
        quantity: i64,
    ) -> Self {
        Self {
            reservation_id: reservation_id.into(),
            event_id: event_id.into(),
            email: email.into(),
            quantity,
        }
    }

    /// Check the request is well formed.
    ///
    /// Returns the validated quantity, or a human readable reason.
    pub fn validate(&self) -> Result<u32, String> {
        if self.reservation_id.trim().is_empty() {
            return Err("missing ticket id".to_string());
        }
        if self.event_id.trim().is_empty() {
            return Err("missing event id".to_string());
        }
        if self.email.trim().is_empty() {
            return Err("missing requester email".to_string());
        }
        if self.quantity <= 0 {
            return Err(format!("quantity must be positive, got {}", self.quantity));
        }
        u32::try_from(self.quantity)
            .map_err(|_| format!("quantity {} is out of range", self.quantity))
    }

    /// Build the reservation that admitting this request would create.
    pub fn to_reservation(&self, quantity: u32) -> Reservation {
        Reservation {
            id: self.reservation_id.clone(),
            event_id: self.event_id.clone(),
            email: self.email.clone(),
            quantity,
            created_at: Utc::now(),
        }
    }
}
