//! Producer side of the request channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::BookingRequest;
use crate::channel::{ChannelError, RequestChannel};
use crate::metrics;

/// Errors returned when submitting a booking.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The booking is malformed and was not queued.
    #[error("invalid booking: {0}")]
    Invalid(String),

    /// The booking could not be queued.
    #[error("failed to queue booking: {0}")]
    Channel(#[from] ChannelError),
}

/// A booking as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub event_id: String,
    pub email: String,
    pub quantity: i64,
    /// Client-chosen ticket id. Resubmitting with the same id is idempotent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
}

/// Stamps bookings with a ticket id and queues them for admission.
///
/// Submission only queues the request; the admission decision is made later
/// by a worker. The returned id can be used to look the ticket up.
#[derive(Clone)]
pub struct BookingProducer {
    channel: Arc<dyn RequestChannel>,
}

impl BookingProducer {
    pub fn new(channel: Arc<dyn RequestChannel>) -> Self {
        Self { channel }
    }

    /// Validate and queue a booking, returning its ticket id.
    pub async fn submit(&self, booking: NewBooking) -> Result<String, ProducerError> {
        let ticket_id = match booking.ticket_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let request =
            BookingRequest::new(ticket_id, booking.event_id, booking.email, booking.quantity);
        request.validate().map_err(ProducerError::Invalid)?;

        match self.channel.publish(&request).await {
            Ok(()) => {
                metrics::PUBLISHES.with_label_values(&["ok"]).inc();
                info!(
                    ticket_id = %request.reservation_id,
                    event_id = %request.event_id,
                    quantity = request.quantity,
                    "Booking queued"
                );
                Ok(request.reservation_id)
            }
            Err(e) => {
                metrics::PUBLISHES.with_label_values(&["error"]).inc();
                warn!(
                    ticket_id = %request.reservation_id,
                    "Failed to queue booking: {}",
                    e
                );
                Err(e.into())
            }
        }
    }
}
