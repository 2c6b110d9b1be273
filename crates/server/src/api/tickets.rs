//! Ticket API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};
use turnstile_core::{NewBooking, ProducerError, Rejection, Reservation};

use super::{error_response, ErrorResponse};
use super::events::EventResponse;
use crate::metrics::BOOKINGS_SUBMITTED;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response for an accepted booking
#[derive(Debug, Serialize)]
pub struct BookTicketResponse {
    pub message: String,
    pub ticket_id: String,
}

/// A ticket as returned by the API
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub id: String,
    pub event_id: String,
    pub email: String,
    pub quantity: u32,
    pub created_at: String,
}

impl From<Reservation> for TicketResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            id: reservation.id,
            event_id: reservation.event_id,
            email: reservation.email,
            quantity: reservation.quantity,
            created_at: reservation.created_at.to_rfc3339(),
        }
    }
}

/// Where a booking stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Queued or being processed, or never submitted
    Pending,
    Admitted,
    Rejected,
}

/// Response for ticket lookup
#[derive(Debug, Serialize)]
pub struct TicketDetailsResponse {
    pub ticket_id: String,
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventResponse>,
    /// Rejection reason code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TicketDetailsResponse {
    fn admitted(ticket: TicketResponse, event: EventResponse) -> Self {
        Self {
            ticket_id: ticket.id.clone(),
            status: TicketStatus::Admitted,
            ticket: Some(ticket),
            event: Some(event),
            reason: None,
            detail: None,
            error: None,
        }
    }

    fn rejected(rejection: Rejection) -> Self {
        Self {
            ticket_id: rejection.reservation_id,
            status: TicketStatus::Rejected,
            ticket: None,
            event: None,
            reason: Some(rejection.reason),
            detail: Some(rejection.detail),
            error: None,
        }
    }

    fn pending(ticket_id: String) -> Self {
        Self {
            error: Some(format!("Ticket not found: {}", ticket_id)),
            ticket_id,
            status: TicketStatus::Pending,
            ticket: None,
            event: None,
            reason: None,
            detail: None,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Queue a booking request for admission
///
/// Returns as soon as the request is queued; the ticket exists once a worker
/// admits it.
pub async fn book_ticket(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewBooking>,
) -> Result<(StatusCode, Json<BookTicketResponse>), impl IntoResponse> {
    match state.producer().submit(body).await {
        Ok(ticket_id) => {
            BOOKINGS_SUBMITTED.with_label_values(&["accepted"]).inc();
            Ok((
                StatusCode::ACCEPTED,
                Json(BookTicketResponse {
                    message: "Ticket booking request added to queue".to_string(),
                    ticket_id,
                }),
            ))
        }
        Err(ProducerError::Invalid(reason)) => {
            BOOKINGS_SUBMITTED.with_label_values(&["invalid"]).inc();
            Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid request payload: {}", reason),
            ))
        }
        Err(e) => {
            BOOKINGS_SUBMITTED.with_label_values(&["error"]).inc();
            error!("Failed to enqueue ticket request: {}", e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not enqueue ticket request",
            ))
        }
    }
}

/// Get a booking's status, with the ticket and its event once admitted
///
/// A rejected booking is a normal answer (200). A booking that has neither a
/// ticket nor a rejection is still pending, or was never submitted (404).
pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<TicketDetailsResponse>), (StatusCode, Json<ErrorResponse>)> {
    let ticket = state.ledger().get(&id).map_err(|e| {
        warn!("Failed to load ticket {}: {}", id, e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let Some(ticket) = ticket else {
        let rejection = state.ledger().get_rejection(&id).map_err(|e| {
            warn!("Failed to load rejection for {}: {}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
        return Ok(match rejection {
            Some(rejection) => (
                StatusCode::OK,
                Json(TicketDetailsResponse::rejected(rejection)),
            ),
            None => (
                StatusCode::NOT_FOUND,
                Json(TicketDetailsResponse::pending(id)),
            ),
        });
    };

    let event = match state.events().get_event(&ticket.event_id) {
        Ok(Some(event)) => event,
        Ok(None) => {
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Event details not found",
            ));
        }
        Err(e) => {
            return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let sold = state.capacity().sold_quantity(&event.id).map_err(|e| {
        warn!("Failed to read sold quantity for {}: {}", event.id, e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok((
        StatusCode::OK,
        Json(TicketDetailsResponse::admitted(
            TicketResponse::from(ticket),
            EventResponse::new(event, sold),
        )),
    ))
}
