//! Event API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use turnstile_core::{CreateEventRequest, Event, StoreError, UpdateEventRequest};

use super::error_response;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating an event
#[derive(Debug, Deserialize)]
pub struct CreateEventBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Number of tickets that can be reserved
    pub capacity: u32,
    /// Organizer; defaults to "anonymous"
    pub owner: Option<String>,
}

/// Request body for replacing an event's details
#[derive(Debug, Deserialize)]
pub struct UpdateEventBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capacity: u32,
}

/// Event with its current sales
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub capacity: u32,
    pub owner: String,
    pub created_at: String,
    pub sold: u32,
    pub remaining: u32,
}

impl EventResponse {
    pub fn new(event: Event, sold: u32) -> Self {
        Self {
            remaining: event.capacity.saturating_sub(sold),
            id: event.id,
            name: event.name,
            description: event.description,
            capacity: event.capacity,
            owner: event.owner,
            created_at: event.created_at.to_rfc3339(),
            sold,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a new event
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateEventBody>,
) -> Result<(StatusCode, Json<EventResponse>), impl IntoResponse> {
    if body.name.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "Event name is required"));
    }

    let request = CreateEventRequest {
        name: body.name,
        description: body.description,
        capacity: body.capacity,
        owner: body.owner.unwrap_or_else(|| "anonymous".to_string()),
    };

    match state.events().create_event(request) {
        Ok(event) => {
            info!(event_id = %event.id, capacity = event.capacity, "Event created");
            Ok((StatusCode::CREATED, Json(EventResponse::new(event, 0))))
        }
        Err(e) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Get an event by ID
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EventResponse>, impl IntoResponse> {
    let event = match state.events().get_event(&id) {
        Ok(Some(event)) => event,
        Ok(None) => {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                format!("Event not found: {}", id),
            ));
        }
        Err(e) => return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };

    match state.capacity().sold_quantity(&id) {
        Ok(sold) => Ok(Json(EventResponse::new(event, sold))),
        Err(e) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Replace an event's name, description and capacity
pub async fn update_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateEventBody>,
) -> Result<Json<EventResponse>, impl IntoResponse> {
    if body.name.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "Event name is required"));
    }

    let request = UpdateEventRequest {
        name: body.name,
        description: body.description,
        capacity: body.capacity,
    };

    let event = match state.events().update_event(&id, request) {
        Ok(event) => event,
        Err(StoreError::EventNotFound(_)) => {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                format!("Event not found: {}", id),
            ));
        }
        Err(e @ StoreError::CapacityBelowSold { .. }) => {
            warn!("Refusing to update event {}: {}", id, e);
            return Err(error_response(StatusCode::CONFLICT, e.to_string()));
        }
        Err(e) => return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };
    info!(event_id = %event.id, capacity = event.capacity, "Event updated");

    match state.capacity().sold_quantity(&id) {
        Ok(sold) => Ok(Json(EventResponse::new(event, sold))),
        Err(e) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Delete an event that has no tickets
pub async fn delete_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EventResponse>, impl IntoResponse> {
    match state.events().delete_event(&id) {
        Ok(event) => {
            info!(event_id = %event.id, "Event deleted");
            Ok(Json(EventResponse::new(event, 0)))
        }
        Err(StoreError::EventNotFound(_)) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Event not found: {}", id),
        )),
        Err(e @ StoreError::EventInUse { .. }) => {
            warn!("Refusing to delete event {}: {}", id, e);
            Err(error_response(StatusCode::CONFLICT, e.to_string()))
        }
        Err(e) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
