//! Queue inspection handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use super::error_response;
use crate::state::AppState;

/// Response for the queue length endpoint
#[derive(Debug, Serialize)]
pub struct QueueLengthResponse {
    pub event_id: String,
    pub queue_length: u64,
}

/// Number of booking requests for an event that are queued or being processed
pub async fn queue_length(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<QueueLengthResponse>, impl IntoResponse> {
    match state.channel().pending_count(&event_id).await {
        Ok(queue_length) => Ok(Json(QueueLengthResponse {
            event_id,
            queue_length,
        })),
        Err(e) => {
            warn!("Failed to read queue length for {}: {}", event_id, e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not fetch queue length",
            ))
        }
    }
}
