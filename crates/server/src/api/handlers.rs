use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use turnstile_core::{Config, WorkerPoolStatus};

use super::error_response;
use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<Config> {
    Json(state.config().clone())
}

/// Worker pool status response
#[derive(Debug, Serialize)]
pub struct WorkerStatusResponse {
    /// Whether this process runs workers at all
    pub available: bool,
    #[serde(flatten)]
    pub status: WorkerPoolStatus,
}

/// Get worker pool status
pub async fn worker_status(State(state): State<Arc<AppState>>) -> Json<WorkerStatusResponse> {
    match state.workers() {
        Some(pool) => Json(WorkerStatusResponse {
            available: true,
            status: pool.status(),
        }),
        None => Json(WorkerStatusResponse {
            available: false,
            status: WorkerPoolStatus::default(),
        }),
    }
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    match encode_metrics() {
        Ok(body) => Ok((
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            ))
        }
    }
}
