pub mod events;
pub mod handlers;
pub mod middleware;
pub mod queue;
pub mod routes;
pub mod tickets;

pub use routes::create_router;

use axum::{http::StatusCode, Json};
use serde::Serialize;

/// Error response body shared by all handlers
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) fn error_response(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}
