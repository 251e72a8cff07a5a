//! HTTP control plane.

pub mod events;
pub mod health;
pub mod sessions;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;

use sh_domain::Error;

use crate::state::AppState;

/// Build the control-plane router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions/transcript/audio", post(sessions::append_audio))
        .route("/events/:id/sessions", post(events::create_sessions))
        .route("/events/:id/start", post(events::start))
        .route("/events/:id/pause", post(events::pause))
        .route("/events/:id/resume", post(events::resume))
        .route("/events/:id/stop", post(events::stop))
        .route("/events/:id/status", get(events::status))
        .route("/healthz", get(health::healthz))
}

/// Map domain errors onto the control-plane status contract:
/// 400 validation, 404 not found, 409 backpressure, 500 the rest.
pub fn error_response(error: Error) -> axum::response::Response {
    let status = match &error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Busy(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %error, "control plane internal error");
    }
    (
        status,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}
