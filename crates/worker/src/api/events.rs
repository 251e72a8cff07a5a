//! Per-event lifecycle endpoints.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};

use sh_domain::Error;

use crate::state::AppState;

/// POST /events/:id/sessions — provision the three durable session
/// rows and flip the agent to testing.
pub async fn create_sessions(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .create_agent_sessions_for_event(&event_id)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => super::error_response(e),
    }
}

/// POST /events/:id/start
pub async fn start(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> impl IntoResponse {
    match agent_id_for(&state, &event_id).await {
        Ok(agent_id) => match state.orchestrator.start_event(&event_id, &agent_id).await {
            Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
            Err(e) => super::error_response(e),
        },
        Err(e) => super::error_response(e),
    }
}

/// POST /events/:id/pause
pub async fn pause(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.pause_event(&event_id).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => super::error_response(e),
    }
}

/// POST /events/:id/resume
pub async fn resume(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> impl IntoResponse {
    match agent_id_for(&state, &event_id).await {
        Ok(agent_id) => match state.orchestrator.resume_event(&event_id, &agent_id).await {
            Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
            Err(e) => super::error_response(e),
        },
        Err(e) => super::error_response(e),
    }
}

/// POST /events/:id/stop
pub async fn stop(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.stop_event(&event_id).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => super::error_response(e),
    }
}

/// GET /events/:id/status — per-agent session snapshots; each slot is
/// null when the runtime (or that session) is absent.
pub async fn status(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.event_status(&event_id) {
        Some(status) => Json(status).into_response(),
        None => Json(serde_json::json!({
            "runtime": serde_json::Value::Null,
            "transcript": serde_json::Value::Null,
            "cards": serde_json::Value::Null,
            "facts": serde_json::Value::Null,
        }))
        .into_response(),
    }
}

async fn agent_id_for(state: &AppState, event_id: &str) -> sh_domain::Result<String> {
    state
        .orchestrator
        .deps()
        .store
        .get_agent_for_event(event_id)
        .await?
        .map(|agent| agent.id)
        .ok_or_else(|| Error::NotFound(format!("no agent for event {event_id}")))
}
