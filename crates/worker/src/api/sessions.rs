//! Transcript audio ingress.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use sh_domain::Error;

use crate::orchestrator::TranscriptAudioBody;
use crate::state::AppState;

/// POST /sessions/transcript/audio
///
/// 200 accepted, 400 malformed body, 404 no runtime/session, 409 when
/// the runtime mailbox is saturated (callers must back off).
pub async fn append_audio(
    State(state): State<AppState>,
    Json(body): Json<TranscriptAudioBody>,
) -> impl IntoResponse {
    if body.event_id.trim().is_empty() {
        return super::error_response(Error::Validation("missing event_id".into()));
    }
    if body.audio_base64.is_empty() {
        return super::error_response(Error::Validation("missing audio_base64".into()));
    }

    match state.orchestrator.append_transcript_audio(body) {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => super::error_response(e),
    }
}
