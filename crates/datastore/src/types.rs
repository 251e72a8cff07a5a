use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sh_domain::{AgentType, SessionEventType, TranscriptChunk};

/// One hit from vector similarity search over the event's chunk corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextHit {
    pub id: String,
    pub chunk: String,
    pub similarity: f64,
}

/// Append-log row recording one normalised agent output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutputRow {
    pub event_id: String,
    pub agent_type: AgentType,
    /// `card` / `fact` / `transcript`.
    pub output_kind: String,
    pub payload: serde_json::Value,
    pub source_seq: u64,
    pub created_at: DateTime<Utc>,
}

/// Session history row logged by the status chokepoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistoryRow {
    pub event_id: String,
    pub agent_id: String,
    pub agent_type: AgentType,
    pub event_type: SessionEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Change-feed notification for a newly inserted transcript row.
#[derive(Debug, Clone)]
pub struct TranscriptInsert {
    pub event_id: String,
    pub chunk: TranscriptChunk,
}
