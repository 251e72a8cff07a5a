//! Agent, session, and runtime status machines.
//!
//! All of these are tagged enums rather than strings so that invalid
//! transitions are unrepresentable at the type level; the datastore edge
//! converts to/from their wire spellings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The three model roles driven per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Transcript,
    Cards,
    Facts,
}

impl AgentType {
    pub const ALL: [AgentType; 3] = [AgentType::Transcript, AgentType::Cards, AgentType::Facts];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Transcript => "transcript",
            AgentType::Cards => "cards",
            AgentType::Facts => "facts",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "transcript" => Ok(AgentType::Transcript),
            "cards" => Ok(AgentType::Cards),
            "facts" => Ok(AgentType::Facts),
            other => Err(Error::Validation(format!("unknown agent type: {other}"))),
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent status & stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Active,
    Paused,
    Ended,
    Error,
}

/// The upstream context-generation pipeline drives an agent through the
/// build stages; the runtime joins at `ContextComplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStage {
    Blueprint,
    Researching,
    BuildingGlossary,
    BuildingChunks,
    ContextComplete,
    Running,
    Testing,
}

/// The per-event orchestration record. Created externally; the worker
/// only transitions `status`/`stage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub event_id: String,
    pub status: AgentStatus,
    pub stage: AgentStage,
    /// Provider label selecting the concrete model per agent type.
    #[serde(default)]
    pub model_set: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last error message, set when `status == Error`.
    #[serde(default)]
    pub last_error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session status machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// SessionDriver states. `Error` is reachable from any non-terminal
/// state; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Connecting,
    Active,
    Paused,
    Closing,
    Closed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Closing => "closing",
            SessionStatus::Closed => "closed",
            SessionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-(event, agent type) session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub event_id: String,
    pub agent_id: String,
    pub agent_type: AgentType,
    /// Provider-assigned id; changes across reconnects.
    #[serde(default)]
    pub provider_session_id: Option<String>,
    pub status: SessionStatus,
    /// Model name resolved from the agent's model set.
    pub model: String,
    #[serde(default)]
    pub connection_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// History row event types logged by the session-status chokepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEventType {
    Connected,
    Resumed,
    Paused,
    Disconnected,
    Closed,
    Error,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory EventRuntime lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    ContextComplete,
    Ready,
    Running,
    Paused,
    Ended,
    Error,
}
