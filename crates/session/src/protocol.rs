//! Wire protocol for the provider's realtime session API.
//!
//! Client events flow worker → provider, server events provider → worker.
//! Both sides are JSON text frames with a `type` tag. Unknown inbound
//! event types are ignored by the driver (logged at debug).

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client events (worker → provider)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session configuration sent immediately after the socket opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSetup {
    pub model: String,
    /// Opaque policy prompt for this agent type + version.
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

/// A tool exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Configure (or reconfigure) the session.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSetup },

    /// Ask the model for a response to the given turn input.
    #[serde(rename = "response.create")]
    ResponseCreate { input: String },

    /// Cancel the in-flight response.
    #[serde(rename = "response.cancel")]
    ResponseCancel,

    /// Opaque audio for transcription (transcript sessions only).
    #[serde(rename = "input_audio.append")]
    InputAudioAppend {
        audio: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        encoding: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        speaker: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },

    /// Mark the current audio turn as final.
    #[serde(rename = "input_audio.commit")]
    InputAudioCommit,

    /// Result of a tool call the model issued.
    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        output: serde_json::Value,
    },

    /// Heartbeat.
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server events (provider → worker)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session_id: String },

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "response.text.delta")]
    ResponseTextDelta { delta: String },

    #[serde(rename = "response.text.done")]
    ResponseTextDone { text: String },

    /// Marks the send queue ready for the next response-expecting send.
    #[serde(rename = "response.done")]
    ResponseDone,

    /// Function invocation from the model.
    #[serde(rename = "tool_call")]
    ToolCall {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },

    #[serde(rename = "transcription.delta")]
    TranscriptionDelta {
        delta: String,
        #[serde(default)]
        speaker: Option<String>,
    },

    #[serde(rename = "transcription.completed")]
    TranscriptionCompleted {
        text: String,
        #[serde(default)]
        speaker: Option<String>,
        #[serde(default)]
        at_ms: Option<i64>,
    },

    #[serde(rename = "pong")]
    Pong { timestamp: i64 },

    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
}
