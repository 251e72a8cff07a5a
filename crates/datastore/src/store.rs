//! The `EventStore` trait defines the durable-store surface the worker
//! relies on (agents, sessions, transcripts, facts, cards, glossary,
//! outputs, checkpoints, vector search, change feed).

use async_trait::async_trait;
use tokio::sync::mpsc;

use sh_domain::{
    Agent, AgentSession, AgentStage, AgentStatus, AgentType, Card, Fact, GlossaryEntry, Result,
    SessionStatus, TranscriptChunk,
};

use crate::types::{AgentOutputRow, ContextHit, SessionHistoryRow, TranscriptInsert};

/// Abstraction over the platform data service.
///
/// All write paths tolerate concurrent writers: implementations upsert by
/// natural key (`(event_id, seq)` for transcripts, `(event_id, fact_key)`
/// for facts) and treat duplicate inserts as no-ops.
#[async_trait]
pub trait EventStore: Send + Sync {
    // ── agents ───────────────────────────────────────────────────────

    async fn get_agent_for_event(&self, event_id: &str) -> Result<Option<Agent>>;

    /// Update agent status and (optionally) stage.
    async fn update_agent(
        &self,
        agent_id: &str,
        status: AgentStatus,
        stage: Option<AgentStage>,
    ) -> Result<()>;

    /// Record a fatal error on the agent row.
    async fn set_agent_error(&self, agent_id: &str, message: &str) -> Result<()>;

    /// Agents whose durable status is `running`, for crash recovery.
    async fn list_running_agents(&self, limit: usize) -> Result<Vec<Agent>>;

    /// Agents at the given stage, for the startup poller.
    async fn list_agents_at_stage(&self, stage: AgentStage, limit: usize) -> Result<Vec<Agent>>;

    // ── sessions ─────────────────────────────────────────────────────

    /// Insert-or-replace keyed on `(event_id, agent_type)`.
    async fn upsert_session(&self, session: AgentSession) -> Result<()>;

    async fn get_session(
        &self,
        event_id: &str,
        agent_type: AgentType,
    ) -> Result<Option<AgentSession>>;

    async fn get_sessions(&self, event_id: &str) -> Result<Vec<AgentSession>>;

    /// Delete all session rows for an agent; returns how many went away.
    async fn delete_sessions(&self, agent_id: &str) -> Result<u64>;

    /// Narrow status update used by the lifecycle chokepoint. Returns the
    /// updated row, or `None` when no row exists.
    async fn update_session_status(
        &self,
        event_id: &str,
        agent_type: AgentType,
        status: SessionStatus,
        provider_session_id: Option<String>,
        increment_connections: bool,
    ) -> Result<Option<AgentSession>>;

    async fn log_session_event(&self, row: SessionHistoryRow) -> Result<()>;

    // ── transcripts ──────────────────────────────────────────────────

    /// Append one transcript row. Returns the row id, or `None` when a
    /// row with the same `(event_id, seq)` already exists.
    async fn insert_transcript(
        &self,
        event_id: &str,
        chunk: &TranscriptChunk,
    ) -> Result<Option<String>>;

    /// Ascending by seq, `seq > after_seq`, at most `limit` rows.
    async fn list_transcripts_after(
        &self,
        event_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<TranscriptChunk>>;

    /// Subscribe to the transcript-insert change feed.
    async fn subscribe_transcripts(&self) -> Result<mpsc::Receiver<TranscriptInsert>>;

    // ── facts ────────────────────────────────────────────────────────

    async fn upsert_fact(&self, event_id: &str, fact: &Fact) -> Result<()>;

    /// Bulk eviction reconciliation.
    async fn mark_facts_inactive(&self, event_id: &str, keys: &[String]) -> Result<()>;

    async fn list_active_facts(&self, event_id: &str) -> Result<Vec<Fact>>;

    // ── cards ────────────────────────────────────────────────────────

    /// Persist a card; idempotent per `(event_id, source_seq, concept_id)`.
    /// Returns the row id, or `None` when the card already exists.
    async fn insert_card(&self, event_id: &str, card: &Card) -> Result<Option<String>>;

    // ── glossary, outputs, search ────────────────────────────────────

    async fn list_glossary(&self, event_id: &str) -> Result<Vec<GlossaryEntry>>;

    async fn append_agent_output(&self, row: AgentOutputRow) -> Result<()>;

    async fn vector_search(
        &self,
        event_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ContextHit>>;

    // ── checkpoints ──────────────────────────────────────────────────

    async fn get_checkpoint(&self, event_id: &str, agent_type: AgentType) -> Result<Option<u64>>;

    /// Monotonic: implementations keep `max(stored, seq)`.
    async fn put_checkpoint(&self, event_id: &str, agent_type: AgentType, seq: u64) -> Result<()>;
}
