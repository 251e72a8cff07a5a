//! In-process [`EventStore`] used by tests and `backend = "memory"` dev
//! deployments. Enforces the same natural keys as the platform service:
//! transcripts unique per `(event_id, seq)`, facts per `(event_id,
//! fact_key)`, glossary per `(event_id, lower(term))`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use sh_domain::{
    Agent, AgentSession, AgentStage, AgentStatus, AgentType, Card, Error, Fact, GlossaryEntry,
    Result, SessionStatus, TranscriptChunk,
};

use crate::store::EventStore;
use crate::types::{AgentOutputRow, ContextHit, SessionHistoryRow, TranscriptInsert};

#[derive(Default)]
struct Inner {
    agents: HashMap<String, Agent>,
    sessions: HashMap<(String, AgentType), AgentSession>,
    session_history: Vec<SessionHistoryRow>,
    /// event_id -> seq -> chunk.
    transcripts: HashMap<String, BTreeMap<u64, TranscriptChunk>>,
    /// event_id -> fact_key -> (fact, active).
    facts: HashMap<String, HashMap<String, (Fact, bool)>>,
    /// event_id -> (row id, card).
    cards: HashMap<String, Vec<(String, Card)>>,
    glossary: HashMap<String, Vec<GlossaryEntry>>,
    outputs: Vec<AgentOutputRow>,
    /// event_id -> (id, chunk text, embedding).
    context_items: HashMap<String, Vec<(String, String, Vec<f32>)>>,
    checkpoints: HashMap<(String, AgentType), u64>,
    subscribers: Vec<mpsc::Sender<TranscriptInsert>>,
}

/// Complete in-memory store. Cheap to clone handles around via `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── seeding & inspection (dev/test surface) ──────────────────────

    pub fn insert_agent(&self, agent: Agent) {
        self.inner.lock().agents.insert(agent.id.clone(), agent);
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        self.inner.lock().agents.get(agent_id).cloned()
    }

    pub fn seed_glossary(&self, event_id: &str, entries: Vec<GlossaryEntry>) {
        self.inner
            .lock()
            .glossary
            .insert(event_id.to_owned(), entries);
    }

    pub fn seed_context_item(&self, event_id: &str, id: &str, chunk: &str, embedding: Vec<f32>) {
        self.inner
            .lock()
            .context_items
            .entry(event_id.to_owned())
            .or_default()
            .push((id.to_owned(), chunk.to_owned(), embedding));
    }

    pub fn seed_transcript(&self, event_id: &str, chunk: TranscriptChunk) {
        self.inner
            .lock()
            .transcripts
            .entry(event_id.to_owned())
            .or_default()
            .insert(chunk.seq, chunk);
    }

    pub fn cards_for(&self, event_id: &str) -> Vec<Card> {
        self.inner
            .lock()
            .cards
            .get(event_id)
            .map(|rows| rows.iter().map(|(_, c)| c.clone()).collect())
            .unwrap_or_default()
    }

    pub fn history_rows(&self) -> Vec<SessionHistoryRow> {
        self.inner.lock().session_history.clone()
    }

    pub fn output_rows(&self) -> Vec<AgentOutputRow> {
        self.inner.lock().outputs.clone()
    }

    pub fn fact_row(&self, event_id: &str, key: &str) -> Option<(Fact, bool)> {
        self.inner
            .lock()
            .facts
            .get(event_id)
            .and_then(|m| m.get(key).cloned())
    }

    pub fn inactive_fact_keys(&self, event_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .facts
            .get(event_id)
            .map(|m| {
                let mut keys: Vec<String> = m
                    .iter()
                    .filter(|(_, (_, active))| !active)
                    .map(|(k, _)| k.clone())
                    .collect();
                keys.sort();
                keys
            })
            .unwrap_or_default()
    }

    pub fn transcript_count(&self, event_id: &str) -> usize {
        self.inner
            .lock()
            .transcripts
            .get(event_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    // ── agents ───────────────────────────────────────────────────────

    async fn get_agent_for_event(&self, event_id: &str) -> Result<Option<Agent>> {
        Ok(self
            .inner
            .lock()
            .agents
            .values()
            .find(|a| a.event_id == event_id)
            .cloned())
    }

    async fn update_agent(
        &self,
        agent_id: &str,
        status: AgentStatus,
        stage: Option<AgentStage>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let agent = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
        agent.status = status;
        if let Some(stage) = stage {
            agent.stage = stage;
        }
        agent.updated_at = Utc::now();
        Ok(())
    }

    async fn set_agent_error(&self, agent_id: &str, message: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let agent = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
        agent.status = AgentStatus::Error;
        agent.last_error = Some(message.to_owned());
        agent.updated_at = Utc::now();
        Ok(())
    }

    async fn list_running_agents(&self, limit: usize) -> Result<Vec<Agent>> {
        Ok(self
            .inner
            .lock()
            .agents
            .values()
            .filter(|a| a.stage == AgentStage::Running)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_agents_at_stage(&self, stage: AgentStage, limit: usize) -> Result<Vec<Agent>> {
        Ok(self
            .inner
            .lock()
            .agents
            .values()
            .filter(|a| a.stage == stage)
            .take(limit)
            .cloned()
            .collect())
    }

    // ── sessions ─────────────────────────────────────────────────────

    async fn upsert_session(&self, session: AgentSession) -> Result<()> {
        self.inner
            .lock()
            .sessions
            .insert((session.event_id.clone(), session.agent_type), session);
        Ok(())
    }

    async fn get_session(
        &self,
        event_id: &str,
        agent_type: AgentType,
    ) -> Result<Option<AgentSession>> {
        Ok(self
            .inner
            .lock()
            .sessions
            .get(&(event_id.to_owned(), agent_type))
            .cloned())
    }

    async fn get_sessions(&self, event_id: &str) -> Result<Vec<AgentSession>> {
        Ok(self
            .inner
            .lock()
            .sessions
            .values()
            .filter(|s| s.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn delete_sessions(&self, agent_id: &str) -> Result<u64> {
        let mut inner = self.inner.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.agent_id != agent_id);
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn update_session_status(
        &self,
        event_id: &str,
        agent_type: AgentType,
        status: SessionStatus,
        provider_session_id: Option<String>,
        increment_connections: bool,
    ) -> Result<Option<AgentSession>> {
        let mut inner = self.inner.lock();
        let Some(session) = inner
            .sessions
            .get_mut(&(event_id.to_owned(), agent_type))
        else {
            return Ok(None);
        };
        session.status = status;
        if provider_session_id.is_some() {
            session.provider_session_id = provider_session_id;
        }
        if increment_connections {
            session.connection_count += 1;
        }
        session.updated_at = Utc::now();
        Ok(Some(session.clone()))
    }

    async fn log_session_event(&self, row: SessionHistoryRow) -> Result<()> {
        self.inner.lock().session_history.push(row);
        Ok(())
    }

    // ── transcripts ──────────────────────────────────────────────────

    async fn insert_transcript(
        &self,
        event_id: &str,
        chunk: &TranscriptChunk,
    ) -> Result<Option<String>> {
        let insert = {
            let mut inner = self.inner.lock();
            let rows = inner.transcripts.entry(event_id.to_owned()).or_default();
            if rows.contains_key(&chunk.seq) {
                return Ok(None);
            }
            let id = uuid::Uuid::new_v4().to_string();
            let mut stored = chunk.clone();
            stored.transcript_id = Some(id.clone());
            rows.insert(chunk.seq, stored.clone());
            // Snapshot senders so the feed fan-out happens unlocked.
            let senders = inner.subscribers.clone();
            (id, stored, senders)
        };

        let (id, stored, senders) = insert;
        for tx in senders {
            let _ = tx
                .send(TranscriptInsert {
                    event_id: event_id.to_owned(),
                    chunk: stored.clone(),
                })
                .await;
        }
        Ok(Some(id))
    }

    async fn list_transcripts_after(
        &self,
        event_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<TranscriptChunk>> {
        Ok(self
            .inner
            .lock()
            .transcripts
            .get(event_id)
            .map(|rows| {
                rows.range(after_seq + 1..)
                    .take(limit)
                    .map(|(_, c)| c.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn subscribe_transcripts(&self) -> Result<mpsc::Receiver<TranscriptInsert>> {
        let (tx, rx) = mpsc::channel(256);
        self.inner.lock().subscribers.push(tx);
        Ok(rx)
    }

    // ── facts ────────────────────────────────────────────────────────

    async fn upsert_fact(&self, event_id: &str, fact: &Fact) -> Result<()> {
        self.inner
            .lock()
            .facts
            .entry(event_id.to_owned())
            .or_default()
            .insert(fact.key.clone(), (fact.clone(), true));
        Ok(())
    }

    async fn mark_facts_inactive(&self, event_id: &str, keys: &[String]) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(rows) = inner.facts.get_mut(event_id) {
            for key in keys {
                if let Some((_, active)) = rows.get_mut(key) {
                    *active = false;
                }
            }
        }
        Ok(())
    }

    async fn list_active_facts(&self, event_id: &str) -> Result<Vec<Fact>> {
        Ok(self
            .inner
            .lock()
            .facts
            .get(event_id)
            .map(|rows| {
                rows.values()
                    .filter(|(_, active)| *active)
                    .map(|(f, _)| f.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    // ── cards ────────────────────────────────────────────────────────

    async fn insert_card(&self, event_id: &str, card: &Card) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        let rows = inner.cards.entry(event_id.to_owned()).or_default();
        let duplicate = rows.iter().any(|(_, existing)| {
            existing.source_seq == card.source_seq && existing.concept_id == card.concept_id
        });
        if duplicate {
            return Ok(None);
        }
        let id = uuid::Uuid::new_v4().to_string();
        rows.push((id.clone(), card.clone()));
        Ok(Some(id))
    }

    // ── glossary, outputs, search ────────────────────────────────────

    async fn list_glossary(&self, event_id: &str) -> Result<Vec<GlossaryEntry>> {
        Ok(self
            .inner
            .lock()
            .glossary
            .get(event_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_agent_output(&self, row: AgentOutputRow) -> Result<()> {
        self.inner.lock().outputs.push(row);
        Ok(())
    }

    async fn vector_search(
        &self,
        event_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ContextHit>> {
        let inner = self.inner.lock();
        let Some(items) = inner.context_items.get(event_id) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<ContextHit> = items
            .iter()
            .map(|(id, chunk, item_embedding)| ContextHit {
                id: id.clone(),
                chunk: chunk.clone(),
                similarity: cosine(embedding, item_embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    // ── checkpoints ──────────────────────────────────────────────────

    async fn get_checkpoint(&self, event_id: &str, agent_type: AgentType) -> Result<Option<u64>> {
        Ok(self
            .inner
            .lock()
            .checkpoints
            .get(&(event_id.to_owned(), agent_type))
            .copied())
    }

    async fn put_checkpoint(&self, event_id: &str, agent_type: AgentType, seq: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = inner
            .checkpoints
            .entry((event_id.to_owned(), agent_type))
            .or_insert(0);
        *slot = (*slot).max(seq);
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
