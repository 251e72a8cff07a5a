//! Per-event runtime: one actor per live event.
//!
//! Exactly one task executes a runtime's mutations; everything else —
//! session drivers, the HTTP edge, pollers, the transcript change feed —
//! talks to it by enqueuing [`Command`]s on a bounded mailbox. Suspension
//! happens only inside command handlers and only for I/O; the stores
//! never suspend.

pub mod checkpoint;
pub mod lifecycle;
pub mod manager;
pub mod processor;
pub mod reorder;
pub mod status;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use sh_agents::PromptLibrary;
use sh_datastore::{EmbeddingClient, EventStore, PushBus};
use sh_domain::config::Config;
use sh_domain::transcript::PendingTranscriptMeta;
use sh_domain::{
    AgentType, Error, Result, RuntimeStatus, SessionStatus, TranscriptChunk,
};
use sh_session::{AudioAppend, SessionDriver};

use crate::stores::{
    CardsStore, FactsStats, FactsStore, GlossaryCache, PendingCardConcepts, RingBuffer, RingStats,
};
use checkpoint::CheckpointStore;
use reorder::ReorderBuffer;
use status::StatusUpdater;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a runtime can be asked to do. Inbound session events and
/// audio use `try_send` (mailbox-full is backpressure); control commands
/// use `send` and wait for space.
pub enum Command {
    /// Opaque audio from the control plane, forwarded to the transcript
    /// session.
    AppendAudio {
        append: AudioAppend,
        meta: PendingTranscriptMeta,
    },
    /// A durable transcript row (change feed or direct ingestion).
    HandleTranscript { chunk: TranscriptChunk },
    /// Transcript text straight from the provider session.
    ProviderTranscript {
        text: String,
        speaker: Option<String>,
        at_ms: Option<i64>,
        is_final: bool,
    },
    /// `produce_card` invocation from the cards session.
    HandleCardResponse {
        call_id: String,
        args: serde_json::Value,
    },
    /// Final text from the facts session.
    HandleFactsResponse { text: String },
    /// `retrieve` / `embed` tool call from any session.
    ToolCall {
        agent_type: AgentType,
        call_id: String,
        name: String,
        args: serde_json::Value,
    },
    /// `response.done` observed on an agent's session.
    ResponseCompleted { agent_type: AgentType },
    /// Session status transition (bookkeeping only; durable updates
    /// happen in the lifecycle chokepoint).
    SessionStatusChange {
        agent_type: AgentType,
        status: SessionStatus,
    },
    Pause,
    Resume,
    /// Mark the runtime running (sessions are up, timers live).
    SetRunning,
    /// Sticky error status after a fatal session failure; the runtime
    /// stays in the map for inspection.
    SetError,
    /// Replay durable transcripts above the checkpoints into the ring.
    Replay { ack: oneshot::Sender<Result<u64>> },
    /// Persist the three checkpoints now.
    Checkpoint,
    /// Stop the actor (explicit stop).
    Close { ack: Option<oneshot::Sender<()>> },
    /// Stop the actor (process shutdown).
    Shutdown { ack: Option<oneshot::Sender<()>> },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared services & cross-task view
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide services handed to every runtime.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub config: Arc<Config>,
    pub store: Arc<dyn EventStore>,
    pub push: Arc<dyn PushBus>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub prompts: Arc<PromptLibrary>,
    pub checkpoints: Arc<CheckpointStore>,
    pub status_updater: Arc<StatusUpdater>,
}

/// Cheap cross-task snapshot, refreshed by the actor after every
/// command.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuntimeSnapshot {
    pub status: RuntimeStatus,
    pub transcript_last_seq: u64,
    pub cards_last_seq: u64,
    pub facts_last_seq: u64,
    pub ring: RingStats,
    pub facts: FactsStats,
    pub cards_cached: usize,
    pub pending_concepts: usize,
}

/// State readable (and, for drivers, callable) from outside the actor.
/// Drivers are internally synchronized, so lifecycle operations run on
/// the caller's task; all other runtime state stays actor-owned.
pub struct RuntimeShared {
    pub event_id: String,
    pub agent_id: String,
    drivers: Mutex<HashMap<AgentType, SessionDriver>>,
    /// Session id marker at handler-attach time (idempotent re-attach).
    attached: Mutex<HashMap<AgentType, String>>,
    snapshot: Mutex<RuntimeSnapshot>,
}

impl RuntimeShared {
    fn new(event_id: &str, agent_id: &str) -> Self {
        Self {
            event_id: event_id.to_owned(),
            agent_id: agent_id.to_owned(),
            drivers: Mutex::new(HashMap::new()),
            attached: Mutex::new(HashMap::new()),
            snapshot: Mutex::new(RuntimeSnapshot {
                status: RuntimeStatus::ContextComplete,
                transcript_last_seq: 0,
                cards_last_seq: 0,
                facts_last_seq: 0,
                ring: RingStats { finalized: 0, total: 0 },
                facts: FactsStats { total: 0, dormant: 0 },
                cards_cached: 0,
                pending_concepts: 0,
            }),
        }
    }

    pub fn driver(&self, agent_type: AgentType) -> Option<SessionDriver> {
        self.drivers.lock().get(&agent_type).cloned()
    }

    pub fn set_driver(&self, agent_type: AgentType, driver: SessionDriver) {
        self.drivers.lock().insert(agent_type, driver);
    }

    pub fn clear_driver(&self, agent_type: AgentType) {
        self.drivers.lock().remove(&agent_type);
        self.attached.lock().remove(&agent_type);
    }

    pub fn drivers(&self) -> HashMap<AgentType, SessionDriver> {
        self.drivers.lock().clone()
    }

    /// Record the session id a handler was attached under. Returns
    /// `false` when that session is already attached (skip re-attach).
    pub fn mark_attached(&self, agent_type: AgentType, session_marker: &str) -> bool {
        let mut attached = self.attached.lock();
        if attached.get(&agent_type).map(String::as_str) == Some(session_marker) {
            return false;
        }
        attached.insert(agent_type, session_marker.to_owned());
        true
    }

    pub fn status(&self) -> RuntimeStatus {
        self.snapshot.lock().status
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        self.snapshot.lock().clone()
    }

    fn store_snapshot(&self, snapshot: RuntimeSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    /// Per-agent session view for the status endpoint and push bus.
    pub fn session_statuses(&self) -> HashMap<AgentType, SessionView> {
        self.drivers
            .lock()
            .iter()
            .map(|(t, d)| {
                (
                    *t,
                    SessionView {
                        status: d.status(),
                        session_id: d.session_id(),
                        dropped_events: d.dropped_events(),
                    },
                )
            })
            .collect()
    }
}

/// Snapshot of one session driver, as exposed on the status surfaces.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionView {
    pub status: SessionStatus,
    pub session_id: Option<String>,
    pub dropped_events: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The outside world's grip on a runtime actor.
#[derive(Clone)]
pub struct RuntimeHandle {
    pub shared: Arc<RuntimeShared>,
    tx: mpsc::Sender<Command>,
}

impl RuntimeHandle {
    pub fn event_id(&self) -> &str {
        &self.shared.event_id
    }

    pub fn agent_id(&self) -> &str {
        &self.shared.agent_id
    }

    pub fn status(&self) -> RuntimeStatus {
        self.shared.status()
    }

    /// Non-blocking enqueue. `Err(Busy)` when the mailbox is saturated —
    /// callers on the ingest path must surface this as backpressure.
    pub fn try_command(&self, command: Command) -> Result<()> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::Busy(format!("runtime mailbox full for {}", self.shared.event_id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::NotFound(format!("runtime for {} has stopped", self.shared.event_id))
            }
        })
    }

    /// Blocking enqueue for control-plane commands.
    pub async fn command(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| {
            Error::NotFound(format!("runtime for {} has stopped", self.shared.event_id))
        })
    }

    /// Replay durable transcripts; resolves with the max seq seen.
    pub async fn replay(&self) -> Result<u64> {
        let (ack, rx) = oneshot::channel();
        self.command(Command::Replay { ack }).await?;
        rx.await
            .map_err(|_| Error::Fatal("runtime dropped replay ack".into()))?
    }

    /// Stop the actor and wait for it to drain.
    pub async fn close(&self, shutdown: bool) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        let command = if shutdown {
            Command::Shutdown { ack: Some(ack) }
        } else {
            Command::Close { ack: Some(ack) }
        };
        self.command(command).await?;
        let _ = rx.await;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actor state & loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventRuntime {
    pub(crate) deps: RuntimeDeps,
    pub(crate) shared: Arc<RuntimeShared>,
    pub(crate) enabled_agents: Vec<AgentType>,
    pub(crate) status: RuntimeStatus,

    pub(crate) ring: RingBuffer,
    pub(crate) facts: FactsStore,
    pub(crate) cards: CardsStore,
    pub(crate) glossary: GlossaryCache,
    pub(crate) pending_concepts: PendingCardConcepts,
    pub(crate) reorder: ReorderBuffer,

    pub(crate) transcript_last_seq: u64,
    pub(crate) cards_last_seq: u64,
    pub(crate) facts_last_seq: u64,

    pub(crate) pending_transcript: Option<PendingTranscriptMeta>,
    pub(crate) interim_text: String,
    /// Source seq of the open cards turn; the first `produce_card`
    /// consumes it, further invocations in the same turn are discarded.
    pub(crate) cards_turn_gate: Option<u64>,
    pub(crate) facts_inflight: bool,
    pub(crate) facts_request_seq: u64,

    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl EventRuntime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        deps: RuntimeDeps,
        event_id: &str,
        agent_id: &str,
        enabled_agents: Vec<AgentType>,
        glossary: GlossaryCache,
        facts: FactsStore,
        cards_last_seq: u64,
        facts_last_seq: u64,
        transcript_last_seq: u64,
    ) -> Self {
        let runtime_cfg = &deps.config.runtime;
        let shared = Arc::new(RuntimeShared::new(event_id, agent_id));
        let now = Utc::now();
        let mut runtime = Self {
            ring: RingBuffer::new(runtime_cfg.ring_max_items, runtime_cfg.ring_max_age_ms),
            reorder: ReorderBuffer::new(runtime_cfg.reorder_window, runtime_cfg.reorder_ms),
            cards: CardsStore::new(deps.config.cards.recent_limit.max(8)),
            pending_concepts: PendingCardConcepts::new(),
            deps,
            shared,
            enabled_agents,
            status: RuntimeStatus::ContextComplete,
            facts,
            glossary,
            transcript_last_seq,
            cards_last_seq,
            facts_last_seq,
            pending_transcript: None,
            interim_text: String::new(),
            cards_turn_gate: None,
            facts_inflight: false,
            facts_request_seq: 0,
            created_at: now,
            updated_at: now,
        };
        runtime.refresh_snapshot();
        runtime
    }

    pub(crate) fn refresh_snapshot(&mut self) {
        self.updated_at = Utc::now();
        self.shared.store_snapshot(RuntimeSnapshot {
            status: self.status,
            transcript_last_seq: self.transcript_last_seq,
            cards_last_seq: self.cards_last_seq,
            facts_last_seq: self.facts_last_seq,
            ring: self.ring.get_stats(),
            facts: self.facts.get_stats(),
            cards_cached: self.cards.len(),
            pending_concepts: self.pending_concepts.len(),
        });
    }

    pub(crate) fn set_status(&mut self, status: RuntimeStatus) {
        if self.status != status {
            tracing::info!(
                event_id = %self.shared.event_id,
                from = ?self.status,
                to = ?status,
                "runtime status change"
            );
            self.status = status;
        }
    }

    fn log_summary(&self, reason: &str) {
        let ring = self.ring.get_stats();
        let facts = self.facts.get_stats();
        let now = Utc::now();
        tracing::info!(
            event_id = %self.shared.event_id,
            reason,
            transcript_last_seq = self.transcript_last_seq,
            cards_last_seq = self.cards_last_seq,
            facts_last_seq = self.facts_last_seq,
            ring_finalized = ring.finalized,
            ring_total = ring.total,
            facts_total = facts.total,
            facts_dormant = facts.dormant,
            cards_cached = self.cards.len(),
            interim_pending = !self.interim_text.is_empty(),
            uptime_secs = (now - self.created_at).num_seconds(),
            idle_secs = (now - self.updated_at).num_seconds(),
            "runtime context summary"
        );
    }

    async fn save_checkpoints(&self) {
        let checkpoints = &self.deps.checkpoints;
        let event_id = &self.shared.event_id;
        for (agent_type, seq) in [
            (AgentType::Transcript, self.transcript_last_seq),
            (AgentType::Cards, self.cards_last_seq),
            (AgentType::Facts, self.facts_last_seq),
        ] {
            if let Err(e) = checkpoints.save(event_id, agent_type, seq).await {
                tracing::warn!(
                    event_id = %event_id,
                    agent_type = %agent_type,
                    error = %e,
                    "checkpoint save failed"
                );
            }
        }
    }
}

/// Spawn the actor and return its handle.
pub fn spawn(runtime: EventRuntime) -> RuntimeHandle {
    let capacity = runtime.deps.config.runtime.mailbox_capacity;
    let (tx, rx) = mpsc::channel(capacity);
    let shared = runtime.shared.clone();
    tokio::spawn(actor_loop(runtime, rx));
    RuntimeHandle { shared, tx }
}

async fn actor_loop(mut runtime: EventRuntime, mut rx: mpsc::Receiver<Command>) {
    let config = runtime.deps.config.clone();
    let mut housekeeping = tokio::time::interval(std::time::Duration::from_millis(
        config.runtime.reorder_ms.clamp(50, 1_000),
    ));
    housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut summary = tokio::time::interval(std::time::Duration::from_secs(
        config.runtime.summary_interval_secs.max(1),
    ));
    summary.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut status_push = tokio::time::interval(std::time::Duration::from_secs(
        config.runtime.status_interval_secs.max(1),
    ));
    status_push.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut checkpoint_tick = tokio::time::interval(std::time::Duration::from_secs(
        config.runtime.checkpoint_interval_secs.max(1),
    ));
    checkpoint_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                let stop = handle_command(&mut runtime, command).await;
                runtime.refresh_snapshot();
                if stop {
                    break;
                }
            }
            _ = housekeeping.tick() => {
                runtime.housekeeping_tick().await;
                runtime.refresh_snapshot();
            }
            _ = summary.tick() => {
                if runtime.status == RuntimeStatus::Running {
                    runtime.log_summary("periodic");
                }
            }
            _ = status_push.tick() => {
                if runtime.status == RuntimeStatus::Running {
                    runtime
                        .deps
                        .status_updater
                        .push_status(&runtime.shared)
                        .await;
                }
            }
            _ = checkpoint_tick.tick() => {
                if runtime.status == RuntimeStatus::Running {
                    runtime.save_checkpoints().await;
                }
            }
        }
    }

    tracing::info!(event_id = %runtime.shared.event_id, "runtime actor stopped");
}

/// Returns `true` when the actor should stop.
async fn handle_command(runtime: &mut EventRuntime, command: Command) -> bool {
    match command {
        Command::AppendAudio { append, meta } => {
            runtime.handle_append_audio(append, meta);
        }
        Command::HandleTranscript { chunk } => {
            runtime.handle_transcript(chunk).await;
        }
        Command::ProviderTranscript {
            text,
            speaker,
            at_ms,
            is_final,
        } => {
            runtime
                .handle_provider_transcript(text, speaker, at_ms, is_final)
                .await;
        }
        Command::HandleCardResponse { call_id, args } => {
            runtime.handle_card_response(&call_id, args).await;
        }
        Command::HandleFactsResponse { text } => {
            runtime.handle_facts_response(&text).await;
        }
        Command::ToolCall {
            agent_type,
            call_id,
            name,
            args,
        } => {
            runtime.handle_tool_call(agent_type, &call_id, &name, args).await;
        }
        Command::ResponseCompleted { agent_type } => {
            runtime.handle_response_completed(agent_type);
        }
        Command::SessionStatusChange { agent_type, status } => {
            tracing::debug!(
                event_id = %runtime.shared.event_id,
                agent_type = %agent_type,
                status = %status,
                "session status observed by runtime"
            );
        }
        Command::Pause => {
            runtime.set_status(RuntimeStatus::Paused);
            runtime.save_checkpoints().await;
        }
        Command::Resume | Command::SetRunning => {
            runtime.set_status(RuntimeStatus::Running);
        }
        Command::SetError => {
            runtime.set_status(RuntimeStatus::Error);
        }
        Command::Replay { ack } => {
            let result = runtime.replay_transcripts().await;
            let _ = ack.send(result);
        }
        Command::Checkpoint => {
            runtime.save_checkpoints().await;
        }
        Command::Close { ack } => {
            runtime.finish("close").await;
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
            return true;
        }
        Command::Shutdown { ack } => {
            runtime.finish("shutdown").await;
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
            return true;
        }
    }
    false
}

impl EventRuntime {
    async fn housekeeping_tick(&mut self) {
        // Release reorder holds that expired.
        let now_ms = Utc::now().timestamp_millis();
        let released = self.reorder.flush_due(now_ms);
        for chunk in released {
            tracing::debug!(
                event_id = %self.shared.event_id,
                seq = chunk.seq,
                "releasing chunk after reorder hold expiry"
            );
            self.process_transcript(chunk).await;
        }

        // Pending-concept TTL sweep (10 × freshness window).
        let ttl = self.deps.config.cards.freshness_ms.saturating_mul(10);
        let swept = self.pending_concepts.sweep(now_ms, ttl);
        if swept > 0 {
            tracing::debug!(
                event_id = %self.shared.event_id,
                swept,
                "swept stale pending card concepts"
            );
        }
    }

    async fn finish(&mut self, reason: &str) {
        // Nothing buffered may be stranded by a stop.
        let buffered = self.reorder.flush_all();
        for chunk in buffered {
            self.process_transcript(chunk).await;
        }
        self.log_summary(reason);
        self.save_checkpoints().await;
        self.set_status(RuntimeStatus::Ended);
        self.refresh_snapshot();
    }
}
