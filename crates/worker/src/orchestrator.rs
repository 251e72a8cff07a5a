//! The public facade: per-event start/stop/pause/resume, audio ingress,
//! the transcript change-feed subscription, and graceful shutdown.
//!
//! State table for `start_event` (idempotent):
//! - runtime absent → create + replay
//! - runtime running with all enabled sessions connected → no-op
//! - durable sessions paused → build missing drivers, resume, mark
//!   agent active/running
//! - durable sessions active and drivers present → mark running
//! - otherwise → full cold start: build drivers, upsert closed rows,
//!   connect, attach handlers, mark running

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use sh_domain::transcript::PendingTranscriptMeta;
use sh_domain::{
    Agent, AgentStage, AgentStatus, AgentType, Error, Result, RuntimeStatus, SessionStatus,
};
use sh_session::AudioAppend;

use crate::runtime::lifecycle::{SessionLifecycle, SessionOptions};
use crate::runtime::manager::RuntimeManager;
use crate::runtime::{Command, RuntimeDeps};

/// Window in which freshly created session rows may be test-started.
const TESTING_START_WINDOW_SECS: i64 = 60;

/// Body of `POST /sessions/transcript/audio`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TranscriptAudioBody {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub audio_base64: String,
    #[serde(default)]
    pub is_final: Option<bool>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub speaker: Option<String>,
}

pub struct Orchestrator {
    deps: RuntimeDeps,
    manager: RuntimeManager,
    lifecycle: SessionLifecycle,
    feed_cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(deps: RuntimeDeps, lifecycle: SessionLifecycle) -> Self {
        Self {
            manager: RuntimeManager::new(deps.clone()),
            lifecycle,
            deps,
            feed_cancel: CancellationToken::new(),
        }
    }

    pub fn manager(&self) -> &RuntimeManager {
        &self.manager
    }

    // ── initialization ───────────────────────────────────────────────

    /// Subscribe to the transcript change feed and resume every event
    /// whose durable agent is still `running`.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let mut feed = self.deps.store.subscribe_transcripts().await?;
        let orchestrator = self.clone();
        let cancel = self.feed_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    insert = feed.recv() => {
                        let Some(insert) = insert else { break };
                        orchestrator.route_feed_insert(insert.event_id, insert.chunk);
                    }
                }
            }
            tracing::info!("transcript feed subscription ended");
        });

        let resumed = self
            .manager
            .resume_existing_events(self.deps.config.polling.resume_limit)
            .await?;
        let count = resumed.len();
        for (handle, agent) in resumed {
            if let Err(e) = self.start_event(handle.event_id(), &agent.id).await {
                tracing::warn!(
                    event_id = %handle.event_id(),
                    error = %e,
                    "failed to start resumed event"
                );
            }
        }
        tracing::info!(resumed = count, "orchestrator initialized");
        Ok(())
    }

    fn route_feed_insert(&self, event_id: String, chunk: sh_domain::TranscriptChunk) {
        let Some(handle) = self.manager.get(&event_id) else {
            tracing::warn!(event_id = %event_id, "feed insert for unknown runtime, dropping");
            return;
        };
        if let Err(e) = handle.try_command(Command::HandleTranscript { chunk }) {
            tracing::warn!(event_id = %event_id, error = %e, "feed insert dropped");
        }
    }

    // ── audio ingress ────────────────────────────────────────────────

    /// Forward opaque audio to the event's transcript session. `Busy`
    /// when the runtime mailbox is saturated (callers must honor it).
    pub fn append_transcript_audio(&self, body: TranscriptAudioBody) -> Result<()> {
        let handle = self
            .manager
            .get(&body.event_id)
            .ok_or_else(|| Error::NotFound(format!("no runtime for event {}", body.event_id)))?;
        if handle.shared.driver(AgentType::Transcript).is_none() {
            return Err(Error::NotFound(format!(
                "no transcript session for event {}",
                body.event_id
            )));
        }

        let meta = PendingTranscriptMeta {
            speaker: body.speaker.clone(),
            encoding: body.encoding.clone(),
            sample_rate: body.sample_rate,
            duration_ms: body.duration_ms,
            seq: body.seq,
        };
        let append = AudioAppend {
            audio_base64: body.audio_base64,
            is_final: body.is_final.unwrap_or(false),
            sample_rate: body.sample_rate,
            encoding: body.encoding,
            duration_ms: body.duration_ms,
            speaker: body.speaker,
        };
        handle.try_command(Command::AppendAudio { append, meta })
    }

    // ── session provisioning ─────────────────────────────────────────

    /// Reset the durable session rows for an event and flip its agent
    /// into the testing stage. Idempotent: repeat calls delete and
    /// re-insert the three rows.
    pub async fn create_agent_sessions_for_event(&self, event_id: &str) -> Result<()> {
        let agent = self.require_agent(event_id).await?;
        if !matches!(agent.stage, AgentStage::ContextComplete | AgentStage::Testing) {
            return Err(Error::Validation(format!(
                "agent for event {event_id} is at stage {:?}, needs context_complete",
                agent.stage
            )));
        }

        let deleted = self.deps.store.delete_sessions(&agent.id).await?;
        let model_set = agent.model_set.as_deref();
        for agent_type in AgentType::ALL {
            let model = self.lifecycle.model_for(model_set, agent_type)?;
            let now = Utc::now();
            self.deps
                .store
                .upsert_session(sh_domain::AgentSession {
                    id: uuid::Uuid::new_v4().to_string(),
                    event_id: event_id.to_owned(),
                    agent_id: agent.id.clone(),
                    agent_type,
                    provider_session_id: None,
                    status: SessionStatus::Closed,
                    model,
                    connection_count: 0,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
        }

        self.deps
            .store
            .update_agent(&agent.id, AgentStatus::Active, Some(AgentStage::Testing))
            .await?;
        tracing::info!(
            event_id = %event_id,
            agent_id = %agent.id,
            deleted,
            "agent session rows provisioned, agent moved to testing"
        );
        Ok(())
    }

    /// Like `start_event`, but only when the durable session rows were
    /// created within the last 60 seconds; the agent stays in testing.
    pub async fn start_sessions_for_testing(&self, event_id: &str, agent_id: &str) -> Result<()> {
        let sessions = self.deps.store.get_sessions(event_id).await?;
        if sessions.is_empty() {
            return Err(Error::NotFound(format!(
                "no session rows for event {event_id}"
            )));
        }
        let now = Utc::now();
        let fresh = sessions
            .iter()
            .all(|s| (now - s.created_at).num_seconds() <= TESTING_START_WINDOW_SECS);
        if !fresh {
            return Err(Error::Validation(format!(
                "session rows for event {event_id} are older than {TESTING_START_WINDOW_SECS}s"
            )));
        }
        self.start_event(event_id, agent_id).await
    }

    // ── start / pause / resume / stop ────────────────────────────────

    pub async fn start_event(&self, event_id: &str, agent_id: &str) -> Result<()> {
        let handle = match self.manager.get(event_id) {
            Some(handle) => handle,
            None => {
                let handle = self.manager.create_runtime(event_id, agent_id).await?;
                self.manager.replay_transcripts(&handle).await?;
                handle
            }
        };
        let enabled = self.deps.config.features.enabled_agents();

        // Already running with every enabled session connected: no-op.
        if handle.status() == RuntimeStatus::Running {
            let sessions = handle.shared.session_statuses();
            let all_connected = enabled.iter().all(|t| {
                sessions
                    .get(t)
                    .map(|view| view.status == SessionStatus::Active)
                    .unwrap_or(false)
            });
            if all_connected {
                tracing::debug!(event_id = %event_id, "start_event no-op, already running");
                return Ok(());
            }
        }

        let agent = self.require_agent(event_id).await?;
        let options = SessionOptions {
            model_set_override: agent.model_set.clone(),
            api_key_override: None,
        };
        let db_sessions = self.deps.store.get_sessions(event_id).await?;
        // Durable rows lag the live drivers slightly (the chokepoint
        // writes from a spawned task), so consult both.
        let any_paused = db_sessions
            .iter()
            .any(|s| s.status == SessionStatus::Paused)
            || handle
                .shared
                .session_statuses()
                .values()
                .any(|view| view.status == SessionStatus::Paused);
        let all_active = !db_sessions.is_empty()
            && enabled.iter().all(|t| {
                db_sessions
                    .iter()
                    .any(|s| s.agent_type == *t && s.status == SessionStatus::Active)
            });
        let drivers_present = enabled
            .iter()
            .all(|t| handle.shared.driver(*t).is_some());

        if any_paused {
            self.lifecycle
                .create_realtime_sessions(&handle, &enabled, &options)
                .await?;
            self.lifecycle.attach_handlers(&handle);
            self.lifecycle.resume_sessions(&handle).await?;
            handle.command(Command::SetRunning).await?;
            self.update_agent_running(&agent).await?;
            tracing::info!(event_id = %event_id, "event resumed from paused sessions");
            return Ok(());
        }

        if all_active && drivers_present {
            handle.command(Command::SetRunning).await?;
            if agent.stage != AgentStage::Testing {
                self.update_agent_running(&agent).await?;
            }
            tracing::info!(event_id = %event_id, "event marked running over live sessions");
            return Ok(());
        }

        // Cold start.
        self.lifecycle
            .create_realtime_sessions(&handle, &enabled, &options)
            .await?;
        self.lifecycle
            .ensure_session_rows(event_id, &agent.id, &enabled, agent.model_set.as_deref())
            .await?;
        match self.lifecycle.connect_sessions(&handle, &enabled).await {
            Ok(ids) => {
                tracing::info!(
                    event_id = %event_id,
                    sessions = ids.len(),
                    "sessions connected"
                );
            }
            Err(e) => {
                let _ = handle.command(Command::SetError).await;
                if let Err(db_err) = self
                    .deps
                    .store
                    .set_agent_error(&agent.id, &e.to_string())
                    .await
                {
                    tracing::warn!(event_id = %event_id, error = %db_err, "agent error write failed");
                }
                self.deps.status_updater.push_status(&handle.shared).await;
                return Err(e);
            }
        }
        self.lifecycle.attach_handlers(&handle);
        handle.command(Command::SetRunning).await?;
        self.update_agent_running(&agent).await?;
        tracing::info!(event_id = %event_id, "event started");
        Ok(())
    }

    pub async fn pause_event(&self, event_id: &str) -> Result<()> {
        let handle = self
            .manager
            .get(event_id)
            .ok_or_else(|| Error::NotFound(format!("no runtime for event {event_id}")))?;
        self.lifecycle.pause_sessions(&handle);
        handle.command(Command::Pause).await?;
        self.deps
            .store
            .update_agent(handle.agent_id(), AgentStatus::Paused, None)
            .await?;
        self.deps.status_updater.push_status(&handle.shared).await;
        tracing::info!(event_id = %event_id, "event paused");
        Ok(())
    }

    /// Backward compatible: resume delegates to `start_event`.
    pub async fn resume_event(&self, event_id: &str, agent_id: &str) -> Result<()> {
        self.start_event(event_id, agent_id).await
    }

    pub async fn stop_event(&self, event_id: &str) -> Result<()> {
        let handle = self
            .manager
            .get(event_id)
            .ok_or_else(|| Error::NotFound(format!("no runtime for event {event_id}")))?;
        let agent_id = handle.agent_id().to_owned();
        self.lifecycle.close_sessions(&handle);
        self.manager.remove_runtime(event_id).await?;
        self.deps
            .store
            .update_agent(&agent_id, AgentStatus::Ended, None)
            .await?;
        tracing::info!(event_id = %event_id, "event stopped");
        Ok(())
    }

    // ── status & shutdown ────────────────────────────────────────────

    /// Per-agent session snapshots for the status endpoint; `None` when
    /// the runtime is absent.
    pub fn event_status(&self, event_id: &str) -> Option<serde_json::Value> {
        let handle = self.manager.get(event_id)?;
        let sessions = handle.shared.session_statuses();
        let snapshot = handle.shared.snapshot();
        let session_json = |agent_type: AgentType| match sessions.get(&agent_type) {
            Some(view) => serde_json::to_value(view).unwrap_or_default(),
            None => serde_json::Value::Null,
        };
        Some(serde_json::json!({
            "runtime": snapshot,
            "transcript": session_json(AgentType::Transcript),
            "cards": session_json(AgentType::Cards),
            "facts": session_json(AgentType::Facts),
        }))
    }

    /// Graceful shutdown: checkpoints, session close, feed unsubscribe.
    /// Durable agent status is left untouched so restart resumes.
    pub async fn shutdown(&self) {
        let handles = self.manager.all();
        let count = handles.len();
        for handle in handles {
            self.lifecycle.close_sessions(&handle);
            if let Err(e) = handle.close(true).await {
                tracing::warn!(
                    event_id = %handle.event_id(),
                    error = %e,
                    "runtime shutdown failed"
                );
            }
        }
        self.feed_cancel.cancel();
        tracing::info!(runtimes = count, "orchestrator shutdown complete");
    }

    // ── helpers ──────────────────────────────────────────────────────

    async fn require_agent(&self, event_id: &str) -> Result<Agent> {
        self.deps
            .store
            .get_agent_for_event(event_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no agent for event {event_id}")))
    }

    /// Move the agent to active/running, preserving a sticky testing
    /// stage.
    async fn update_agent_running(&self, agent: &Agent) -> Result<()> {
        let stage = if agent.stage == AgentStage::Testing {
            None
        } else {
            Some(AgentStage::Running)
        };
        self.deps
            .store
            .update_agent(&agent.id, AgentStatus::Active, stage)
            .await
    }
}

/// Accessor used by the HTTP layer and pollers.
pub type SharedOrchestrator = Arc<Orchestrator>;

impl Orchestrator {
    pub fn deps(&self) -> &RuntimeDeps {
        &self.deps
    }
}
