//! Session lifecycle: builds the per-agent drivers, attaches their
//! event sinks, connects/pauses/resumes/closes them, and owns the
//! single chokepoint that reconciles driver status transitions with the
//! durable session rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;

use sh_agents::{agent_tool_specs, PRODUCE_CARD_TOOL};
use sh_datastore::{EventStore, SessionHistoryRow};
use sh_domain::config::ModelSet;
use sh_domain::{
    AgentSession, AgentType, Error, Result, SessionEventType, SessionStatus,
};
use sh_session::{
    DriverConfig, ReconnectBackoff, ServerEvent, SessionDriver, SessionSetup, StatusHook,
    WsTransport,
};

use super::status::StatusUpdater;
use super::{Command, RuntimeDeps, RuntimeHandle, RuntimeShared};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds one driver per (event, agent type). The worker uses the
/// realtime WebSocket factory; tests plug in an in-process one.
pub trait SessionFactory: Send + Sync {
    fn build(
        &self,
        event_id: &str,
        agent_type: AgentType,
        setup: SessionSetup,
        hook: StatusHook,
        api_key_override: Option<&str>,
    ) -> SessionDriver;
}

pub struct RealtimeSessionFactory {
    provider: sh_domain::config::ProviderConfig,
}

impl RealtimeSessionFactory {
    pub fn new(provider: sh_domain::config::ProviderConfig) -> Self {
        Self { provider }
    }
}

impl SessionFactory for RealtimeSessionFactory {
    fn build(
        &self,
        _event_id: &str,
        agent_type: AgentType,
        setup: SessionSetup,
        hook: StatusHook,
        api_key_override: Option<&str>,
    ) -> SessionDriver {
        let api_key = api_key_override
            .map(str::to_owned)
            .or_else(|| self.provider.api_key.clone());
        let transport = Arc::new(WsTransport::new(
            &self.provider.ws_url,
            api_key.as_deref(),
            &setup.model,
        ));
        let config = DriverConfig {
            agent_type,
            setup,
            send_timeout: Duration::from_millis(self.provider.send_timeout_ms),
            heartbeat_interval: Duration::from_secs(self.provider.heartbeat_interval_secs),
            pong_timeout: Duration::from_secs(self.provider.pong_timeout_secs),
            backoff: ReconnectBackoff {
                max_attempts: self.provider.max_reconnect_attempts,
                ..ReconnectBackoff::default()
            },
        };
        SessionDriver::new(transport, config, hook)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Options threaded through from the control plane.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub model_set_override: Option<String>,
    pub api_key_override: Option<String>,
}

pub struct SessionLifecycle {
    deps: RuntimeDeps,
    factory: Arc<dyn SessionFactory>,
}

impl SessionLifecycle {
    pub fn new(deps: RuntimeDeps, factory: Arc<dyn SessionFactory>) -> Self {
        Self { deps, factory }
    }

    fn model_set<'a>(&'a self, label: Option<&'a str>) -> Result<(&'a str, &'a ModelSet)> {
        let provider = &self.deps.config.provider;
        let label = label.unwrap_or(&provider.default_model_set);
        provider
            .model_sets
            .get(label)
            .map(|set| (label, set))
            .ok_or_else(|| Error::Config(format!("unknown model set: {label}")))
    }

    /// The model configured for one agent type under a model-set label.
    pub fn model_for(&self, label: Option<&str>, agent_type: AgentType) -> Result<String> {
        let (_, set) = self.model_set(label)?;
        Ok(set.model_for(agent_type).to_owned())
    }

    // ── driver construction ──────────────────────────────────────────

    /// Build drivers for every enabled agent that lacks one; null out
    /// (and durably close) the disabled slots.
    pub async fn create_realtime_sessions(
        &self,
        handle: &RuntimeHandle,
        enabled: &[AgentType],
        options: &SessionOptions,
    ) -> Result<()> {
        let (label, set) = self.model_set(options.model_set_override.as_deref())?;
        let shared = &handle.shared;

        let mut disabled = Vec::new();
        for agent_type in AgentType::ALL {
            if !enabled.contains(&agent_type) {
                shared.clear_driver(agent_type);
                disabled.push(agent_type);
                continue;
            }
            if let Some(existing) = shared.driver(agent_type) {
                if !existing.status().is_terminal() {
                    continue; // keep the live driver
                }
            }

            let setup = SessionSetup {
                model: set.model_for(agent_type).to_owned(),
                instructions: self
                    .deps
                    .prompts
                    .policy(agent_type, &self.deps.config.provider.prompt_version)
                    .to_owned(),
                tools: agent_tool_specs(agent_type),
            };
            let hook = self.status_hook(handle, agent_type);
            let driver = self.factory.build(
                &shared.event_id,
                agent_type,
                setup,
                hook,
                options.api_key_override.as_deref(),
            );
            shared.set_driver(agent_type, driver);
            tracing::debug!(
                event_id = %shared.event_id,
                agent_type = %agent_type,
                model_set = label,
                "session driver built"
            );
        }

        if !disabled.is_empty() {
            self.reset_disabled_sessions(&shared.event_id, &disabled).await;
        }
        Ok(())
    }

    /// Mark durable rows for disabled agents as closed.
    pub async fn reset_disabled_sessions(&self, event_id: &str, types: &[AgentType]) {
        for agent_type in types {
            match self
                .deps
                .store
                .update_session_status(event_id, *agent_type, SessionStatus::Closed, None, false)
                .await
            {
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    event_id = %event_id,
                    agent_type = %agent_type,
                    error = %e,
                    "failed to close disabled session row"
                ),
            }
        }
    }

    /// Ensure a durable `closed` row exists per enabled agent type.
    pub async fn ensure_session_rows(
        &self,
        event_id: &str,
        agent_id: &str,
        enabled: &[AgentType],
        model_set: Option<&str>,
    ) -> Result<()> {
        let (_, set) = self.model_set(model_set)?;
        for agent_type in enabled {
            if self.deps.store.get_session(event_id, *agent_type).await?.is_some() {
                continue;
            }
            let now = Utc::now();
            self.deps
                .store
                .upsert_session(AgentSession {
                    id: uuid::Uuid::new_v4().to_string(),
                    event_id: event_id.to_owned(),
                    agent_id: agent_id.to_owned(),
                    agent_type: *agent_type,
                    provider_session_id: None,
                    status: SessionStatus::Closed,
                    model: set.model_for(*agent_type).to_owned(),
                    connection_count: 0,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
        }
        Ok(())
    }

    // ── event sinks ──────────────────────────────────────────────────

    /// Attach the inbound event sinks. Idempotent: a driver already
    /// attached under the current session marker is left alone.
    pub fn attach_handlers(&self, handle: &RuntimeHandle) {
        for (agent_type, driver) in handle.shared.drivers() {
            let marker = driver
                .session_id()
                .unwrap_or_else(|| "pre-connect".to_owned());
            if !handle.shared.mark_attached(agent_type, &marker) {
                continue;
            }
            let sink_handle = handle.clone();
            driver.set_event_sink(Arc::new(move |agent_type, event| {
                route_session_event(&sink_handle, agent_type, event)
            }));
            tracing::debug!(
                event_id = %handle.shared.event_id,
                agent_type = %agent_type,
                marker = %marker,
                "event sink attached"
            );
        }
    }

    // ── connect / pause / resume / close ─────────────────────────────

    /// Connect enabled sessions in parallel; returns their provider ids.
    pub async fn connect_sessions(
        &self,
        handle: &RuntimeHandle,
        enabled: &[AgentType],
    ) -> Result<Vec<(AgentType, String)>> {
        let drivers: Vec<(AgentType, SessionDriver)> = enabled
            .iter()
            .filter_map(|t| handle.shared.driver(*t).map(|d| (*t, d)))
            .collect();

        let connects = drivers.iter().map(|(t, d)| {
            let driver = d.clone();
            let agent_type = *t;
            async move { (agent_type, driver.connect().await) }
        });

        let mut ids = Vec::with_capacity(drivers.len());
        for (agent_type, result) in join_all(connects).await {
            match result {
                Ok(id) => ids.push((agent_type, id)),
                Err(e) => {
                    return Err(Error::Session {
                        agent_type: agent_type.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }
        Ok(ids)
    }

    pub async fn resume_sessions(&self, handle: &RuntimeHandle) -> Result<()> {
        let drivers = handle.shared.drivers();
        let resumes = drivers.values().map(|d| {
            let driver = d.clone();
            async move { driver.resume().await }
        });
        for result in join_all(resumes).await {
            result?;
        }
        Ok(())
    }

    pub fn pause_sessions(&self, handle: &RuntimeHandle) {
        for driver in handle.shared.drivers().values() {
            driver.pause();
        }
    }

    pub fn close_sessions(&self, handle: &RuntimeHandle) {
        for driver in handle.shared.drivers().values() {
            driver.close();
        }
    }

    // ── status chokepoint ────────────────────────────────────────────

    fn status_hook(&self, handle: &RuntimeHandle, _agent_type: AgentType) -> StatusHook {
        let store = self.deps.store.clone();
        let push_status = self.deps.status_updater.clone();
        let shared = handle.shared.clone();
        let runtime = handle.clone();
        Arc::new(move |agent_type, status, session_id| {
            // Bookkeeping note for the actor (non-blocking, best effort).
            let _ = runtime.try_command(Command::SessionStatusChange { agent_type, status });

            let store = store.clone();
            let push_status = push_status.clone();
            let shared = shared.clone();
            tokio::spawn(async move {
                handle_session_status_change(
                    store,
                    push_status,
                    shared,
                    agent_type,
                    status,
                    session_id,
                )
                .await;
            });
        })
    }
}

/// The single chokepoint updating the durable session row and logging a
/// history row for every driver status transition.
pub async fn handle_session_status_change(
    store: Arc<dyn EventStore>,
    status_updater: Arc<StatusUpdater>,
    shared: Arc<RuntimeShared>,
    agent_type: AgentType,
    status: SessionStatus,
    session_id: Option<String>,
) {
    let event_id = shared.event_id.clone();

    let (event_type, increment) = match status {
        SessionStatus::Active if session_id.is_some() => {
            // Distinguish a fresh connect from a resume by the previous
            // durable state.
            let previous = store
                .get_session(&event_id, agent_type)
                .await
                .ok()
                .flatten()
                .map(|s| s.status);
            if previous == Some(SessionStatus::Paused) {
                (SessionEventType::Resumed, true)
            } else {
                (SessionEventType::Connected, true)
            }
        }
        SessionStatus::Paused => (SessionEventType::Paused, false),
        SessionStatus::Error => (SessionEventType::Error, false),
        SessionStatus::Closed => (SessionEventType::Closed, false),
        _ => (SessionEventType::Disconnected, false),
    };

    if let Err(e) = store
        .update_session_status(&event_id, agent_type, status, session_id.clone(), increment)
        .await
    {
        tracing::warn!(
            event_id = %event_id,
            agent_type = %agent_type,
            error = %e,
            "session row update failed"
        );
    }

    if let Err(e) = store
        .log_session_event(SessionHistoryRow {
            event_id: event_id.clone(),
            agent_id: shared.agent_id.clone(),
            agent_type,
            event_type,
            provider_session_id: session_id,
            detail: None,
            at: Utc::now(),
        })
        .await
    {
        tracing::warn!(
            event_id = %event_id,
            agent_type = %agent_type,
            error = %e,
            "session history append failed"
        );
    }

    status_updater.push_status(&shared).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound event routing (driver → mailbox)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map one provider event to a mailbox command. Returns `false` when
/// the mailbox rejected it (the driver counts the drop).
fn route_session_event(handle: &RuntimeHandle, agent_type: AgentType, event: ServerEvent) -> bool {
    let command = match (agent_type, event) {
        (AgentType::Transcript, ServerEvent::TranscriptionCompleted { text, speaker, at_ms }) => {
            Command::ProviderTranscript {
                text,
                speaker,
                at_ms,
                is_final: true,
            }
        }
        (AgentType::Transcript, ServerEvent::TranscriptionDelta { delta, speaker }) => {
            Command::ProviderTranscript {
                text: delta,
                speaker,
                at_ms: None,
                is_final: false,
            }
        }
        (AgentType::Cards, ServerEvent::ToolCall { call_id, name, arguments })
            if name == PRODUCE_CARD_TOOL =>
        {
            Command::HandleCardResponse {
                call_id,
                args: arguments,
            }
        }
        (_, ServerEvent::ToolCall { call_id, name, arguments }) => Command::ToolCall {
            agent_type,
            call_id,
            name,
            args: arguments,
        },
        (AgentType::Facts, ServerEvent::ResponseTextDone { text }) => {
            Command::HandleFactsResponse { text }
        }
        (_, ServerEvent::ResponseDone) => Command::ResponseCompleted { agent_type },
        // Text deltas, session bookkeeping, provider errors: nothing
        // for the runtime to do.
        _ => return true,
    };
    handle.try_command(command).is_ok()
}
