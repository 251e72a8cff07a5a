//! Five periodic tick loops pushing durable state changes into the
//! orchestrator.
//!
//! Each poller is one task: `interval.tick()` then the tick body, so a
//! tick can never overlap itself (missed ticks are skipped, not
//! bursted). A process-wide `processing_agents` set keeps two pollers
//! from working the same agent concurrently.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use sh_domain::{AgentStage, AgentStatus, RuntimeStatus};

use crate::orchestrator::SharedOrchestrator;

const POLL_BATCH: usize = 20;
/// Context-phase agents untouched for this long get re-kicked.
const REGENERATION_STALL_SECS: i64 = 600;

#[derive(Clone)]
pub struct Pollers {
    orchestrator: SharedOrchestrator,
    processing_agents: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl Pollers {
    pub fn new(orchestrator: SharedOrchestrator, cancel: CancellationToken) -> Self {
        Self {
            orchestrator,
            processing_agents: Arc::new(Mutex::new(HashSet::new())),
            cancel,
        }
    }

    /// Spawn all five loops. They stop when the shutdown token fires;
    /// an in-flight tick completes first.
    pub fn spawn_all(&self) {
        let polling = self.orchestrator.deps().config.polling.clone();
        self.spawn_loop("blueprint", polling.blueprint_secs, Self::blueprint_tick);
        self.spawn_loop("context", polling.context_secs, Self::context_tick);
        self.spawn_loop(
            "regeneration",
            polling.regeneration_secs,
            Self::regeneration_tick,
        );
        self.spawn_loop(
            "pause_resume",
            polling.pause_resume_secs,
            Self::pause_resume_tick,
        );
        self.spawn_loop(
            "session_startup",
            polling.session_startup_secs,
            Self::session_startup_tick,
        );
        tracing::info!("pollers spawned");
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, secs: u64, tick: F)
    where
        F: Fn(Pollers) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let pollers = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(secs.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = pollers.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                tick(pollers.clone()).await;
            }
            tracing::debug!(poller = name, "poller stopped");
        });
    }

    /// Claim an agent for this tick; `false` means another poller has it.
    fn claim(&self, agent_id: &str) -> bool {
        self.processing_agents.lock().insert(agent_id.to_owned())
    }

    fn release(&self, agent_id: &str) {
        self.processing_agents.lock().remove(agent_id);
    }

    // ── tick bodies ──────────────────────────────────────────────────

    /// New blueprints are picked up by marking the agent researching;
    /// the upstream context pipeline owns the actual generation.
    async fn blueprint_tick(self) {
        let store = self.orchestrator.deps().store.clone();
        let agents = match store.list_agents_at_stage(AgentStage::Blueprint, POLL_BATCH).await {
            Ok(agents) => agents,
            Err(e) => {
                tracing::warn!(error = %e, "blueprint poll failed");
                return;
            }
        };
        for agent in agents {
            if !self.claim(&agent.id) {
                continue;
            }
            let result = store
                .update_agent(&agent.id, agent.status, Some(AgentStage::Researching))
                .await;
            if let Err(e) = result {
                tracing::warn!(agent_id = %agent.id, error = %e, "blueprint kick failed");
            } else {
                tracing::info!(agent_id = %agent.id, event_id = %agent.event_id, "blueprint picked up");
            }
            self.release(&agent.id);
        }
    }

    /// Agents in the context-build stages advance to `context_complete`
    /// once their artifacts (glossary rows) have landed.
    async fn context_tick(self) {
        let store = self.orchestrator.deps().store.clone();
        for stage in [
            AgentStage::Researching,
            AgentStage::BuildingGlossary,
            AgentStage::BuildingChunks,
        ] {
            let agents = match store.list_agents_at_stage(stage, POLL_BATCH).await {
                Ok(agents) => agents,
                Err(e) => {
                    tracing::warn!(error = %e, "context poll failed");
                    return;
                }
            };
            for agent in agents {
                if !self.claim(&agent.id) {
                    continue;
                }
                match store.list_glossary(&agent.event_id).await {
                    Ok(rows) if !rows.is_empty() => {
                        if let Err(e) = store
                            .update_agent(
                                &agent.id,
                                agent.status,
                                Some(AgentStage::ContextComplete),
                            )
                            .await
                        {
                            tracing::warn!(agent_id = %agent.id, error = %e, "context advance failed");
                        } else {
                            tracing::info!(
                                agent_id = %agent.id,
                                event_id = %agent.event_id,
                                glossary = rows.len(),
                                "context complete"
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(agent_id = %agent.id, error = %e, "glossary check failed");
                    }
                }
                self.release(&agent.id);
            }
        }
    }

    /// Context-phase agents stalled past the threshold are sent back to
    /// blueprint so the pipeline regenerates their artifacts.
    async fn regeneration_tick(self) {
        let store = self.orchestrator.deps().store.clone();
        let now = chrono::Utc::now();
        for stage in [AgentStage::Researching, AgentStage::BuildingGlossary] {
            let agents = match store.list_agents_at_stage(stage, POLL_BATCH).await {
                Ok(agents) => agents,
                Err(e) => {
                    tracing::warn!(error = %e, "regeneration poll failed");
                    return;
                }
            };
            for agent in agents {
                let stalled = (now - agent.updated_at).num_seconds() > REGENERATION_STALL_SECS;
                if !stalled || !self.claim(&agent.id) {
                    continue;
                }
                if let Err(e) = store
                    .update_agent(&agent.id, agent.status, Some(AgentStage::Blueprint))
                    .await
                {
                    tracing::warn!(agent_id = %agent.id, error = %e, "regeneration kick failed");
                } else {
                    tracing::info!(
                        agent_id = %agent.id,
                        event_id = %agent.event_id,
                        stage = ?stage,
                        "stalled context phase sent back for regeneration"
                    );
                }
                self.release(&agent.id);
            }
        }
    }

    /// Durable pause/resume intents (operators flip the agent status)
    /// are reconciled against the live runtime state.
    async fn pause_resume_tick(self) {
        let store = self.orchestrator.deps().store.clone();
        for handle in self.orchestrator.manager().all() {
            let event_id = handle.event_id().to_owned();
            let agent = match store.get_agent_for_event(&event_id).await {
                Ok(Some(agent)) => agent,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(event_id = %event_id, error = %e, "pause/resume poll failed");
                    continue;
                }
            };
            if !self.claim(&agent.id) {
                continue;
            }

            let runtime_status = handle.status();
            let result = match (agent.status, runtime_status) {
                (AgentStatus::Paused, RuntimeStatus::Running) => {
                    tracing::info!(event_id = %event_id, "durable pause intent observed");
                    self.orchestrator.pause_event(&event_id).await
                }
                (AgentStatus::Active, RuntimeStatus::Paused) => {
                    tracing::info!(event_id = %event_id, "durable resume intent observed");
                    self.orchestrator.resume_event(&event_id, &agent.id).await
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                tracing::warn!(event_id = %event_id, error = %e, "pause/resume reconcile failed");
            }
            self.release(&agent.id);
        }
    }

    /// Agents reaching `context_complete` get sessions provisioned and
    /// started.
    async fn session_startup_tick(self) {
        let store = self.orchestrator.deps().store.clone();
        let agents = match store
            .list_agents_at_stage(AgentStage::ContextComplete, POLL_BATCH)
            .await
        {
            Ok(agents) => agents,
            Err(e) => {
                tracing::warn!(error = %e, "session startup poll failed");
                return;
            }
        };
        for agent in agents {
            if agent.status == AgentStatus::Error || !self.claim(&agent.id) {
                continue;
            }
            let result = async {
                self.orchestrator
                    .create_agent_sessions_for_event(&agent.event_id)
                    .await?;
                self.orchestrator
                    .start_event(&agent.event_id, &agent.id)
                    .await
            }
            .await;
            if let Err(e) = result {
                tracing::warn!(
                    agent_id = %agent.id,
                    event_id = %agent.event_id,
                    error = %e,
                    "session startup failed"
                );
            }
            self.release(&agent.id);
        }
    }
}
