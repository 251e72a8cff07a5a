//! Map of event id → runtime actor. The only code allowed to create or
//! destroy runtimes.

use std::collections::HashMap;

use parking_lot::Mutex;

use sh_domain::{Agent, AgentType, Result};

use crate::stores::{FactsStore, GlossaryCache};

use super::{spawn, EventRuntime, RuntimeDeps, RuntimeHandle};

pub struct RuntimeManager {
    deps: RuntimeDeps,
    runtimes: Mutex<HashMap<String, RuntimeHandle>>,
}

impl RuntimeManager {
    pub fn new(deps: RuntimeDeps) -> Self {
        Self {
            deps,
            runtimes: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, event_id: &str) -> Option<RuntimeHandle> {
        self.runtimes.lock().get(event_id).cloned()
    }

    pub fn all(&self) -> Vec<RuntimeHandle> {
        self.runtimes.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.runtimes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.lock().is_empty()
    }

    /// Create (or return) the runtime for an event: load checkpoints,
    /// glossary, and the active facts snapshot, then spawn the actor
    /// with status `context_complete`.
    pub async fn create_runtime(&self, event_id: &str, agent_id: &str) -> Result<RuntimeHandle> {
        if let Some(existing) = self.get(event_id) {
            return Ok(existing);
        }

        let deps = self.deps.clone();
        let store = deps.store.clone();

        let transcript_seq = deps
            .checkpoints
            .load(event_id, AgentType::Transcript)
            .await?;
        let cards_seq = deps.checkpoints.load(event_id, AgentType::Cards).await?;
        let facts_seq = deps.checkpoints.load(event_id, AgentType::Facts).await?;

        let glossary_rows = store.list_glossary(event_id).await?;
        let glossary_count = glossary_rows.len();
        let glossary = GlossaryCache::new(glossary_rows);

        // Facts snapshot: anything over capacity is immediately marked
        // inactive durably so the two views agree.
        let mut facts = FactsStore::new(deps.config.runtime.facts_max_items);
        let snapshot = store.list_active_facts(event_id).await?;
        let loaded = snapshot.len();
        let evicted = facts.load_facts(snapshot);
        if !evicted.is_empty() {
            store.mark_facts_inactive(event_id, &evicted).await?;
        }

        let enabled_agents = deps.config.features.enabled_agents();
        let runtime = EventRuntime::new(
            deps,
            event_id,
            agent_id,
            enabled_agents,
            glossary,
            facts,
            cards_seq,
            facts_seq,
            transcript_seq,
        );
        let handle = spawn(runtime);

        tracing::info!(
            event_id = %event_id,
            agent_id = %agent_id,
            glossary_count,
            facts_loaded = loaded,
            facts_evicted = evicted.len(),
            transcript_seq,
            cards_seq,
            facts_seq,
            "runtime created"
        );

        self.runtimes
            .lock()
            .insert(event_id.to_owned(), handle.clone());
        Ok(handle)
    }

    /// Replay durable transcripts above the checkpoints into the ring;
    /// cards/facts stay quiet (they are gated by the checkpoints).
    pub async fn replay_transcripts(&self, handle: &RuntimeHandle) -> Result<u64> {
        handle.replay().await
    }

    /// Crash recovery: recreate a runtime (with replay) for every agent
    /// whose durable status is still `running`. The caller decides
    /// whether to start each one.
    pub async fn resume_existing_events(&self, limit: usize) -> Result<Vec<(RuntimeHandle, Agent)>> {
        let agents = self.deps.store.list_running_agents(limit).await?;
        let mut resumed = Vec::with_capacity(agents.len());
        for agent in agents {
            let handle = match self.create_runtime(&agent.event_id, &agent.id).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(
                        event_id = %agent.event_id,
                        error = %e,
                        "failed to resume runtime, skipping"
                    );
                    continue;
                }
            };
            if let Err(e) = self.replay_transcripts(&handle).await {
                tracing::warn!(
                    event_id = %agent.event_id,
                    error = %e,
                    "transcript replay failed during resume"
                );
            }
            resumed.push((handle, agent));
        }
        Ok(resumed)
    }

    /// Stop and remove a runtime. Sessions must already be closed by
    /// the lifecycle; this drains and drops the actor.
    pub async fn remove_runtime(&self, event_id: &str) -> Result<()> {
        let handle = self.runtimes.lock().remove(event_id);
        if let Some(handle) = handle {
            handle.close(false).await?;
        }
        self.deps.checkpoints.forget(event_id);
        Ok(())
    }
}
