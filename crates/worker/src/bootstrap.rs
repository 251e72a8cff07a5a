//! AppState construction and background-task spawning extracted from
//! `main.rs`, so tests and CLI commands can boot the runtime without an
//! HTTP listener.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use sh_agents::PromptLibrary;
use sh_datastore::{
    create_store, EmbeddingClient, HashEmbeddingClient, HttpEmbeddingClient, HttpPushBus, PushBus,
};
use sh_domain::config::{Config, ConfigSeverity, DatastoreBackend};

use crate::orchestrator::Orchestrator;
use crate::pollers::Pollers;
use crate::runtime::checkpoint::CheckpointStore;
use crate::runtime::lifecycle::{RealtimeSessionFactory, SessionLifecycle};
use crate::runtime::status::StatusUpdater;
use crate::runtime::RuntimeDeps;
use crate::state::AppState;

/// Validate config, wire every subsystem, and return the ready state.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Durable store ────────────────────────────────────────────────
    let store = create_store(&config).context("initializing datastore")?;
    tracing::info!(
        backend = ?config.datastore.backend,
        url = %config.datastore.base_url,
        "datastore ready"
    );

    // ── Push bus ─────────────────────────────────────────────────────
    let push: Arc<dyn PushBus> =
        Arc::new(HttpPushBus::new(&config.push).context("initializing push bus")?);
    tracing::info!(endpoint = %config.push.endpoint, enabled = config.push.enabled, "push bus ready");

    // ── Embedding client ─────────────────────────────────────────────
    // Memory-backend deployments run fully in-process; everything else
    // talks to the embedding service.
    let embedder: Arc<dyn EmbeddingClient> = match config.datastore.backend {
        DatastoreBackend::Memory => Arc::new(HashEmbeddingClient::default()),
        DatastoreBackend::Http => Arc::new(
            HttpEmbeddingClient::new(&config.embedding)
                .context("initializing embedding client")?,
        ),
    };
    tracing::info!(model = %config.embedding.model, "embedding client ready");

    // ── Runtime services ─────────────────────────────────────────────
    let checkpoints = Arc::new(CheckpointStore::new(store.clone()));
    let status_updater = Arc::new(StatusUpdater::new(push.clone()));
    let prompts = Arc::new(PromptLibrary::builtin());
    let deps = RuntimeDeps {
        config: config.clone(),
        store,
        push,
        embedder,
        prompts,
        checkpoints,
        status_updater,
    };

    let factory = Arc::new(RealtimeSessionFactory::new(config.provider.clone()));
    let lifecycle = SessionLifecycle::new(deps.clone(), factory);
    let orchestrator = Arc::new(Orchestrator::new(deps, lifecycle));
    tracing::info!("orchestrator ready");

    Ok(AppState {
        config,
        orchestrator,
    })
}

/// Subscribe to the change feed, resume running events, and spawn the
/// poller loops. Call after [`build_app_state`] when serving.
pub async fn start_background(state: &AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    state
        .orchestrator
        .initialize()
        .await
        .context("orchestrator initialization")?;

    Pollers::new(state.orchestrator.clone(), shutdown).spawn_all();
    Ok(())
}
