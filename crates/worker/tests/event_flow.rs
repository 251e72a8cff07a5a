//! End-to-end runtime scenarios against the in-memory datastore and an
//! in-process session transport that plays the provider side.
//!
//! Covered here:
//! - happy path: three chunks trigger exactly one card, duplicates are
//!   suppressed inside the freshness window
//! - fact extraction lands in the store and the durable rows
//! - capacity eviction reconciles as bulk mark-inactive
//! - pause buffers transcripts without sends; resume re-arms triggers
//! - crash recovery replays above the checkpoints without re-emitting
//! - session provisioning and start are idempotent

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use sh_datastore::{EventStore, HashEmbeddingClient, MemoryStore, MemoryPushBus};
use sh_domain::config::Config;
use sh_domain::{
    Agent, AgentStage, AgentStatus, AgentType, CardType, GlossaryEntry, PushKind, RuntimeStatus,
    TranscriptChunk,
};
use sh_session::{
    ClientEvent, DriverConfig, PipeEnd, PipeTransport, ReconnectBackoff, ServerEvent,
    SessionDriver, SessionSetup, StatusHook,
};
use sh_worker::orchestrator::{Orchestrator, SharedOrchestrator};
use sh_worker::runtime::checkpoint::CheckpointStore;
use sh_worker::runtime::lifecycle::{SessionFactory, SessionLifecycle};
use sh_worker::runtime::status::StatusUpdater;
use sh_worker::runtime::RuntimeDeps;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One in-process transport per agent type; every driver built for a
/// type dials it, and the test drains its accept queue.
struct PipeFactory {
    transports: Mutex<HashMap<AgentType, Arc<PipeTransport>>>,
}

impl SessionFactory for PipeFactory {
    fn build(
        &self,
        _event_id: &str,
        agent_type: AgentType,
        setup: SessionSetup,
        hook: StatusHook,
        _api_key_override: Option<&str>,
    ) -> SessionDriver {
        let transport = self
            .transports
            .lock()
            .get(&agent_type)
            .expect("transport for agent type")
            .clone();
        SessionDriver::new(
            transport,
            DriverConfig {
                agent_type,
                setup,
                send_timeout: Duration::from_secs(5),
                heartbeat_interval: Duration::from_secs(60),
                pong_timeout: Duration::from_secs(10),
                backoff: ReconnectBackoff {
                    initial_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(10),
                    max_attempts: 3,
                },
            },
            hook,
        )
    }
}

struct Harness {
    orchestrator: SharedOrchestrator,
    store: Arc<MemoryStore>,
    push: Arc<MemoryPushBus>,
    accepts: HashMap<AgentType, mpsc::Receiver<PipeEnd>>,
}

impl Harness {
    async fn new(tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        tweak(&mut config);
        let config = Arc::new(config);

        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(MemoryPushBus::new());
        let store_dyn: Arc<dyn EventStore> = store.clone();

        let mut transports = HashMap::new();
        let mut accepts = HashMap::new();
        for agent_type in AgentType::ALL {
            let (transport, accept_rx) = PipeTransport::new();
            transports.insert(agent_type, Arc::new(transport));
            accepts.insert(agent_type, accept_rx);
        }

        let deps = RuntimeDeps {
            config,
            store: store_dyn.clone(),
            push: push.clone(),
            embedder: Arc::new(HashEmbeddingClient::default()),
            prompts: Arc::new(sh_agents::PromptLibrary::builtin()),
            checkpoints: Arc::new(CheckpointStore::new(store_dyn)),
            status_updater: Arc::new(StatusUpdater::new(push.clone())),
        };
        let lifecycle = SessionLifecycle::new(
            deps.clone(),
            Arc::new(PipeFactory {
                transports: Mutex::new(transports),
            }),
        );
        let orchestrator = Arc::new(Orchestrator::new(deps, lifecycle));

        Self {
            orchestrator,
            store,
            push,
            accepts,
        }
    }

    fn seed_agent(&self, event_id: &str, agent_id: &str, stage: AgentStage) {
        let now = Utc::now();
        self.store.insert_agent(Agent {
            id: agent_id.to_owned(),
            event_id: event_id.to_owned(),
            status: AgentStatus::Idle,
            stage,
            model_set: None,
            created_at: now,
            updated_at: now,
            last_error: None,
        });
    }

    fn seed_glossary(&self, event_id: &str, terms: &[&str]) {
        let entries = terms
            .iter()
            .map(|t| GlossaryEntry {
                term: (*t).to_owned(),
                definition: format!("definition of {t}"),
                acronym_for: None,
                category: None,
                usage_examples: vec![],
                related_terms: vec![],
                confidence_score: 0.9,
            })
            .collect();
        self.store.seed_glossary(event_id, entries);
    }

    /// Accept one connection per agent type and answer the handshake.
    async fn serve_handshakes(&mut self, session_prefix: &str) -> HashMap<AgentType, PipeEnd> {
        let mut ends = HashMap::new();
        for agent_type in AgentType::ALL {
            let accept = self.accepts.get_mut(&agent_type).unwrap();
            let mut end = tokio::time::timeout(Duration::from_secs(5), accept.recv())
                .await
                .unwrap_or_else(|_| panic!("{agent_type} never dialed"))
                .unwrap();
            match end.next_client_event().await {
                Some(ClientEvent::SessionUpdate { .. }) => {}
                other => panic!("{agent_type}: expected session.update, got {other:?}"),
            }
            end.send_event(&ServerEvent::SessionCreated {
                session_id: format!("{session_prefix}-{agent_type}"),
            })
            .await;
            ends.insert(agent_type, end);
        }
        ends
    }

    /// Provision sessions + start the event, serving the provider side.
    async fn start_event(&mut self, event_id: &str, agent_id: &str) -> HashMap<AgentType, PipeEnd> {
        self.orchestrator
            .create_agent_sessions_for_event(event_id)
            .await
            .unwrap();
        let orchestrator = self.orchestrator.clone();
        let event_id = event_id.to_owned();
        let agent_id = agent_id.to_owned();
        let start = tokio::spawn(async move { orchestrator.start_event(&event_id, &agent_id).await });
        let ends = self.serve_handshakes("sess").await;
        start.await.unwrap().unwrap();
        ends
    }

    async fn insert_chunk(&self, event_id: &str, seq: u64, text: &str) {
        let chunk = TranscriptChunk {
            seq,
            at_ms: Utc::now().timestamp_millis(),
            speaker: None,
            text: text.to_owned(),
            is_final: true,
            transcript_id: None,
        };
        self.store
            .insert_transcript(event_id, &chunk)
            .await
            .unwrap();
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Expect NO client event on this end for the given quiet period.
async fn expect_silence(end: &mut PipeEnd, quiet: Duration) {
    let got = tokio::time::timeout(quiet, end.from_driver.recv()).await;
    if let Ok(Some(text)) = got {
        // Tool results and audio are fine; prompts are not.
        assert!(
            !text.contains("response.create"),
            "unexpected prompt during quiet period: {text}"
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_emits_exactly_one_card() {
    let mut h = Harness::new(|_| {}).await;
    h.seed_agent("E1", "A1", AgentStage::ContextComplete);
    h.seed_glossary("E1", &["vector embeddings"]);
    h.orchestrator.initialize().await.unwrap();

    let mut ends = h.start_event("E1", "A1").await;

    h.insert_chunk("E1", 1, "Let's talk about vector embeddings").await;
    h.insert_chunk("E1", 2, "embeddings are high-dim vectors").await;
    h.insert_chunk("E1", 3, "vector embeddings power search").await;

    // The cards agent gets exactly one prompt, for the chunk-3 trigger.
    let cards = ends.get_mut(&AgentType::Cards).unwrap();
    let prompt = cards.next_client_event().await.expect("cards prompt");
    let input = match prompt {
        ClientEvent::ResponseCreate { input } => input,
        other => panic!("expected response.create, got {other:?}"),
    };
    assert!(input.contains("Concept to explain: vector embeddings"));
    assert!(input.contains("Source sequence: 3"));

    cards
        .send_event(&ServerEvent::ToolCall {
            call_id: "c1".into(),
            name: "produce_card".into(),
            arguments: serde_json::json!({
                "card_type": "text",
                "title": "Vector embeddings",
                "body": "High-dimensional representations that power semantic search.",
                "source_seq": 3,
            }),
        })
        .await;
    cards.send_event(&ServerEvent::ResponseDone).await;

    wait_until("card persisted", || !h.store.cards_for("E1").is_empty()).await;
    let card = &h.store.cards_for("E1")[0];
    assert_eq!(card.source_seq, 3);
    assert_eq!(card.card_type, CardType::Text);
    assert!(!card.title.is_empty());
    assert_eq!(card.concept_id.as_deref(), Some("vector-embeddings"));
    assert_eq!(h.push.count_of(PushKind::CardCreated), 1);

    // Same concept again inside the freshness window: suppressed.
    h.insert_chunk("E1", 4, "vector embeddings keep coming up").await;
    h.insert_chunk("E1", 5, "yes, vector embeddings").await;
    expect_silence(ends.get_mut(&AgentType::Cards).unwrap(), Duration::from_millis(300)).await;
    assert_eq!(h.push.count_of(PushKind::CardCreated), 1);
}

#[tokio::test]
async fn fact_extraction_reaches_the_durable_store() {
    let mut h = Harness::new(|_| {}).await;
    h.seed_agent("E1", "A1", AgentStage::ContextComplete);
    h.orchestrator.initialize().await.unwrap();
    let mut ends = h.start_event("E1", "A1").await;

    h.insert_chunk("E1", 1, "The deadline is January 15").await;

    let facts = ends.get_mut(&AgentType::Facts).unwrap();
    let prompt = facts.next_client_event().await.expect("facts prompt");
    match prompt {
        ClientEvent::ResponseCreate { input } => {
            assert!(input.contains("The deadline is January 15"));
        }
        other => panic!("expected response.create, got {other:?}"),
    }

    facts
        .send_event(&ServerEvent::ResponseTextDone {
            text: r#"[{"key": "deadline", "value": "January 15", "confidence": 0.8}]"#.into(),
        })
        .await;
    facts.send_event(&ServerEvent::ResponseDone).await;

    wait_until("fact persisted", || {
        h.store
            .fact_row("E1", "deadline")
            .map(|(_, active)| active)
            .unwrap_or(false)
    })
    .await;
    let (fact, _) = h.store.fact_row("E1", "deadline").unwrap();
    assert_eq!(fact.value_text(), "January 15");
    assert!(fact.confidence >= 0.6);
    assert_eq!(h.push.count_of(PushKind::FactUpdate), 1);
}

#[tokio::test]
async fn capacity_eviction_marks_keys_inactive_durably() {
    let mut h = Harness::new(|config| {
        config.runtime.facts_max_items = 3;
    })
    .await;
    h.seed_agent("E1", "A1", AgentStage::ContextComplete);
    h.orchestrator.initialize().await.unwrap();
    let mut ends = h.start_event("E1", "A1").await;

    h.insert_chunk("E1", 1, "lots of claims in this meeting").await;

    let facts = ends.get_mut(&AgentType::Facts).unwrap();
    facts.next_client_event().await.expect("facts prompt");
    facts
        .send_event(&ServerEvent::ResponseTextDone {
            text: r#"[
                {"key": "a", "value": 1, "confidence": 0.9},
                {"key": "b", "value": 2, "confidence": 0.8},
                {"key": "c", "value": 3, "confidence": 0.7},
                {"key": "d", "value": 4, "confidence": 0.95}
            ]"#
            .into(),
        })
        .await;
    facts.send_event(&ServerEvent::ResponseDone).await;

    wait_until("eviction reconciled", || {
        h.store.inactive_fact_keys("E1") == vec!["c".to_owned()]
    })
    .await;
    let mut active: Vec<String> = ["a", "b", "d"]
        .iter()
        .filter(|k| {
            h.store
                .fact_row("E1", k)
                .map(|(_, active)| active)
                .unwrap_or(false)
        })
        .map(|k| (*k).to_owned())
        .collect();
    active.sort();
    assert_eq!(active, vec!["a", "b", "d"]);
}

#[tokio::test]
async fn pause_buffers_transcripts_and_resume_rearms_triggers() {
    let mut h = Harness::new(|_| {}).await;
    h.seed_agent("E1", "A1", AgentStage::ContextComplete);
    h.seed_glossary("E1", &["vector embeddings"]);
    h.orchestrator.initialize().await.unwrap();
    let mut ends = h.start_event("E1", "A1").await;

    h.orchestrator.pause_event("E1").await.unwrap();
    let handle = h.orchestrator.manager().get("E1").unwrap();
    wait_until("runtime paused", || handle.status() == RuntimeStatus::Paused).await;

    // Chunk arrives while paused: buffered into the ring, no sends.
    h.insert_chunk("E1", 1, "should be buffered, vector embeddings").await;
    wait_until("paused chunk ingested", || {
        handle.shared.snapshot().transcript_last_seq == 1
    })
    .await;
    expect_silence(ends.get_mut(&AgentType::Cards).unwrap(), Duration::from_millis(200)).await;
    assert_eq!(handle.shared.snapshot().ring.finalized, 1);

    h.orchestrator.resume_event("E1", "A1").await.unwrap();
    wait_until("runtime running again", || {
        handle.status() == RuntimeStatus::Running
    })
    .await;

    // The next finalized chunk sees two concept occurrences and fires.
    h.insert_chunk("E1", 2, "more about vector embeddings").await;
    let cards = ends.get_mut(&AgentType::Cards).unwrap();
    let prompt = cards.next_client_event().await.expect("card prompt after resume");
    match prompt {
        ClientEvent::ResponseCreate { input } => {
            assert!(input.contains("vector embeddings"));
        }
        other => panic!("expected response.create, got {other:?}"),
    }
}

#[tokio::test]
async fn crash_recovery_replays_without_reemitting() {
    let mut h = Harness::new(|_| {}).await;
    h.seed_agent("E1", "A1", AgentStage::Running);
    // Durable state from the previous process: transcripts 1..10 and
    // checkpoints cards=4, facts=4.
    for seq in 1..=10u64 {
        h.store.seed_transcript(
            "E1",
            TranscriptChunk {
                seq,
                at_ms: Utc::now().timestamp_millis(),
                speaker: None,
                text: format!("prior discussion item number {seq}"),
                is_final: true,
                transcript_id: Some(format!("t{seq}")),
            },
        );
    }
    h.store
        .put_checkpoint("E1", AgentType::Cards, 4)
        .await
        .unwrap();
    h.store
        .put_checkpoint("E1", AgentType::Facts, 4)
        .await
        .unwrap();
    // The agent row marks it running, so initialize() resumes it.
    let agent = h.store.get_agent("A1").unwrap();
    assert_eq!(agent.stage, AgentStage::Running);

    let orchestrator = h.orchestrator.clone();
    let init = tokio::spawn(async move { orchestrator.initialize().await });
    let mut ends = h.serve_handshakes("recovered").await;
    init.await.unwrap().unwrap();

    let handle = h.orchestrator.manager().get("E1").expect("runtime resumed");
    wait_until("replay advanced seqs", || {
        handle.shared.snapshot().transcript_last_seq == 10
    })
    .await;
    // Replayed rows 5..10 are in the ring; nothing was re-emitted.
    assert_eq!(handle.shared.snapshot().ring.finalized, 6);
    expect_silence(ends.get_mut(&AgentType::Cards).unwrap(), Duration::from_millis(200)).await;
    expect_silence(ends.get_mut(&AgentType::Facts).unwrap(), Duration::from_millis(200)).await;

    // Live traffic continues from seq 11.
    h.insert_chunk("E1", 11, "completely fresh topic now").await;
    let facts = ends.get_mut(&AgentType::Facts).unwrap();
    let prompt = facts.next_client_event().await.expect("facts prompt for live chunk");
    match prompt {
        ClientEvent::ResponseCreate { input } => {
            assert!(input.contains("completely fresh topic now"));
        }
        other => panic!("expected response.create, got {other:?}"),
    }
    assert_eq!(handle.shared.snapshot().transcript_last_seq, 11);
}

#[tokio::test]
async fn session_provisioning_and_start_are_idempotent() {
    let mut h = Harness::new(|_| {}).await;
    h.seed_agent("E1", "A1", AgentStage::ContextComplete);
    h.orchestrator.initialize().await.unwrap();

    h.orchestrator
        .create_agent_sessions_for_event("E1")
        .await
        .unwrap();
    let first_rows = h.store.get_sessions("E1").await.unwrap();
    assert_eq!(first_rows.len(), 3);

    // Second provisioning call: rows are deleted and re-inserted, the
    // agent stays active/testing.
    h.orchestrator
        .create_agent_sessions_for_event("E1")
        .await
        .unwrap();
    let second_rows = h.store.get_sessions("E1").await.unwrap();
    assert_eq!(second_rows.len(), 3);
    let agent = h.store.get_agent("A1").unwrap();
    assert_eq!(agent.status, AgentStatus::Active);
    assert_eq!(agent.stage, AgentStage::Testing);
    let first_ids: Vec<&str> = first_rows.iter().map(|s| s.id.as_str()).collect();
    assert!(second_rows.iter().all(|s| !first_ids.contains(&s.id.as_str())));

    // Start, then start again: the second call must not reconnect.
    let orchestrator = h.orchestrator.clone();
    let start = tokio::spawn(async move { orchestrator.start_event("E1", "A1").await });
    h.serve_handshakes("sess").await;
    start.await.unwrap().unwrap();

    h.orchestrator.start_event("E1", "A1").await.unwrap();
    let redial = tokio::time::timeout(
        Duration::from_millis(200),
        h.accepts.get_mut(&AgentType::Cards).unwrap().recv(),
    )
    .await;
    assert!(redial.is_err(), "second start_event must not redial");

    // Stage testing is sticky across start transitions.
    let agent = h.store.get_agent("A1").unwrap();
    assert_eq!(agent.stage, AgentStage::Testing);
    assert_eq!(agent.status, AgentStatus::Active);
}
