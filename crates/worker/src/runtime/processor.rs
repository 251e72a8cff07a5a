//! The event processor: transcript ingestion, card trigger evaluation,
//! facts scheduling, and model-output normalization.
//!
//! Everything here runs on the runtime's actor task. The only awaits
//! are I/O: durable writes, tool dispatch, checkpoint saves.

use chrono::Utc;

use sh_agents::{
    cards_turn_input, count_concept_occurrences, extract_concepts, facts_turn_input,
    parse_facts_response, parse_produce_card, SupportingContext, ToolDispatcher,
};
use sh_datastore::AgentOutputRow;
use sh_domain::transcript::PendingTranscriptMeta;
use sh_domain::{
    AgentType, FactStatus, PushKind, PushMessage, RuntimeStatus, TranscriptChunk,
};
use sh_session::{AudioAppend, ClientEvent};

use crate::stores::{GlossaryCache, PendingConcept};

use super::EventRuntime;

/// Overall char cap for transcript bullet blocks.
const CONTEXT_BULLETS_MAX_CHARS: usize = 1_500;
/// Transcript window handed to the facts agent.
const FACTS_TRANSCRIPT_WINDOW: usize = 8;
/// Fact bullets handed to the facts agent.
const FACTS_BULLET_LIMIT: usize = 15;
/// Confidence drop applied when the facts agent parks a fact.
const DORMANCY_DELTA: f64 = 0.1;
/// A dormant fact revives only when re-selected this far above its
/// parked confidence.
const REVIVAL_HYSTERESIS: f64 = 0.15;

impl EventRuntime {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Audio ingress
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub(crate) fn handle_append_audio(&mut self, append: AudioAppend, meta: PendingTranscriptMeta) {
        let Some(driver) = self.shared.driver(AgentType::Transcript) else {
            tracing::warn!(
                event_id = %self.shared.event_id,
                "audio append without a transcript session, dropping"
            );
            return;
        };
        // Carry speaker/encoding metadata until the provider emits the
        // transcript for this turn.
        self.pending_transcript = Some(meta);
        if let Err(e) = driver.append_audio_chunk(append) {
            tracing::warn!(
                event_id = %self.shared.event_id,
                error = %e,
                "audio append rejected by transcript driver"
            );
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Transcript ingress (both paths funnel into process_transcript)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Provider path: transcription events from the transcript session.
    /// Deltas update interim state only; sequences never advance here.
    pub(crate) async fn handle_provider_transcript(
        &mut self,
        text: String,
        speaker: Option<String>,
        at_ms: Option<i64>,
        is_final: bool,
    ) {
        if !is_final {
            self.interim_text = text;
            return;
        }
        if !self.validate_text(&text) {
            return;
        }

        let meta = self.pending_transcript.take().unwrap_or_default();
        let seq = meta.seq.unwrap_or(self.transcript_last_seq + 1);
        let mut chunk = TranscriptChunk {
            seq,
            at_ms: at_ms.unwrap_or_else(|| Utc::now().timestamp_millis()),
            speaker: speaker.or(meta.speaker),
            text,
            is_final: true,
            transcript_id: None,
        };

        // Durable write first, then the in-memory path.
        match self
            .deps
            .store
            .insert_transcript(&self.shared.event_id, &chunk)
            .await
        {
            Ok(Some(id)) => chunk.transcript_id = Some(id),
            Ok(None) => {
                tracing::debug!(
                    event_id = %self.shared.event_id,
                    seq,
                    "transcript row already durable, dropping duplicate"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %self.shared.event_id,
                    seq,
                    error = %e,
                    "durable transcript write failed, dropping chunk"
                );
                return;
            }
        }

        self.interim_text.clear();
        self.process_transcript(chunk).await;
    }

    /// Durable path: rows from the change feed or direct ingestion.
    /// Out-of-order arrivals are repaired by the reorder buffer.
    pub(crate) async fn handle_transcript(&mut self, mut chunk: TranscriptChunk) {
        if !self.validate_text(&chunk.text) {
            return;
        }

        // A missing seq is assigned and back-filled durably.
        if chunk.seq == 0 {
            chunk.seq = self.cards_last_seq + 1;
            match self
                .deps
                .store
                .insert_transcript(&self.shared.event_id, &chunk)
                .await
            {
                Ok(Some(id)) => chunk.transcript_id = Some(id),
                Ok(None) => {
                    tracing::debug!(
                        event_id = %self.shared.event_id,
                        seq = chunk.seq,
                        "assigned seq already durable, dropping"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        event_id = %self.shared.event_id,
                        error = %e,
                        "seq back-fill write failed, dropping chunk"
                    );
                    return;
                }
            }
            self.process_transcript(chunk).await;
            return;
        }

        let now_ms = Utc::now().timestamp_millis();
        let outcome = self
            .reorder
            .offer(chunk, self.transcript_last_seq + 1, now_ms);
        if outcome.late {
            tracing::debug!(
                event_id = %self.shared.event_id,
                last_seq = self.transcript_last_seq,
                "late transcript seq, dropping duplicate"
            );
            return;
        }
        for chunk in outcome.released {
            self.process_transcript(chunk).await;
        }
    }

    fn validate_text(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            tracing::warn!(event_id = %self.shared.event_id, "empty transcript text, dropping");
            return false;
        }
        let cap = self.deps.config.runtime.max_transcript_chars;
        if text.len() > cap {
            tracing::warn!(
                event_id = %self.shared.event_id,
                len = text.len(),
                cap,
                "over-length transcript text, dropping"
            );
            return false;
        }
        true
    }

    /// The one ordered path every transcript takes.
    pub(crate) async fn process_transcript(&mut self, chunk: TranscriptChunk) {
        let seq = chunk.seq;
        let is_final = chunk.is_final;
        tracing::debug!(
            event_id = %self.shared.event_id,
            seq,
            is_final,
            "transcript chunk ingested"
        );

        self.ring.add(chunk.clone());
        self.transcript_last_seq = self.transcript_last_seq.max(seq);
        self.cards_last_seq = self.cards_last_seq.max(seq);
        self.facts_last_seq = self.facts_last_seq.max(seq);

        if is_final && self.status == RuntimeStatus::Running {
            self.evaluate_card_trigger(&chunk).await;
            self.schedule_facts(seq);
        }
    }

    /// Replay durable rows above the checkpoints into the ring without
    /// re-triggering cards or facts.
    pub(crate) async fn replay_transcripts(&mut self) -> sh_domain::Result<u64> {
        let after = self.cards_last_seq.max(self.facts_last_seq);
        let rows = self
            .deps
            .store
            .list_transcripts_after(&self.shared.event_id, after, 1_000)
            .await?;
        let mut max_seen = 0u64;
        let count = rows.len();
        for chunk in rows {
            max_seen = max_seen.max(chunk.seq);
            self.ring.add(chunk);
        }
        self.transcript_last_seq = self.transcript_last_seq.max(max_seen);
        self.cards_last_seq = self.cards_last_seq.max(max_seen);
        self.facts_last_seq = self.facts_last_seq.max(max_seen);
        tracing::info!(
            event_id = %self.shared.event_id,
            after,
            replayed = count,
            max_seen,
            "transcript replay complete"
        );
        Ok(max_seen)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Card trigger
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Deterministic and pure over the runtime's current state; the only
    /// side effects are the pending-concept record and the prompt send.
    async fn evaluate_card_trigger(&mut self, chunk: &TranscriptChunk) {
        if !self.enabled_agents.contains(&AgentType::Cards) {
            return;
        }
        let Some(driver) = self.shared.driver(AgentType::Cards) else {
            return;
        };
        let cfg = self.deps.config.cards.clone();

        let recent: Vec<TranscriptChunk> = self
            .ring
            .get_last_n(cfg.window_chunks)
            .into_iter()
            .cloned()
            .collect();
        if recent.len() < cfg.min_chunks {
            return;
        }

        let existing_concept_ids = self.cards.concept_cache();
        let context_bullets = self
            .ring
            .get_context_bullets(cfg.context_limit, CONTEXT_BULLETS_MAX_CHARS);

        let window_text: String = recent
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let glossary_hits: Vec<sh_domain::GlossaryEntry> = self
            .glossary
            .find_in_text(&window_text)
            .into_iter()
            .cloned()
            .collect();
        let fact_pairs = self.facts.key_value_pairs();

        let candidates = extract_concepts(&recent, &glossary_hits, &fact_pairs, &existing_concept_ids);

        let now_ms = Utc::now().timestamp_millis();
        let Some(candidate) = candidates
            .into_iter()
            .find(|c| !self.cards.has_recent_concept(&c.concept_id, cfg.freshness_ms, now_ms))
        else {
            return;
        };
        if count_concept_occurrences(&recent, &candidate.concept_label) < cfg.min_chunks {
            return;
        }

        // Supporting context for the cards agent.
        let label_lower = candidate.concept_label.to_lowercase();
        let mut fact_bullets: Vec<String> = Vec::new();
        for fact in self.facts.get_snapshot(false) {
            if fact_bullets.len() >= cfg.fact_limit {
                break;
            }
            let matches = fact.key.to_lowercase().contains(&label_lower)
                || fact.value_text().to_lowercase().contains(&label_lower);
            if matches {
                fact_bullets.push(format!("- {}: {}", fact.key, fact.value_text()));
            }
        }
        if fact_bullets.is_empty() {
            fact_bullets = self.facts.get_bullets(cfg.fact_limit);
        }

        let mut glossary_matches: Vec<&sh_domain::GlossaryEntry> = glossary_hits
            .iter()
            .filter(|e| {
                let term = e.term.to_lowercase();
                term.contains(&label_lower) || label_lower.contains(&term)
            })
            .collect();
        if glossary_matches.is_empty() {
            glossary_matches = glossary_hits.iter().collect();
        }
        glossary_matches.truncate(cfg.fact_limit);
        let glossary_bullets = GlossaryCache::format_entries(&glossary_matches);

        let supporting = SupportingContext {
            fact_bullets,
            recent_cards: self.cards.recent_cards(cfg.recent_limit),
            glossary_bullets,
            context_bullets,
        };

        self.pending_concepts.insert(
            chunk.seq,
            PendingConcept {
                concept_id: candidate.concept_id.clone(),
                concept_label: candidate.concept_label.clone(),
                triggered_at_ms: now_ms,
            },
        );
        self.cards_turn_gate = Some(chunk.seq);

        let input = cards_turn_input(&candidate.concept_label, chunk.seq, &supporting);
        if let Err(e) = driver.send(ClientEvent::ResponseCreate { input }, true) {
            tracing::warn!(
                event_id = %self.shared.event_id,
                seq = chunk.seq,
                error = %e,
                "cards prompt send failed"
            );
            self.pending_concepts.remove(chunk.seq);
            self.cards_turn_gate = None;
            return;
        }
        tracing::info!(
            event_id = %self.shared.event_id,
            seq = chunk.seq,
            concept = %candidate.concept_label,
            source = ?candidate.source,
            "card trigger fired"
        );
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Facts scheduling
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// No debounce: each finalized chunk schedules directly, but never
    /// more than one facts request in flight per event.
    fn schedule_facts(&mut self, seq: u64) {
        if !self.enabled_agents.contains(&AgentType::Facts) {
            return;
        }
        let Some(driver) = self.shared.driver(AgentType::Facts) else {
            return;
        };
        if self.facts_inflight {
            tracing::debug!(
                event_id = %self.shared.event_id,
                seq,
                "facts request already in flight, coalescing"
            );
            return;
        }

        let transcript_bullets = self
            .ring
            .get_context_bullets(FACTS_TRANSCRIPT_WINDOW, CONTEXT_BULLETS_MAX_CHARS);
        let fact_bullets = self.facts.get_bullets(FACTS_BULLET_LIMIT);
        let recent_text = self.ring.get_recent_text(FACTS_TRANSCRIPT_WINDOW, 1_000);
        let glossary_bullets =
            GlossaryCache::format_entries(&self.glossary.find_in_text(&recent_text));

        let input = facts_turn_input(&transcript_bullets, &fact_bullets, &glossary_bullets);
        match driver.send(ClientEvent::ResponseCreate { input }, true) {
            Ok(()) => {
                self.facts_inflight = true;
                self.facts_request_seq = seq;
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %self.shared.event_id,
                    seq,
                    error = %e,
                    "facts prompt send failed"
                );
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Output normalization
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub(crate) async fn handle_card_response(&mut self, call_id: &str, args: serde_json::Value) {
        let Some(gate_seq) = self.cards_turn_gate.take() else {
            tracing::warn!(
                event_id = %self.shared.event_id,
                call_id,
                "additional produce_card invocation in the same turn, discarding"
            );
            self.ack_tool(AgentType::Cards, call_id, serde_json::json!({"ok": false}));
            return;
        };

        let mut card = match parse_produce_card(&args, Some(gate_seq)) {
            Ok(card) => card,
            Err(e) => {
                tracing::warn!(
                    event_id = %self.shared.event_id,
                    seq = gate_seq,
                    error = %e,
                    "produce_card invocation invalid, discarding"
                );
                self.ack_tool(AgentType::Cards, call_id, serde_json::json!({"ok": false}));
                return;
            }
        };

        if let Some(pending) = self.pending_concepts.remove(card.source_seq) {
            card.concept_id = Some(pending.concept_id);
            card.concept_label = Some(pending.concept_label);
        }

        self.ack_tool(AgentType::Cards, call_id, serde_json::json!({"ok": true}));

        let now_ms = Utc::now().timestamp_millis();
        self.cards.record(card.clone(), now_ms);
        self.cards_last_seq = self.cards_last_seq.max(card.source_seq);

        let event_id = self.shared.event_id.clone();
        match self.deps.store.insert_card(&event_id, &card).await {
            Ok(Some(_id)) => {
                let output = AgentOutputRow {
                    event_id: event_id.clone(),
                    agent_type: AgentType::Cards,
                    output_kind: "card".into(),
                    payload: serde_json::to_value(&card).unwrap_or_default(),
                    source_seq: card.source_seq,
                    created_at: Utc::now(),
                };
                if let Err(e) = self.deps.store.append_agent_output(output).await {
                    tracing::warn!(event_id = %event_id, error = %e, "card output append failed");
                }
                self.deps
                    .push
                    .publish(PushMessage::new(
                        PushKind::CardCreated,
                        &event_id,
                        serde_json::json!({ "card": card }),
                    ))
                    .await;
                tracing::info!(
                    event_id = %event_id,
                    source_seq = card.source_seq,
                    concept_id = card.concept_id.as_deref().unwrap_or("-"),
                    "card persisted"
                );
            }
            Ok(None) => {
                tracing::debug!(
                    event_id = %event_id,
                    source_seq = card.source_seq,
                    "card already persisted for this seq+concept, skipping"
                );
            }
            Err(e) => {
                tracing::warn!(event_id = %event_id, error = %e, "card persist failed");
            }
        }

        if let Err(e) = self
            .deps
            .checkpoints
            .save(&event_id, AgentType::Cards, self.cards_last_seq)
            .await
        {
            tracing::warn!(event_id = %event_id, error = %e, "cards checkpoint save failed");
        }
    }

    pub(crate) async fn handle_facts_response(&mut self, text: &str) {
        self.facts_inflight = false;
        let updates = parse_facts_response(text);
        if updates.is_empty() {
            return;
        }

        let event_id = self.shared.event_id.clone();
        let request_seq = self.facts_request_seq;
        let source_id = self
            .ring
            .get_last_n(1)
            .first()
            .and_then(|c| c.transcript_id.clone());

        let mut evicted: Vec<String> = Vec::new();
        let mut pushed_facts = Vec::new();

        // Reconcile per fact (store upsert, durable upsert, append-log);
        // evictions are aggregated and marked inactive in one batch, so
        // a fact evicted later in the same batch still left a durable row
        // to deactivate.
        for update in updates {
            match update.status {
                Some(FactStatus::Pruned) => {
                    self.facts.prune(&update.key);
                }
                Some(FactStatus::Dormant) => {
                    self.facts.mark_dormant(&update.key, Utc::now(), DORMANCY_DELTA);
                }
                _ => {
                    // An explicit re-selection may revive a dormant fact
                    // (hysteresis applies inside the store).
                    if update.status == Some(FactStatus::Active) {
                        self.facts
                            .revive_from_selection(&update.key, update.confidence, REVIVAL_HYSTERESIS);
                    }
                    let outcome = self.facts.upsert(
                        &update.key,
                        update.value,
                        update.confidence,
                        request_seq,
                        source_id.as_deref(),
                    );
                    evicted.extend(outcome.evicted);
                    if !outcome.applied {
                        continue;
                    }
                    let Some(fact) = self.facts.get(&update.key).cloned() else {
                        continue; // evicted by its own insert
                    };
                    if let Err(e) = self.deps.store.upsert_fact(&event_id, &fact).await {
                        tracing::warn!(
                            event_id = %event_id,
                            key = %update.key,
                            error = %e,
                            "fact upsert failed"
                        );
                        continue;
                    }
                    let output = AgentOutputRow {
                        event_id: event_id.clone(),
                        agent_type: AgentType::Facts,
                        output_kind: "fact".into(),
                        payload: serde_json::to_value(&fact).unwrap_or_default(),
                        source_seq: request_seq,
                        created_at: Utc::now(),
                    };
                    if let Err(e) = self.deps.store.append_agent_output(output).await {
                        tracing::warn!(event_id = %event_id, error = %e, "fact output append failed");
                    }
                    pushed_facts.push(serde_json::json!({
                        "key": fact.key,
                        "value": fact.value,
                        "confidence": fact.confidence,
                    }));
                }
            }
        }
        evicted.extend(self.facts.drain_pruned());

        if !evicted.is_empty() {
            evicted.sort();
            evicted.dedup();
            if let Err(e) = self.deps.store.mark_facts_inactive(&event_id, &evicted).await {
                tracing::warn!(
                    event_id = %event_id,
                    keys = evicted.len(),
                    error = %e,
                    "bulk mark-inactive failed"
                );
            }
        }

        if !pushed_facts.is_empty() || !evicted.is_empty() {
            self.deps
                .push
                .publish(PushMessage::new(
                    PushKind::FactUpdate,
                    &event_id,
                    serde_json::json!({ "facts": pushed_facts, "evicted": evicted }),
                ))
                .await;
        }

        self.facts_last_seq = self.facts_last_seq.max(request_seq);
        if let Err(e) = self
            .deps
            .checkpoints
            .save(&event_id, AgentType::Facts, self.facts_last_seq)
            .await
        {
            tracing::warn!(event_id = %event_id, error = %e, "facts checkpoint save failed");
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Tool calls & turn bookkeeping
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub(crate) async fn handle_tool_call(
        &mut self,
        agent_type: AgentType,
        call_id: &str,
        name: &str,
        args: serde_json::Value,
    ) {
        let dispatcher = ToolDispatcher::new(
            self.deps.store.clone(),
            self.deps.embedder.clone(),
            &self.shared.event_id,
        );
        let output = match dispatcher.dispatch(name, &args).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    event_id = %self.shared.event_id,
                    agent_type = %agent_type,
                    tool = name,
                    error = %e,
                    "tool dispatch failed"
                );
                serde_json::json!({ "error": e.to_string() })
            }
        };
        self.ack_tool(agent_type, call_id, output);
    }

    pub(crate) fn handle_response_completed(&mut self, agent_type: AgentType) {
        match agent_type {
            AgentType::Cards => {
                // Turn over; an unconsumed pending concept stays until
                // the TTL sweep collects it.
                self.cards_turn_gate = None;
            }
            AgentType::Facts => {
                self.facts_inflight = false;
            }
            AgentType::Transcript => {}
        }
    }

    fn ack_tool(&self, agent_type: AgentType, call_id: &str, output: serde_json::Value) {
        let Some(driver) = self.shared.driver(agent_type) else {
            return;
        };
        if let Err(e) = driver.send(
            ClientEvent::ToolResult {
                call_id: call_id.to_owned(),
                output,
            },
            false,
        ) {
            tracing::warn!(
                event_id = %self.shared.event_id,
                agent_type = %agent_type,
                error = %e,
                "tool result send failed"
            );
        }
    }
}
