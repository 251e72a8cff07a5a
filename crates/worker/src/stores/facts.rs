//! Bounded key→fact map with confidence dynamics, dormancy, pruning,
//! and capacity eviction.
//!
//! Every operation is synchronous and non-throwing: invalid inputs are
//! rejected with a warning and the store is left untouched. Evictions
//! and prunes are reported back to the caller, which reconciles them
//! with the durable store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use sh_domain::fact::{clamp_confidence, CONFIDENCE_MIN, MAX_FACT_SOURCES};
use sh_domain::Fact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FactsStats {
    pub total: usize,
    pub dormant: usize,
}

/// Result of one upsert.
#[derive(Debug, Default)]
pub struct UpsertOutcome {
    /// Keys removed by capacity enforcement (mark inactive durably).
    pub evicted: Vec<String>,
    /// Whether the store changed at all.
    pub applied: bool,
}

pub struct FactsStore {
    facts: HashMap<String, Fact>,
    max_items: usize,
    /// Pruned keys awaiting durable reconciliation.
    prune_queue: Vec<String>,
}

impl FactsStore {
    pub fn new(max_items: usize) -> Self {
        Self {
            facts: HashMap::new(),
            max_items: max_items.max(1),
            prune_queue: Vec::new(),
        }
    }

    /// Insert or update a fact, applying the confidence dynamics:
    /// same value `+0.1` (cap 1.0), differing value `−0.2` (floor 0.1).
    pub fn upsert(
        &mut self,
        key: &str,
        value: serde_json::Value,
        confidence: f64,
        source_seq: u64,
        source_id: Option<&str>,
    ) -> UpsertOutcome {
        let key = key.trim();
        if key.is_empty() {
            tracing::warn!("facts upsert with empty key, ignoring");
            return UpsertOutcome::default();
        }
        let Some(confidence) = clamp_confidence(confidence) else {
            tracing::warn!(key = %key, "facts upsert with non-finite confidence, ignoring");
            return UpsertOutcome::default();
        };

        let now = Utc::now();
        match self.facts.get_mut(key) {
            Some(fact) => {
                if fact.value == value {
                    fact.confidence = (fact.confidence + 0.1).min(1.0);
                } else {
                    fact.confidence = (fact.confidence - 0.2).max(CONFIDENCE_MIN);
                    fact.value = value;
                }
                fact.last_seen_seq = fact.last_seen_seq.max(source_seq);
                fact.miss_streak = 0;
                fact.last_touched_at = now;
                if let Some(id) = source_id {
                    push_source(&mut fact.sources, id);
                }
            }
            None => {
                let mut sources = Vec::new();
                if let Some(id) = source_id {
                    sources.push(id.to_owned());
                }
                self.facts.insert(
                    key.to_owned(),
                    Fact {
                        key: key.to_owned(),
                        value,
                        confidence,
                        last_seen_seq: source_seq,
                        sources,
                        merged_from: Vec::new(),
                        merged_at: None,
                        miss_streak: 0,
                        created_at: now,
                        last_touched_at: now,
                        dormant_at: None,
                        pruned_at: None,
                    },
                );
            }
        }

        UpsertOutcome {
            evicted: self.enforce_capacity(),
            applied: true,
        }
    }

    /// Bulk insert from a durable snapshot. Returns evicted keys.
    pub fn load_facts(&mut self, snapshot: Vec<Fact>) -> Vec<String> {
        for fact in snapshot {
            if fact.key.trim().is_empty() || !fact.confidence.is_finite() {
                tracing::warn!(key = %fact.key, "skipping malformed fact in snapshot");
                continue;
            }
            self.facts.insert(fact.key.clone(), fact);
        }
        self.enforce_capacity()
    }

    /// Drop the lowest `(confidence, last_seen_seq)` facts until the
    /// store fits its capacity again.
    fn enforce_capacity(&mut self) -> Vec<String> {
        if self.facts.len() <= self.max_items {
            return Vec::new();
        }
        let mut ranked: Vec<(String, f64, u64)> = self
            .facts
            .values()
            .map(|f| (f.key.clone(), f.confidence, f.last_seen_seq))
            .collect();
        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        });

        let excess = self.facts.len() - self.max_items;
        let mut evicted = Vec::with_capacity(excess);
        for (key, _, _) in ranked.into_iter().take(excess) {
            self.facts.remove(&key);
            evicted.push(key);
        }
        evicted
    }

    // ── dormancy & pruning ───────────────────────────────────────────

    /// Park a fact: drop its confidence by `delta` and exclude it from
    /// default snapshots.
    pub fn mark_dormant(&mut self, key: &str, now: DateTime<Utc>, delta: f64) {
        let Some(fact) = self.facts.get_mut(key) else {
            return;
        };
        if !delta.is_finite() {
            tracing::warn!(key = %key, "non-finite dormancy delta, ignoring");
            return;
        }
        fact.dormant_at = Some(now);
        fact.confidence = (fact.confidence - delta).max(CONFIDENCE_MIN);
        fact.last_touched_at = now;
    }

    /// Revive a dormant fact only when the new confidence clears the
    /// hysteresis band above the parked confidence; otherwise no-op.
    pub fn revive_from_selection(&mut self, key: &str, new_confidence: f64, hysteresis: f64) {
        let Some(fact) = self.facts.get_mut(key) else {
            return;
        };
        if fact.dormant_at.is_none() {
            return;
        }
        let Some(new_confidence) = clamp_confidence(new_confidence) else {
            return;
        };
        if new_confidence - fact.confidence >= hysteresis {
            fact.dormant_at = None;
            fact.confidence = new_confidence;
            fact.last_touched_at = Utc::now();
        }
    }

    /// Remove a fact from the live view; the key lands on the drain
    /// queue for durable reconciliation.
    pub fn prune(&mut self, key: &str) {
        if self.facts.remove(key).is_some() {
            self.prune_queue.push(key.to_owned());
        }
    }

    /// Take everything pruned since the last drain.
    pub fn drain_pruned(&mut self) -> Vec<String> {
        std::mem::take(&mut self.prune_queue)
    }

    // ── views ────────────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<&Fact> {
        self.facts.get(key)
    }

    /// Live facts, highest confidence first. Dormant facts excluded
    /// unless asked for.
    pub fn get_snapshot(&self, include_dormant: bool) -> Vec<&Fact> {
        let mut facts: Vec<&Fact> = self
            .facts
            .values()
            .filter(|f| include_dormant || f.dormant_at.is_none())
            .collect();
        facts.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_seen_seq.cmp(&a.last_seen_seq))
        });
        facts
    }

    pub fn get_all(&self) -> Vec<&Fact> {
        self.facts.values().collect()
    }

    /// `key: value (0.80)` lines for prompt context.
    pub fn get_context_format(&self) -> String {
        self.get_snapshot(false)
            .iter()
            .map(|f| format!("{}: {} ({:.2})", f.key, f.value_text(), f.confidence))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `- key: value` bullets, capped.
    pub fn get_bullets(&self, limit: usize) -> Vec<String> {
        self.get_snapshot(false)
            .iter()
            .take(limit)
            .map(|f| format!("- {}: {}", f.key, f.value_text()))
            .collect()
    }

    /// `(key, stringified value)` pairs for concept matching.
    pub fn key_value_pairs(&self) -> Vec<(String, String)> {
        self.get_snapshot(false)
            .iter()
            .map(|f| (f.key.clone(), f.value_text()))
            .collect()
    }

    pub fn get_stats(&self) -> FactsStats {
        FactsStats {
            total: self.facts.len(),
            dormant: self.facts.values().filter(|f| f.dormant_at.is_some()).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

fn push_source(sources: &mut Vec<String>, id: &str) {
    if let Some(pos) = sources.iter().position(|s| s == id) {
        sources.remove(pos);
    }
    sources.push(id.to_owned());
    while sources.len() > MAX_FACT_SOURCES {
        sources.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(cap: usize) -> FactsStore {
        FactsStore::new(cap)
    }

    #[test]
    fn new_fact_keeps_given_confidence() {
        let mut s = store(10);
        s.upsert("deadline", serde_json::json!("January 15"), 0.7, 4, None);
        assert_eq!(s.get("deadline").unwrap().confidence, 0.7);
    }

    #[test]
    fn same_value_reinforces_different_value_decays() {
        let mut s = store(10);
        s.upsert("deadline", serde_json::json!("January 15"), 0.7, 4, None);
        s.upsert("deadline", serde_json::json!("January 15"), 0.7, 5, None);
        let fact = s.get("deadline").unwrap();
        assert!((fact.confidence - 0.8).abs() < 1e-9);
        assert_eq!(fact.last_seen_seq, 5);

        s.upsert("deadline", serde_json::json!("February 1"), 0.7, 6, None);
        let fact = s.get("deadline").unwrap();
        assert!((fact.confidence - 0.6).abs() < 1e-9);
        assert_eq!(fact.value_text(), "February 1");
    }

    #[test]
    fn confidence_clamps_at_both_ends() {
        let mut s = store(10);
        s.upsert("k", serde_json::json!(1), 0.95, 1, None);
        s.upsert("k", serde_json::json!(1), 0.95, 2, None);
        assert_eq!(s.get("k").unwrap().confidence, 1.0);

        let mut s = store(10);
        s.upsert("k", serde_json::json!(1), 0.2, 1, None);
        s.upsert("k", serde_json::json!(2), 0.2, 2, None);
        s.upsert("k", serde_json::json!(3), 0.2, 3, None);
        assert_eq!(s.get("k").unwrap().confidence, 0.1);
    }

    #[test]
    fn capacity_evicts_lowest_confidence_then_oldest_seq() {
        let mut s = store(3);
        s.upsert("a", serde_json::json!(1), 0.9, 1, None);
        s.upsert("b", serde_json::json!(1), 0.8, 2, None);
        s.upsert("c", serde_json::json!(1), 0.7, 3, None);
        let outcome = s.upsert("d", serde_json::json!(1), 0.95, 4, None);
        assert_eq!(outcome.evicted, vec!["c".to_owned()]);
        let mut keys: Vec<&str> = s.get_all().iter().map(|f| f.key.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "d"]);
    }

    #[test]
    fn eviction_ties_break_on_last_seen_seq() {
        let mut s = store(2);
        s.upsert("old", serde_json::json!(1), 0.5, 1, None);
        s.upsert("new", serde_json::json!(1), 0.5, 9, None);
        let outcome = s.upsert("top", serde_json::json!(1), 0.9, 10, None);
        assert_eq!(outcome.evicted, vec!["old".to_owned()]);
    }

    #[test]
    fn invalid_inputs_are_rejected_silently() {
        let mut s = store(10);
        let outcome = s.upsert("", serde_json::json!(1), 0.5, 1, None);
        assert!(!outcome.applied);
        let outcome = s.upsert("k", serde_json::json!(1), f64::NAN, 1, None);
        assert!(!outcome.applied);
        assert!(s.is_empty());
    }

    #[test]
    fn sources_are_an_insertion_ordered_capped_set() {
        let mut s = store(10);
        for i in 0..12 {
            s.upsert("k", serde_json::json!(1), 0.5, i, Some(&format!("t{i}")));
        }
        let sources = &s.get("k").unwrap().sources;
        assert_eq!(sources.len(), MAX_FACT_SOURCES);
        assert_eq!(sources.first().unwrap(), "t2");
        assert_eq!(sources.last().unwrap(), "t11");

        // Re-seen source moves to the back instead of duplicating.
        s.upsert("k", serde_json::json!(1), 0.5, 20, Some("t5"));
        let sources = &s.get("k").unwrap().sources;
        assert_eq!(sources.iter().filter(|s| s.as_str() == "t5").count(), 1);
        assert_eq!(sources.last().unwrap(), "t5");
    }

    #[test]
    fn dormancy_excludes_from_default_snapshot() {
        let mut s = store(10);
        s.upsert("k", serde_json::json!(1), 0.5, 1, None);
        s.mark_dormant("k", Utc::now(), 0.1);
        assert!(s.get_snapshot(false).is_empty());
        assert_eq!(s.get_snapshot(true).len(), 1);
        assert!((s.get("k").unwrap().confidence - 0.4).abs() < 1e-9);
        assert_eq!(s.get_stats().dormant, 1);
    }

    #[test]
    fn revival_requires_hysteresis() {
        let mut s = store(10);
        s.upsert("k", serde_json::json!(1), 0.5, 1, None);
        s.mark_dormant("k", Utc::now(), 0.1); // now 0.4

        s.revive_from_selection("k", 0.45, 0.2);
        assert!(s.get("k").unwrap().dormant_at.is_some(), "0.05 < hysteresis");

        s.revive_from_selection("k", 0.7, 0.2);
        let fact = s.get("k").unwrap();
        assert!(fact.dormant_at.is_none());
        assert_eq!(fact.confidence, 0.7);
    }

    #[test]
    fn prune_moves_keys_to_the_drain_queue() {
        let mut s = store(10);
        s.upsert("k", serde_json::json!(1), 0.5, 1, None);
        s.prune("k");
        s.prune("missing");
        assert!(s.get("k").is_none());
        assert_eq!(s.drain_pruned(), vec!["k".to_owned()]);
        assert!(s.drain_pruned().is_empty(), "drain empties the queue");
    }

    #[test]
    fn load_facts_respects_capacity() {
        let mut s = store(2);
        let snapshot: Vec<Fact> = (0..4)
            .map(|i| Fact {
                key: format!("k{i}"),
                value: serde_json::json!(i),
                confidence: 0.1 * (i as f64 + 1.0),
                last_seen_seq: i,
                sources: vec![],
                merged_from: vec![],
                merged_at: None,
                miss_streak: 0,
                created_at: Utc::now(),
                last_touched_at: Utc::now(),
                dormant_at: None,
                pruned_at: None,
            })
            .collect();
        let evicted = s.load_facts(snapshot);
        assert_eq!(evicted.len(), 2);
        assert_eq!(s.len(), 2);
        // The two lowest-confidence snapshot rows are the ones evicted.
        assert!(evicted.contains(&"k0".to_owned()));
        assert!(evicted.contains(&"k1".to_owned()));
    }
}
