//! `seq → concept` mapping for in-flight card turns.
//!
//! An entry is removed either when the corresponding card is emitted or
//! by the TTL sweep (10 × the card freshness window), so dropped model
//! responses cannot leak entries.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PendingConcept {
    pub concept_id: String,
    pub concept_label: String,
    pub triggered_at_ms: i64,
}

#[derive(Default)]
pub struct PendingCardConcepts {
    pending: HashMap<u64, PendingConcept>,
}

impl PendingCardConcepts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source_seq: u64, concept: PendingConcept) {
        self.pending.insert(source_seq, concept);
    }

    /// Take the concept recorded for this seq, if any.
    pub fn remove(&mut self, source_seq: u64) -> Option<PendingConcept> {
        self.pending.remove(&source_seq)
    }

    pub fn contains(&self, source_seq: u64) -> bool {
        self.pending.contains_key(&source_seq)
    }

    /// Drop entries older than `ttl_ms`. Returns how many went away.
    pub fn sweep(&mut self, now_ms: i64, ttl_ms: i64) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, c| now_ms - c.triggered_at_ms < ttl_ms);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concept(at_ms: i64) -> PendingConcept {
        PendingConcept {
            concept_id: "vector-embeddings".into(),
            concept_label: "vector embeddings".into(),
            triggered_at_ms: at_ms,
        }
    }

    #[test]
    fn remove_takes_the_entry() {
        let mut pending = PendingCardConcepts::new();
        pending.insert(3, concept(100));
        assert!(pending.contains(3));
        assert!(pending.remove(3).is_some());
        assert!(pending.remove(3).is_none());
    }

    #[test]
    fn sweep_drops_only_expired_entries() {
        let mut pending = PendingCardConcepts::new();
        pending.insert(1, concept(0));
        pending.insert(2, concept(900));
        let removed = pending.sweep(1_000, 500);
        assert_eq!(removed, 1);
        assert!(!pending.contains(1));
        assert!(pending.contains(2));
    }
}
