//! Recent-card ring and concept-recency cache; suppresses duplicate
//! cards for the same normalized concept inside the freshness window.
//!
//! Time is passed in by the caller (unix millis) so suppression windows
//! are exactly testable.

use std::collections::{HashMap, HashSet, VecDeque};

use sh_domain::Card;

pub struct CardsStore {
    recent: VecDeque<Card>,
    max_recent: usize,
    /// concept_id -> last emission time (unix ms).
    concept_seen_at: HashMap<String, i64>,
}

impl CardsStore {
    pub fn new(max_recent: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(max_recent.min(32)),
            max_recent: max_recent.max(1),
            concept_seen_at: HashMap::new(),
        }
    }

    /// Record an emitted card.
    pub fn record(&mut self, card: Card, now_ms: i64) {
        if let Some(concept_id) = &card.concept_id {
            self.concept_seen_at.insert(concept_id.clone(), now_ms);
        }
        self.recent.push_back(card);
        while self.recent.len() > self.max_recent {
            self.recent.pop_front();
        }
    }

    /// Was a card for this concept emitted within the freshness window?
    pub fn has_recent_concept(&self, concept_id: &str, freshness_ms: i64, now_ms: i64) -> bool {
        self.concept_seen_at
            .get(concept_id)
            .map(|seen| now_ms - seen < freshness_ms)
            .unwrap_or(false)
    }

    /// All concept ids with any cached emission.
    pub fn concept_cache(&self) -> HashSet<String> {
        self.concept_seen_at.keys().cloned().collect()
    }

    /// Most recent `n` cards, newest last.
    pub fn recent_cards(&self, n: usize) -> Vec<Card> {
        self.recent
            .iter()
            .rev()
            .take(n)
            .rev()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}
