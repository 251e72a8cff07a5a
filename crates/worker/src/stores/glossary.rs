//! Preloaded lowercase term→entry map with phrase lookup.

use std::collections::HashMap;

use sh_domain::GlossaryEntry;

/// Max entries returned by one phrase lookup.
const LOOKUP_LIMIT: usize = 15;
/// Longest phrase window, in words.
const MAX_WINDOW: usize = 4;

pub struct GlossaryCache {
    entries: HashMap<String, GlossaryEntry>,
}

impl GlossaryCache {
    /// Build from the event's active glossary entries, keyed by
    /// lowercase term. Later duplicates win.
    pub fn new(entries: Vec<GlossaryEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| (e.term.to_lowercase(), e))
            .collect();
        Self { entries }
    }

    pub fn get(&self, term: &str) -> Option<&GlossaryEntry> {
        self.entries.get(&term.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find glossary terms appearing in `text` by walking successive
    /// windows of 1–4 normalized words. Up to 15 entries, sorted by
    /// descending confidence score.
    pub fn find_in_text(&self, text: &str) -> Vec<&GlossaryEntry> {
        let words: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .map(str::to_owned)
            .collect();

        let mut found: Vec<&GlossaryEntry> = Vec::new();
        let mut seen_terms: std::collections::HashSet<&str> = std::collections::HashSet::new();

        for start in 0..words.len() {
            for window in 1..=MAX_WINDOW.min(words.len() - start) {
                let phrase = words[start..start + window].join(" ");
                if let Some(entry) = self.entries.get(&phrase) {
                    if seen_terms.insert(entry.term.as_str()) {
                        found.push(entry);
                    }
                }
            }
        }

        found.sort_by(|a, b| {
            b.confidence_score
                .partial_cmp(&a.confidence_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        found.truncate(LOOKUP_LIMIT);
        found
    }

    /// Render entries as context bullets.
    pub fn format_entries(entries: &[&GlossaryEntry]) -> Vec<String> {
        entries.iter().map(|e| e.bullet()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: &str, confidence: f64) -> GlossaryEntry {
        GlossaryEntry {
            term: term.into(),
            definition: format!("definition of {term}"),
            acronym_for: None,
            category: None,
            usage_examples: vec![],
            related_terms: vec![],
            confidence_score: confidence,
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let cache = GlossaryCache::new(vec![entry("RAG", 0.9)]);
        assert!(cache.get("rag").is_some());
        assert!(cache.get("Rag").is_some());
    }

    #[test]
    fn phrase_windows_up_to_four_words() {
        let cache = GlossaryCache::new(vec![
            entry("vector embeddings", 0.8),
            entry("retrieval augmented generation pipeline", 0.9),
        ]);
        let hits = cache.find_in_text(
            "We built a retrieval augmented generation pipeline over vector embeddings.",
        );
        let terms: Vec<&str> = hits.iter().map(|e| e.term.as_str()).collect();
        // Higher confidence first.
        assert_eq!(
            terms,
            vec!["retrieval augmented generation pipeline", "vector embeddings"]
        );
    }

    #[test]
    fn punctuation_does_not_break_matching() {
        let cache = GlossaryCache::new(vec![entry("vector embeddings", 0.8)]);
        let hits = cache.find_in_text("Let's talk: vector, embeddings? No — vector embeddings!");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn lookup_caps_at_fifteen() {
        let entries: Vec<GlossaryEntry> = (0..30).map(|i| entry(&format!("term{i}"), 0.5)).collect();
        let cache = GlossaryCache::new(entries);
        let text = (0..30).map(|i| format!("term{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(cache.find_in_text(&text).len(), 15);
    }

    #[test]
    fn formatting_uses_the_bullet_shape() {
        let cache = GlossaryCache::new(vec![entry("rag", 0.9)]);
        let hits = cache.find_in_text("rag");
        let bullets = GlossaryCache::format_entries(&hits);
        assert_eq!(bullets, vec!["- rag: definition of rag".to_owned()]);
    }
}
