//! Concept extraction for the card trigger.
//!
//! Candidates are ranked by signal strength: glossary match > fact match
//! > capitalised phrase > noun phrase. The caller supplies the glossary
//! hits (phrase lookup happens against the runtime's glossary cache) and
//! the current fact snapshot; extraction itself is pure.

use std::collections::HashSet;

use sh_domain::{GlossaryEntry, TranscriptChunk};

/// Where a candidate came from; doubles as its rank (strongest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConceptSource {
    Glossary,
    Fact,
    CapitalizedPhrase,
    NounPhrase,
}

#[derive(Debug, Clone)]
pub struct ConceptCandidate {
    pub concept_id: String,
    pub concept_label: String,
    pub source: ConceptSource,
}

/// Normalise a label into a stable concept id.
pub fn concept_id(label: &str) -> String {
    let mut id = String::with_capacity(label.len());
    let mut last_was_sep = true;
    for c in label.chars() {
        if c.is_alphanumeric() {
            id.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            id.push('-');
            last_was_sep = true;
        }
    }
    id.trim_end_matches('-').to_owned()
}

/// Number of recent chunks whose text contains the label
/// (case-insensitive substring).
pub fn count_concept_occurrences(chunks: &[TranscriptChunk], label: &str) -> usize {
    let needle = label.to_lowercase();
    if needle.is_empty() {
        return 0;
    }
    chunks
        .iter()
        .filter(|c| c.text.to_lowercase().contains(&needle))
        .count()
}

/// Extract ranked concept candidates from the recent window.
///
/// `existing_concept_ids` filters out concepts that already have a card
/// in the recency cache; the freshness check happens again at trigger
/// time, this is just an early cut.
pub fn extract_concepts(
    chunks: &[TranscriptChunk],
    glossary_hits: &[GlossaryEntry],
    fact_keys_and_values: &[(String, String)],
    existing_concept_ids: &HashSet<String>,
) -> Vec<ConceptCandidate> {
    let window_text: String = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let window_lower = window_text.to_lowercase();

    let mut seen: HashSet<String> = existing_concept_ids.clone();
    // Labels already claimed (existing ids de-slugged plus candidates
    // pushed so far); a bare word contained in one of these is the same
    // concept, not a new one.
    let mut claimed_labels: Vec<String> = existing_concept_ids
        .iter()
        .map(|id| id.replace('-', " "))
        .collect();
    let mut candidates = Vec::new();
    let mut push = |label: &str, source: ConceptSource, candidates: &mut Vec<ConceptCandidate>| {
        let id = concept_id(label);
        if id.is_empty() || !seen.insert(id.clone()) {
            return;
        }
        let label_lower = label.to_lowercase();
        if !label_lower.contains(' ')
            && claimed_labels.iter().any(|c| c.contains(&label_lower))
        {
            return;
        }
        claimed_labels.push(label_lower);
        candidates.push(ConceptCandidate {
            concept_id: id,
            concept_label: label.to_owned(),
            source,
        });
    };

    // 1. Glossary terms spotted in the window.
    for entry in glossary_hits {
        push(&entry.term, ConceptSource::Glossary, &mut candidates);
    }

    // 2. Fact keys or values mentioned in the window.
    for (key, value) in fact_keys_and_values {
        let key_label = key.replace('_', " ");
        if !key_label.is_empty() && window_lower.contains(&key_label.to_lowercase()) {
            push(&key_label, ConceptSource::Fact, &mut candidates);
        } else if value.len() >= 4 && window_lower.contains(&value.to_lowercase()) {
            push(value, ConceptSource::Fact, &mut candidates);
        }
    }

    // 3. Capitalised phrases (mid-sentence, 1-4 words).
    for phrase in capitalized_phrases(&window_text) {
        push(&phrase, ConceptSource::CapitalizedPhrase, &mut candidates);
    }

    // 4. Repeated noun phrases (lowercase bigrams, then long unigrams).
    for phrase in repeated_phrases(&window_lower) {
        push(&phrase, ConceptSource::NounPhrase, &mut candidates);
    }

    candidates.sort_by_key(|c| c.source);
    candidates
}

const STOPWORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "from", "have", "about", "are", "was", "were", "will",
    "would", "could", "should", "them", "they", "their", "there", "here", "just", "like", "into",
    "over", "very", "more", "some", "what", "when", "which", "then", "than", "also", "been",
    "because", "talk", "lets", "let's",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Capitalised 1-4 word runs that do not start a sentence.
fn capitalized_phrases(text: &str) -> Vec<String> {
    let mut phrases = Vec::new();
    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        let mut run: Vec<&str> = Vec::new();
        for (i, word) in words.iter().enumerate() {
            let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
            let capitalised = cleaned
                .chars()
                .next()
                .map(|c| c.is_uppercase())
                .unwrap_or(false);
            if capitalised && i > 0 {
                run.push(cleaned);
            } else {
                if !run.is_empty() && run.len() <= 4 && run.iter().any(|w| w.len() > 3) {
                    phrases.push(run.join(" "));
                }
                run.clear();
            }
        }
        if !run.is_empty() && run.len() <= 4 && run.iter().any(|w| w.len() > 3) {
            phrases.push(run.join(" "));
        }
    }
    phrases
}

/// Lowercase phrases that recur in the window: bigrams first (stronger
/// signal), then unigrams of length ≥ 5.
fn repeated_phrases(window_lower: &str) -> Vec<String> {
    use std::collections::HashMap;

    let words: Vec<&str> = window_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut bigram_counts: HashMap<String, usize> = HashMap::new();
    for pair in words.windows(2) {
        if pair.iter().any(|w| is_stopword(w) || w.len() < 3) {
            continue;
        }
        *bigram_counts.entry(pair.join(" ")).or_default() += 1;
    }

    let mut unigram_counts: HashMap<&str, usize> = HashMap::new();
    for word in &words {
        if word.len() >= 5 && !is_stopword(word) {
            *unigram_counts.entry(word).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize, usize)> = Vec::new();
    for (phrase, count) in bigram_counts {
        if count >= 2 {
            ranked.push((phrase, 0, count));
        }
    }
    for (word, count) in unigram_counts {
        if count >= 2 {
            ranked.push((word.to_owned(), 1, count));
        }
    }
    // Bigrams before unigrams, then by frequency.
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)));
    ranked.into_iter().map(|(phrase, _, _)| phrase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64, text: &str) -> TranscriptChunk {
        TranscriptChunk {
            seq,
            at_ms: seq as i64,
            speaker: None,
            text: text.into(),
            is_final: true,
            transcript_id: None,
        }
    }

    fn entry(term: &str) -> GlossaryEntry {
        GlossaryEntry {
            term: term.into(),
            definition: "def".into(),
            acronym_for: None,
            category: None,
            usage_examples: vec![],
            related_terms: vec![],
            confidence_score: 0.9,
        }
    }

    #[test]
    fn glossary_hits_outrank_everything() {
        let chunks = vec![
            chunk(1, "We keep mentioning Kubernetes clusters"),
            chunk(2, "vector embeddings and vector embeddings again"),
        ];
        let candidates = extract_concepts(
            &chunks,
            &[entry("vector embeddings")],
            &[],
            &HashSet::new(),
        );
        assert_eq!(candidates[0].concept_label, "vector embeddings");
        assert_eq!(candidates[0].source, ConceptSource::Glossary);
    }

    #[test]
    fn repeated_noun_phrase_is_found_without_glossary() {
        let chunks = vec![
            chunk(1, "Let's talk about vector embeddings"),
            chunk(2, "embeddings are high-dim vectors"),
            chunk(3, "vector embeddings power search"),
        ];
        let candidates = extract_concepts(&chunks, &[], &[], &HashSet::new());
        assert!(
            candidates
                .iter()
                .any(|c| c.concept_label == "vector embeddings"),
            "expected the repeated bigram, got {candidates:?}"
        );
    }

    #[test]
    fn existing_concepts_are_cut_early() {
        let chunks = vec![
            chunk(1, "vector embeddings here"),
            chunk(2, "vector embeddings there"),
        ];
        let mut existing = HashSet::new();
        existing.insert("vector-embeddings".to_owned());
        let candidates = extract_concepts(&chunks, &[], &[], &existing);
        assert!(candidates
            .iter()
            .all(|c| c.concept_id != "vector-embeddings"));
    }

    #[test]
    fn bare_word_inside_a_claimed_phrase_is_the_same_concept() {
        let chunks = vec![
            chunk(1, "vector embeddings power search"),
            chunk(2, "embeddings keep coming up"),
            chunk(3, "yes, embeddings again"),
        ];
        let mut existing = HashSet::new();
        existing.insert("vector-embeddings".to_owned());
        let candidates = extract_concepts(&chunks, &[], &[], &existing);
        assert!(
            candidates.iter().all(|c| c.concept_id != "embeddings"),
            "the bare unigram must fold into the suppressed phrase: {candidates:?}"
        );
    }

    #[test]
    fn fact_key_match_ranks_above_capitalised_phrase() {
        let chunks = vec![chunk(
            1,
            "The launch date slipped, says Project Orion's team",
        )];
        let candidates = extract_concepts(
            &chunks,
            &[],
            &[("launch_date".into(), "March".into())],
            &HashSet::new(),
        );
        let fact_pos = candidates
            .iter()
            .position(|c| c.source == ConceptSource::Fact)
            .expect("fact candidate");
        let cap_pos = candidates
            .iter()
            .position(|c| c.source == ConceptSource::CapitalizedPhrase);
        if let Some(cap_pos) = cap_pos {
            assert!(fact_pos < cap_pos);
        }
        assert_eq!(candidates[fact_pos].concept_label, "launch date");
    }

    #[test]
    fn occurrence_count_is_case_insensitive() {
        let chunks = vec![
            chunk(1, "Vector Embeddings rock"),
            chunk(2, "nothing relevant"),
            chunk(3, "vector embeddings again"),
        ];
        assert_eq!(count_concept_occurrences(&chunks, "vector embeddings"), 2);
        assert_eq!(count_concept_occurrences(&chunks, ""), 0);
    }

    #[test]
    fn concept_id_slugs() {
        assert_eq!(concept_id("Vector Embeddings"), "vector-embeddings");
        assert_eq!(concept_id("  GPU/TPU  "), "gpu-tpu");
        assert_eq!(concept_id("!!!"), "");
    }
}
