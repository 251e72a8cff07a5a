//! Turn-input assembly for the cards and facts agents.
//!
//! The runtime hands in prepared context blocks (glossary bullets, fact
//! bullets, transcript bullets); this module lays them out into the
//! single text input of a `response.create`. Every block is char-capped
//! so one noisy source cannot crowd out the rest.

use sh_domain::Card;

/// Per-block character ceilings.
const GLOSSARY_BLOCK_CAP: usize = 2_000;
const FACTS_BLOCK_CAP: usize = 2_000;
const TRANSCRIPT_BLOCK_CAP: usize = 4_000;
const CARDS_BLOCK_CAP: usize = 1_000;

/// Supporting context assembled by the card trigger: matching facts,
/// recently shown cards, matching glossary entries, context bullets.
#[derive(Debug, Clone, Default)]
pub struct SupportingContext {
    pub fact_bullets: Vec<String>,
    pub recent_cards: Vec<Card>,
    pub glossary_bullets: Vec<String>,
    pub context_bullets: Vec<String>,
}

/// Build the cards-agent turn input for one triggered concept.
pub fn cards_turn_input(
    concept_label: &str,
    source_seq: u64,
    supporting: &SupportingContext,
) -> String {
    let mut input = String::new();
    input.push_str(&format!(
        "Concept to explain: {concept_label}\nSource sequence: {source_seq}\n"
    ));

    push_block(
        &mut input,
        "Recent transcript",
        &supporting.context_bullets.join("\n"),
        TRANSCRIPT_BLOCK_CAP,
    );
    push_block(
        &mut input,
        "Known facts",
        &supporting.fact_bullets.join("\n"),
        FACTS_BLOCK_CAP,
    );
    push_block(
        &mut input,
        "Glossary",
        &supporting.glossary_bullets.join("\n"),
        GLOSSARY_BLOCK_CAP,
    );

    if !supporting.recent_cards.is_empty() {
        let recent = supporting
            .recent_cards
            .iter()
            .map(|c| format!("- {} (concept: {})", c.title, c.concept_label.as_deref().unwrap_or("-")))
            .collect::<Vec<_>>()
            .join("\n");
        push_block(&mut input, "Recently shown cards", &recent, CARDS_BLOCK_CAP);
    }

    input
}

/// Build the facts-agent turn input for one finalized chunk window.
pub fn facts_turn_input(
    transcript_bullets: &[String],
    fact_bullets: &[String],
    glossary_bullets: &[String],
) -> String {
    let mut input = String::new();
    push_block(
        &mut input,
        "Recent transcript",
        &transcript_bullets.join("\n"),
        TRANSCRIPT_BLOCK_CAP,
    );
    push_block(
        &mut input,
        "Current facts",
        &fact_bullets.join("\n"),
        FACTS_BLOCK_CAP,
    );
    push_block(
        &mut input,
        "Glossary",
        &glossary_bullets.join("\n"),
        GLOSSARY_BLOCK_CAP,
    );
    input
}

fn push_block(out: &mut String, heading: &str, body: &str, cap: usize) {
    if body.is_empty() {
        return;
    }
    out.push_str(&format!("\n## {heading}\n"));
    out.push_str(&truncate_left(body, cap));
    out.push('\n');
}

/// Keep the tail of `s` (recency wins), respecting char boundaries.
fn truncate_left(s: &str, max_chars: usize) -> &str {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s;
    }
    let skip = char_count - max_chars;
    match s.char_indices().nth(skip) {
        Some((byte_idx, _)) => &s[byte_idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cards_input_names_the_concept() {
        let supporting = SupportingContext {
            context_bullets: vec!["[Ana] vector embeddings".into()],
            fact_bullets: vec!["- deadline: January 15".into()],
            ..Default::default()
        };
        let input = cards_turn_input("vector embeddings", 3, &supporting);
        assert!(input.starts_with("Concept to explain: vector embeddings"));
        assert!(input.contains("Source sequence: 3"));
        assert!(input.contains("## Recent transcript"));
        assert!(input.contains("## Known facts"));
        assert!(!input.contains("## Glossary"), "empty blocks are omitted");
    }

    #[test]
    fn facts_input_omits_empty_blocks() {
        let input = facts_turn_input(&["line".into()], &[], &[]);
        assert!(input.contains("## Recent transcript"));
        assert!(!input.contains("## Current facts"));
    }

    #[test]
    fn truncation_keeps_the_tail() {
        let body = "old old old NEW";
        assert_eq!(truncate_left(body, 3), "NEW");
        assert_eq!(truncate_left(body, 100), body);
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let body = "héllo wörld";
        let tail = truncate_left(body, 4);
        assert_eq!(tail, "örld");
    }
}
