use serde::{Deserialize, Serialize};

/// One pre-built glossary entry. Loaded once per runtime; read-only
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub term: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acronym_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub usage_examples: Vec<String>,
    #[serde(default)]
    pub related_terms: Vec<String>,
    #[serde(default)]
    pub confidence_score: f64,
}

impl GlossaryEntry {
    /// Render as a context bullet:
    /// `- term: definition (Stands for: X) [category]`.
    pub fn bullet(&self) -> String {
        let mut line = format!("- {}: {}", self.term, self.definition);
        if let Some(acronym) = &self.acronym_for {
            line.push_str(&format!(" (Stands for: {acronym})"));
        }
        if let Some(category) = &self.category {
            line.push_str(&format!(" [{category}]"));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> GlossaryEntry {
        GlossaryEntry {
            term: "RAG".into(),
            definition: "retrieval-augmented generation".into(),
            acronym_for: Some("Retrieval-Augmented Generation".into()),
            category: Some("ml".into()),
            usage_examples: vec![],
            related_terms: vec![],
            confidence_score: 0.9,
        }
    }

    #[test]
    fn bullet_full() {
        assert_eq!(
            entry().bullet(),
            "- RAG: retrieval-augmented generation (Stands for: Retrieval-Augmented Generation) [ml]"
        );
    }

    #[test]
    fn bullet_minimal() {
        let mut e = entry();
        e.acronym_for = None;
        e.category = None;
        assert_eq!(e.bullet(), "- RAG: retrieval-augmented generation");
    }
}
