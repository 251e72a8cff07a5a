use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Card shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the card is about, at a coarse grain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    #[default]
    Explainer,
    Definition,
    Reference,
}

/// Presentation shape; drives which fields are required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    /// `body` required; no image, no label.
    Text,
    /// `body` required; image_url or visual_request present.
    TextVisual,
    /// `label` required; no body; image_url or visual_request present.
    Visual,
}

impl CardType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(CardType::Text),
            "text_visual" => Some(CardType::TextVisual),
            "visual" => Some(CardType::Visual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualStrategy {
    Fetch,
    Generate,
}

/// Instructions for sourcing or generating a card image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualRequest {
    pub strategy: VisualStrategy,
    pub instructions: String,
    pub source_url: Option<String>,
}

/// An emitted explainer artifact tied to a transcript sequence and a
/// normalized concept. Persisted once per `(event, source_seq, concept)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    #[serde(default)]
    pub kind: CardKind,
    pub card_type: CardType,
    pub title: String,
    pub body: Option<String>,
    pub label: Option<String>,
    pub image_url: Option<String>,
    pub source_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_request: Option<VisualRequest>,
}

impl Card {
    /// Whether the card carries a visual in some form.
    pub fn has_visual(&self) -> bool {
        self.image_url.is_some() || self.visual_request.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_type_spellings() {
        assert_eq!(CardType::parse("text"), Some(CardType::Text));
        assert_eq!(CardType::parse("text_visual"), Some(CardType::TextVisual));
        assert_eq!(CardType::parse("visual"), Some(CardType::Visual));
        assert_eq!(CardType::parse("hologram"), None);
    }

    #[test]
    fn wire_format_uses_snake_case_type() {
        let json = serde_json::to_string(&CardType::TextVisual).unwrap();
        assert_eq!(json, "\"text_visual\"");
    }
}
