//! Cards-agent output parsing.
//!
//! The cards agent's output is a single `produce_card` tool invocation.
//! This module validates the invocation arguments and applies the
//! card_type field rules:
//!
//! | card_type   | body     | label    | visual                         |
//! |-------------|----------|----------|--------------------------------|
//! | text        | required | dropped  | dropped                        |
//! | text_visual | required | dropped  | image_url or visual_request    |
//! | visual      | dropped  | required | image_url or visual_request    |

use sh_domain::{Card, CardKind, CardType, VisualRequest};

#[derive(Debug, thiserror::Error)]
pub enum CardParseError {
    #[error("produce_card missing required field: {0}")]
    MissingField(&'static str),
    #[error("produce_card has invalid card_type: {0}")]
    BadCardType(String),
    #[error("produce_card {0} card requires image_url or visual_request")]
    MissingVisual(&'static str),
}

/// Validate and normalise one `produce_card` invocation.
///
/// `fallback_seq` backs `source_seq` when the model omitted it (the seq
/// of the chunk that triggered the turn).
pub fn parse_produce_card(
    args: &serde_json::Value,
    fallback_seq: Option<u64>,
) -> Result<Card, CardParseError> {
    let card_type_raw = args
        .get("card_type")
        .and_then(|v| v.as_str())
        .ok_or(CardParseError::MissingField("card_type"))?;
    let card_type = CardType::parse(card_type_raw)
        .ok_or_else(|| CardParseError::BadCardType(card_type_raw.to_owned()))?;

    let title = args
        .get("title")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(CardParseError::MissingField("title"))?;

    let source_seq = args
        .get("source_seq")
        .and_then(|v| v.as_u64())
        .or(fallback_seq)
        .ok_or(CardParseError::MissingField("source_seq"))?;

    let kind = args
        .get("kind")
        .and_then(|v| serde_json::from_value::<CardKind>(v.clone()).ok())
        .unwrap_or_default();

    let body = args
        .get("body")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let label = args
        .get("label")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let image_url = args
        .get("image_url")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let visual_request = args
        .get("visual_request")
        .and_then(|v| serde_json::from_value::<VisualRequest>(v.clone()).ok());
    let template_id = args
        .get("template_id")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let template_label = args
        .get("template_label")
        .and_then(|v| v.as_str())
        .map(str::to_owned);

    // Field rules per card_type.
    let (body, label, image_url, visual_request) = match card_type {
        CardType::Text => {
            if body.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(CardParseError::MissingField("body"));
            }
            (body, None, None, None)
        }
        CardType::TextVisual => {
            if body.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(CardParseError::MissingField("body"));
            }
            if image_url.is_none() && visual_request.is_none() {
                return Err(CardParseError::MissingVisual("text_visual"));
            }
            (body, None, image_url, visual_request)
        }
        CardType::Visual => {
            if label.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(CardParseError::MissingField("label"));
            }
            if image_url.is_none() && visual_request.is_none() {
                return Err(CardParseError::MissingVisual("visual"));
            }
            (None, label, image_url, visual_request)
        }
    };

    Ok(Card {
        kind,
        card_type,
        title: title.to_owned(),
        body,
        label,
        image_url,
        source_seq,
        concept_id: None,
        concept_label: None,
        template_id,
        template_label,
        visual_request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_card_requires_body_and_strips_visuals() {
        let card = parse_produce_card(
            &serde_json::json!({
                "card_type": "text",
                "title": "Vector embeddings",
                "body": "High-dimensional vectors.",
                "label": "stray",
                "image_url": "https://example.com/x.png",
                "source_seq": 3
            }),
            None,
        )
        .unwrap();
        assert_eq!(card.card_type, CardType::Text);
        assert!(card.label.is_none());
        assert!(card.image_url.is_none());
        assert_eq!(card.body.as_deref(), Some("High-dimensional vectors."));
    }

    #[test]
    fn text_card_without_body_fails() {
        let err = parse_produce_card(
            &serde_json::json!({"card_type": "text", "title": "T", "source_seq": 1}),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CardParseError::MissingField("body")));
    }

    #[test]
    fn visual_card_requires_label_and_some_visual() {
        let err = parse_produce_card(
            &serde_json::json!({
                "card_type": "visual",
                "title": "T",
                "label": "diagram",
                "source_seq": 1
            }),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CardParseError::MissingVisual("visual")));

        let card = parse_produce_card(
            &serde_json::json!({
                "card_type": "visual",
                "title": "T",
                "label": "diagram",
                "body": "dropped",
                "source_seq": 1,
                "visual_request": {"strategy": "generate", "instructions": "draw it"}
            }),
            None,
        )
        .unwrap();
        assert!(card.body.is_none());
        assert!(card.visual_request.is_some());
    }

    #[test]
    fn fallback_seq_backfills_missing_source_seq() {
        let card = parse_produce_card(
            &serde_json::json!({"card_type": "text", "title": "T", "body": "B"}),
            Some(7),
        )
        .unwrap();
        assert_eq!(card.source_seq, 7);
    }

    #[test]
    fn bad_card_type_is_rejected() {
        let err = parse_produce_card(
            &serde_json::json!({"card_type": "hologram", "title": "T", "source_seq": 1}),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CardParseError::BadCardType(_)));
    }
}
