use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence floor/ceiling for every fact operation.
pub const CONFIDENCE_MIN: f64 = 0.1;
pub const CONFIDENCE_MAX: f64 = 1.0;

/// Default confidence for inserts that do not supply one.
pub const CONFIDENCE_DEFAULT: f64 = 0.7;

/// Cap on the per-fact source transcript-id list.
pub const MAX_FACT_SOURCES: usize = 10;

/// Wire status of a fact as reported by the facts agent or the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactStatus {
    Active,
    Dormant,
    Pruned,
}

/// A compact key/value claim tracked with a confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// snake_case key, unique per event.
    pub key: String,
    pub value: serde_json::Value,
    /// Clamped to `[CONFIDENCE_MIN, CONFIDENCE_MAX]`.
    pub confidence: f64,
    pub last_seen_seq: u64,
    /// Insertion-ordered set of the last `MAX_FACT_SOURCES` transcript ids.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Keys folded into this fact by agent-side merges.
    #[serde(default)]
    pub merged_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    /// Consecutive snapshots in which the fact went unmentioned.
    #[serde(default)]
    pub miss_streak: u32,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dormant_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruned_at: Option<DateTime<Utc>>,
}

impl Fact {
    pub fn status(&self) -> FactStatus {
        if self.pruned_at.is_some() {
            FactStatus::Pruned
        } else if self.dormant_at.is_some() {
            FactStatus::Dormant
        } else {
            FactStatus::Active
        }
    }

    /// Stringified value for substring matching and bullet rendering.
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Clamp a confidence into the legal band, rejecting non-finite input.
pub fn clamp_confidence(c: f64) -> Option<f64> {
    if !c.is_finite() {
        return None;
    }
    Some(c.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_rejects_nan() {
        assert!(clamp_confidence(f64::NAN).is_none());
        assert!(clamp_confidence(f64::INFINITY).is_none());
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp_confidence(0.0), Some(0.1));
        assert_eq!(clamp_confidence(1.7), Some(1.0));
        assert_eq!(clamp_confidence(0.55), Some(0.55));
    }

    #[test]
    fn value_text_unquotes_strings() {
        let fact = Fact {
            key: "deadline".into(),
            value: serde_json::json!("January 15"),
            confidence: 0.7,
            last_seen_seq: 4,
            sources: vec![],
            merged_from: vec![],
            merged_at: None,
            miss_streak: 0,
            created_at: Utc::now(),
            last_touched_at: Utc::now(),
            dormant_at: None,
            pruned_at: None,
        };
        assert_eq!(fact.value_text(), "January 15");
        assert_eq!(fact.status(), FactStatus::Active);
    }
}
