use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message types published on the push bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    CardCreated,
    CardUpdated,
    CardDeactivated,
    CardDeleted,
    FactUpdate,
    StatusUpdate,
}

/// On-the-wire envelope: `{type, event_id, timestamp, ...payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: PushKind,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl PushMessage {
    pub fn new(kind: PushKind, event_id: impl Into<String>, payload: serde_json::Value) -> Self {
        let payload = match payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("payload".into(), other);
                map
            }
        };
        Self {
            kind,
            event_id: event_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_flattens_payload() {
        let msg = PushMessage::new(
            PushKind::FactUpdate,
            "E1",
            serde_json::json!({"key": "deadline", "confidence": 0.8}),
        );
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], "fact_update");
        assert_eq!(wire["event_id"], "E1");
        assert_eq!(wire["key"], "deadline");
        assert!(wire.get("payload").is_none());
    }
}
