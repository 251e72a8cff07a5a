//! Push-bus contract. The worker publishes message envelopes to the SSE
//! fan-out service; publishes are fire-and-forget — failures are logged,
//! never retried.

use async_trait::async_trait;
use parking_lot::Mutex;

use sh_domain::config::PushConfig;
use sh_domain::{Error, PushMessage, Result};

#[async_trait]
pub trait PushBus: Send + Sync {
    async fn publish(&self, message: PushMessage);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POSTs each envelope to the configured fan-out endpoint.
pub struct HttpPushBus {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    enabled: bool,
}

impl HttpPushBus {
    pub fn new(cfg: &PushConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone(),
            enabled: cfg.enabled,
        })
    }
}

#[async_trait]
impl PushBus for HttpPushBus {
    async fn publish(&self, message: PushMessage) {
        if !self.enabled {
            return;
        }
        let mut rb = self.http.post(&self.endpoint).json(&message);
        if let Some(key) = &self.api_key {
            rb = rb.header("X-Api-Key", key);
        }
        match rb.send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(
                    status = resp.status().as_u16(),
                    kind = ?message.kind,
                    event_id = %message.event_id,
                    "push bus rejected envelope"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    kind = ?message.kind,
                    event_id = %message.event_id,
                    "push bus publish failed"
                );
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation (tests)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Captures everything published, for assertions.
#[derive(Default)]
pub struct MemoryPushBus {
    messages: Mutex<Vec<PushMessage>>,
}

impl MemoryPushBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PushMessage> {
        self.messages.lock().clone()
    }

    pub fn count_of(&self, kind: sh_domain::PushKind) -> usize {
        self.messages.lock().iter().filter(|m| m.kind == kind).count()
    }
}

#[async_trait]
impl PushBus for MemoryPushBus {
    async fn publish(&self, message: PushMessage) {
        self.messages.lock().push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sh_domain::PushKind;

    #[tokio::test]
    async fn memory_bus_records_messages() {
        let bus = MemoryPushBus::new();
        bus.publish(PushMessage::new(
            PushKind::StatusUpdate,
            "E1",
            serde_json::json!({"status": "running"}),
        ))
        .await;
        assert_eq!(bus.count_of(PushKind::StatusUpdate), 1);
        assert_eq!(bus.messages()[0].event_id, "E1");
    }
}
