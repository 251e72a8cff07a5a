//! Periodic (and on-transition) runtime status publication.

use std::sync::Arc;

use sh_datastore::PushBus;
use sh_domain::{AgentType, PushKind, PushMessage};

use super::RuntimeShared;

pub struct StatusUpdater {
    push: Arc<dyn PushBus>,
}

impl StatusUpdater {
    pub fn new(push: Arc<dyn PushBus>) -> Self {
        Self { push }
    }

    /// Publish a `status_update` envelope describing the runtime and
    /// its three sessions.
    pub async fn push_status(&self, shared: &RuntimeShared) {
        let snapshot = shared.snapshot();
        let sessions = shared.session_statuses();

        let session_json = |agent_type: AgentType| -> serde_json::Value {
            match sessions.get(&agent_type) {
                Some(view) => serde_json::to_value(view).unwrap_or_default(),
                None => serde_json::Value::Null,
            }
        };

        let payload = serde_json::json!({
            "status": snapshot.status,
            "seqs": {
                "transcript": snapshot.transcript_last_seq,
                "cards": snapshot.cards_last_seq,
                "facts": snapshot.facts_last_seq,
            },
            "sessions": {
                "transcript": session_json(AgentType::Transcript),
                "cards": session_json(AgentType::Cards),
                "facts": session_json(AgentType::Facts),
            },
            "stores": {
                "ring": snapshot.ring,
                "facts": snapshot.facts,
                "cards_cached": snapshot.cards_cached,
                "pending_concepts": snapshot.pending_concepts,
            },
        });

        self.push
            .publish(PushMessage::new(
                PushKind::StatusUpdate,
                &shared.event_id,
                payload,
            ))
            .await;
    }
}
