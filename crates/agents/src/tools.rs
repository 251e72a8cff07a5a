//! Tool surface exposed to the model sessions, and the worker-side
//! dispatcher that executes tool calls.

use std::sync::Arc;

use sh_datastore::{EmbeddingClient, EventStore};
use sh_domain::{AgentType, Error, Result};
use sh_session::ToolSpec;

pub const RETRIEVE_TOOL: &str = "retrieve";
pub const EMBED_TOOL: &str = "embed";
pub const PRODUCE_CARD_TOOL: &str = "produce_card";

/// Hard cap on retrieve fan-out regardless of what the model asks for.
const MAX_TOP_K: usize = 10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool declarations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn retrieve_spec() -> ToolSpec {
    ToolSpec {
        name: RETRIEVE_TOOL.into(),
        description: "Semantic search over the event's context corpus.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "top_k": { "type": "integer", "minimum": 1, "maximum": MAX_TOP_K }
            },
            "required": ["query"]
        }),
    }
}

fn embed_spec() -> ToolSpec {
    ToolSpec {
        name: EMBED_TOOL.into(),
        description: "Embed text into the event's vector space.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        }),
    }
}

fn produce_card_spec() -> ToolSpec {
    ToolSpec {
        name: PRODUCE_CARD_TOOL.into(),
        description: "Emit one explainer card for the current concept.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "kind": { "type": "string", "enum": ["explainer", "definition", "reference"] },
                "card_type": { "type": "string", "enum": ["text", "text_visual", "visual"] },
                "title": { "type": "string" },
                "body": { "type": "string" },
                "label": { "type": "string" },
                "image_url": { "type": "string" },
                "source_seq": { "type": "integer" },
                "template_id": { "type": "string" },
                "visual_request": {
                    "type": "object",
                    "properties": {
                        "strategy": { "type": "string", "enum": ["fetch", "generate"] },
                        "instructions": { "type": "string" },
                        "source_url": { "type": ["string", "null"] }
                    },
                    "required": ["strategy", "instructions"]
                }
            },
            "required": ["card_type", "title", "source_seq"]
        }),
    }
}

/// The tools declared on session configure, per agent type.
pub fn agent_tool_specs(agent_type: AgentType) -> Vec<ToolSpec> {
    match agent_type {
        AgentType::Transcript => vec![],
        AgentType::Cards => vec![retrieve_spec(), embed_spec(), produce_card_spec()],
        AgentType::Facts => vec![retrieve_spec(), embed_spec()],
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes `retrieve` / `embed` tool calls for one event.
///
/// `produce_card` is not dispatched here — its invocation *is* the cards
/// agent's output and is normalised by the event processor.
pub struct ToolDispatcher {
    store: Arc<dyn EventStore>,
    embedder: Arc<dyn EmbeddingClient>,
    event_id: String,
}

impl ToolDispatcher {
    pub fn new(
        store: Arc<dyn EventStore>,
        embedder: Arc<dyn EmbeddingClient>,
        event_id: &str,
    ) -> Self {
        Self {
            store,
            embedder,
            event_id: event_id.to_owned(),
        }
    }

    pub async fn dispatch(&self, name: &str, args: &serde_json::Value) -> Result<serde_json::Value> {
        match name {
            RETRIEVE_TOOL => self.retrieve(args).await,
            EMBED_TOOL => self.embed(args).await,
            other => Err(Error::Validation(format!("unknown tool: {other}"))),
        }
    }

    async fn retrieve(&self, args: &serde_json::Value) -> Result<serde_json::Value> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("retrieve: missing query".into()))?;
        let top_k = args
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|k| k as usize)
            .unwrap_or(5)
            .clamp(1, MAX_TOP_K);

        let embedding = self.embedder.embed(query).await?;
        let hits = self
            .store
            .vector_search(&self.event_id, &embedding, top_k)
            .await?;
        Ok(serde_json::to_value(hits)?)
    }

    async fn embed(&self, args: &serde_json::Value) -> Result<serde_json::Value> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("embed: missing text".into()))?;
        let vector = self.embedder.embed(text).await?;
        Ok(serde_json::to_value(vector)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sh_datastore::{HashEmbeddingClient, MemoryStore};

    fn dispatcher() -> (ToolDispatcher, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(HashEmbeddingClient::default());
        (
            ToolDispatcher::new(store.clone(), embedder, "E1"),
            store,
        )
    }

    #[tokio::test]
    async fn retrieve_clamps_top_k_and_ranks() {
        let (dispatcher, store) = dispatcher();
        let embedder = HashEmbeddingClient::default();
        for i in 0..20 {
            let text = format!("context chunk number {i} about embeddings");
            let vector = embedder.embed(&text).await.unwrap();
            store.seed_context_item("E1", &format!("c{i}"), &text, vector);
        }

        let result = dispatcher
            .dispatch(
                RETRIEVE_TOOL,
                &serde_json::json!({"query": "embeddings", "top_k": 50}),
            )
            .await
            .unwrap();
        let hits = result.as_array().unwrap();
        assert_eq!(hits.len(), MAX_TOP_K, "top_k must clamp to {MAX_TOP_K}");
    }

    #[tokio::test]
    async fn retrieve_requires_query() {
        let (dispatcher, _) = dispatcher();
        let err = dispatcher
            .dispatch(RETRIEVE_TOOL, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let (dispatcher, _) = dispatcher();
        let err = dispatcher
            .dispatch("fabricate", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn transcript_sessions_declare_no_tools() {
        assert!(agent_tool_specs(AgentType::Transcript).is_empty());
        assert_eq!(agent_tool_specs(AgentType::Cards).len(), 3);
        assert_eq!(agent_tool_specs(AgentType::Facts).len(), 2);
    }
}
