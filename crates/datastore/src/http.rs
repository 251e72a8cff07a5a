//! HTTP implementation of [`EventStore`].
//!
//! Wraps a `reqwest::Client` against the platform data service, with
//! retry + exponential back-off on transient (5xx / timeout) failures.
//! 4xx responses are permanent and surface immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::mpsc;

use sh_domain::config::DatastoreConfig;
use sh_domain::{
    Agent, AgentSession, AgentStage, AgentStatus, AgentType, Card, Error, Fact, GlossaryEntry,
    Result, SessionStatus, TranscriptChunk,
};

use crate::store::EventStore;
use crate::types::{AgentOutputRow, ContextHit, SessionHistoryRow, TranscriptInsert};

const MAX_RETRIES: u32 = 3;

/// REST client for the platform data service. Created once; the inner
/// `reqwest::Client` pools connections.
#[derive(Debug, Clone)]
pub struct HttpEventStore {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    /// Interval of the change-feed poll loop.
    feed_poll: Duration,
}

impl HttpEventStore {
    pub fn new(cfg: &DatastoreConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
            feed_poll: Duration::from_millis(1_000),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => rb.header("X-Api-Key", key),
            None => rb,
        }
    }

    /// Execute with retry on 5xx/timeout; 4xx is permanent.
    async fn execute(
        &self,
        endpoint: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err = Error::Http(format!("{endpoint}: no attempt made"));

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            match self.decorate(build()).send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    last_err = Error::Datastore(format!("{endpoint} returned {status}: {body}"));
                }
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    return Err(Error::NotFound(endpoint.to_owned()));
                }
                Ok(resp) if resp.status().is_client_error() => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Error::Datastore(format!(
                        "{endpoint} rejected with {status}: {body}"
                    )));
                }
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_timeout() => {
                    last_err = Error::Timeout(format!("{endpoint}: {e}"));
                }
                Err(e) => {
                    last_err = Error::Http(format!("{endpoint}: {e}"));
                }
            }
        }

        Err(last_err)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = self.execute(path, || self.http.get(&url)).await?;
        resp.json().await.map_err(|e| Error::Http(e.to_string()))
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .execute(path, || self.http.post(&url).json(body))
            .await?;
        resp.json().await.map_err(|e| Error::Http(e.to_string()))
    }

    async fn post_unit<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.url(path);
        self.execute(path, || self.http.post(&url).json(body))
            .await?;
        Ok(())
    }
}

#[derive(serde::Deserialize)]
struct InsertedRow {
    /// `None` when the natural key already existed.
    id: Option<String>,
}

#[derive(serde::Deserialize)]
struct CheckpointRow {
    last_processed_seq: Option<u64>,
}

#[derive(serde::Deserialize)]
struct DeletedRows {
    deleted: u64,
}

#[async_trait]
impl EventStore for HttpEventStore {
    async fn get_agent_for_event(&self, event_id: &str) -> Result<Option<Agent>> {
        match self
            .get_json::<Agent>(&format!("/v1/events/{event_id}/agent"))
            .await
        {
            Ok(agent) => Ok(Some(agent)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_agent(
        &self,
        agent_id: &str,
        status: AgentStatus,
        stage: Option<AgentStage>,
    ) -> Result<()> {
        self.post_unit(
            &format!("/v1/agents/{agent_id}/status"),
            &serde_json::json!({ "status": status, "stage": stage }),
        )
        .await
    }

    async fn set_agent_error(&self, agent_id: &str, message: &str) -> Result<()> {
        self.post_unit(
            &format!("/v1/agents/{agent_id}/status"),
            &serde_json::json!({ "status": AgentStatus::Error, "last_error": message }),
        )
        .await
    }

    async fn list_running_agents(&self, limit: usize) -> Result<Vec<Agent>> {
        self.get_json(&format!("/v1/agents?stage=running&limit={limit}"))
            .await
    }

    async fn list_agents_at_stage(&self, stage: AgentStage, limit: usize) -> Result<Vec<Agent>> {
        let stage = serde_json::to_value(stage)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        self.get_json(&format!("/v1/agents?stage={stage}&limit={limit}"))
            .await
    }

    async fn upsert_session(&self, session: AgentSession) -> Result<()> {
        self.post_unit("/v1/agent-sessions", &session).await
    }

    async fn get_session(
        &self,
        event_id: &str,
        agent_type: AgentType,
    ) -> Result<Option<AgentSession>> {
        match self
            .get_json::<AgentSession>(&format!(
                "/v1/events/{event_id}/sessions/{}",
                agent_type.as_str()
            ))
            .await
        {
            Ok(session) => Ok(Some(session)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_sessions(&self, event_id: &str) -> Result<Vec<AgentSession>> {
        self.get_json(&format!("/v1/events/{event_id}/sessions"))
            .await
    }

    async fn delete_sessions(&self, agent_id: &str) -> Result<u64> {
        let path = format!("/v1/agents/{agent_id}/sessions");
        let url = self.url(&path);
        let resp = self.execute(&path, || self.http.delete(&url)).await?;
        let row: DeletedRows = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(row.deleted)
    }

    async fn update_session_status(
        &self,
        event_id: &str,
        agent_type: AgentType,
        status: SessionStatus,
        provider_session_id: Option<String>,
        increment_connections: bool,
    ) -> Result<Option<AgentSession>> {
        let path = format!(
            "/v1/events/{event_id}/sessions/{}/status",
            agent_type.as_str()
        );
        match self
            .post_json::<_, AgentSession>(
                &path,
                &serde_json::json!({
                    "status": status,
                    "provider_session_id": provider_session_id,
                    "increment_connections": increment_connections,
                }),
            )
            .await
        {
            Ok(session) => Ok(Some(session)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn log_session_event(&self, row: SessionHistoryRow) -> Result<()> {
        self.post_unit("/v1/agent-session-history", &row).await
    }

    async fn insert_transcript(
        &self,
        event_id: &str,
        chunk: &TranscriptChunk,
    ) -> Result<Option<String>> {
        let row: InsertedRow = self
            .post_json(&format!("/v1/events/{event_id}/transcripts"), chunk)
            .await?;
        Ok(row.id)
    }

    async fn list_transcripts_after(
        &self,
        event_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<TranscriptChunk>> {
        self.get_json(&format!(
            "/v1/events/{event_id}/transcripts?after_seq={after_seq}&limit={limit}"
        ))
        .await
    }

    async fn subscribe_transcripts(&self) -> Result<mpsc::Receiver<TranscriptInsert>> {
        // The data service exposes the change feed as a cursor endpoint;
        // poll it on a short interval and fan rows into the channel.
        let (tx, rx) = mpsc::channel(256);
        let client = self.clone();
        tokio::spawn(async move {
            let mut cursor: Option<String> = None;
            let mut ticker = tokio::time::interval(client.feed_poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let path = match &cursor {
                    Some(c) => format!("/v1/transcripts/feed?cursor={c}"),
                    None => "/v1/transcripts/feed".to_owned(),
                };
                let page: FeedPage = match client.get_json(&path).await {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::warn!(error = %e, "transcript feed poll failed");
                        continue;
                    }
                };
                cursor = page.cursor.or(cursor);
                for row in page.rows {
                    let insert = TranscriptInsert {
                        event_id: row.event_id,
                        chunk: row.chunk,
                    };
                    if tx.send(insert).await.is_err() {
                        return; // subscriber gone
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn upsert_fact(&self, event_id: &str, fact: &Fact) -> Result<()> {
        self.post_unit(&format!("/v1/events/{event_id}/facts"), fact)
            .await
    }

    async fn mark_facts_inactive(&self, event_id: &str, keys: &[String]) -> Result<()> {
        self.post_unit(
            &format!("/v1/events/{event_id}/facts/deactivate"),
            &serde_json::json!({ "keys": keys }),
        )
        .await
    }

    async fn list_active_facts(&self, event_id: &str) -> Result<Vec<Fact>> {
        self.get_json(&format!("/v1/events/{event_id}/facts?status=active"))
            .await
    }

    async fn insert_card(&self, event_id: &str, card: &Card) -> Result<Option<String>> {
        let row: InsertedRow = self
            .post_json(&format!("/v1/events/{event_id}/cards"), card)
            .await?;
        Ok(row.id)
    }

    async fn list_glossary(&self, event_id: &str) -> Result<Vec<GlossaryEntry>> {
        self.get_json(&format!("/v1/events/{event_id}/glossary?status=active"))
            .await
    }

    async fn append_agent_output(&self, row: AgentOutputRow) -> Result<()> {
        self.post_unit("/v1/agent-outputs", &row).await
    }

    async fn vector_search(
        &self,
        event_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ContextHit>> {
        self.post_json(
            &format!("/v1/events/{event_id}/context/search"),
            &serde_json::json!({ "embedding": embedding, "top_k": top_k }),
        )
        .await
    }

    async fn get_checkpoint(&self, event_id: &str, agent_type: AgentType) -> Result<Option<u64>> {
        match self
            .get_json::<CheckpointRow>(&format!(
                "/v1/events/{event_id}/checkpoints/{}",
                agent_type.as_str()
            ))
            .await
        {
            Ok(row) => Ok(row.last_processed_seq),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put_checkpoint(&self, event_id: &str, agent_type: AgentType, seq: u64) -> Result<()> {
        self.post_unit(
            &format!("/v1/events/{event_id}/checkpoints/{}", agent_type.as_str()),
            &serde_json::json!({ "last_processed_seq": seq }),
        )
        .await
    }
}

#[derive(serde::Deserialize)]
struct FeedPage {
    rows: Vec<FeedRow>,
    cursor: Option<String>,
}

#[derive(serde::Deserialize)]
struct FeedRow {
    event_id: String,
    #[serde(flatten)]
    chunk: TranscriptChunk,
}
