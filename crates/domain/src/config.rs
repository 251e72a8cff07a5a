use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::agent::AgentType;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Worker configuration. Loaded from TOML, then overridden by `SH_*`
/// environment variables for the deploy-time knobs (endpoints,
/// credentials, model names).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub cards: CardsConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Tower concurrency limit (backpressure protection).
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            max_concurrent_requests: 256,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    #[serde(default = "d_store_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Deadline for durable reads/writes.
    #[serde(default = "d_5000")]
    pub timeout_ms: u64,
    /// `memory` runs the worker against the in-process store (dev/test).
    #[serde(default)]
    pub backend: DatastoreBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreBackend {
    #[default]
    Http,
    Memory,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            base_url: d_store_url(),
            api_key: None,
            timeout_ms: 5_000,
            backend: DatastoreBackend::Http,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream model provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "d_ws_url")]
    pub ws_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Default model set label; agents may carry an override.
    #[serde(default = "d_model_set")]
    pub default_model_set: String,
    /// Model sets: label -> per-agent-type model names.
    #[serde(default = "d_model_sets")]
    pub model_sets: HashMap<String, ModelSet>,
    /// Policy prompt version selected per agent type.
    #[serde(default = "d_prompt_version")]
    pub prompt_version: String,
    /// Deadline for response-expecting sends.
    #[serde(default = "d_30000")]
    pub send_timeout_ms: u64,
    #[serde(default = "d_heartbeat")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "d_pong")]
    pub pong_timeout_secs: u64,
    #[serde(default = "d_attempts")]
    pub max_reconnect_attempts: u32,
}

/// Concrete model names for the three agent types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSet {
    pub transcript: String,
    pub cards: String,
    pub facts: String,
}

impl ModelSet {
    pub fn model_for(&self, agent_type: AgentType) -> &str {
        match agent_type {
            AgentType::Transcript => &self.transcript,
            AgentType::Cards => &self.cards,
            AgentType::Facts => &self.facts,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ws_url: d_ws_url(),
            api_key: None,
            default_model_set: d_model_set(),
            model_sets: d_model_sets(),
            prompt_version: d_prompt_version(),
            send_timeout_ms: 30_000,
            heartbeat_interval_secs: 25,
            pong_timeout_secs: 10,
            max_reconnect_attempts: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedding service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "d_embed_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_embed_model")]
    pub model: String,
    #[serde(default = "d_10000")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: d_embed_url(),
            api_key: None,
            model: d_embed_model(),
            timeout_ms: 10_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Push bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// SSE fan-out endpoint the worker POSTs envelopes to.
    #[serde(default = "d_push_url")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_true")]
    pub enabled: bool,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: d_push_url(),
            api_key: None,
            enabled: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime bounds & timers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "d_1000")]
    pub ring_max_items: usize,
    #[serde(default = "d_ring_age")]
    pub ring_max_age_ms: i64,
    #[serde(default = "d_50")]
    pub facts_max_items: usize,
    #[serde(default = "d_1024")]
    pub mailbox_capacity: usize,
    #[serde(default = "d_32")]
    pub reorder_window: usize,
    #[serde(default = "d_250")]
    pub reorder_ms: u64,
    #[serde(default = "d_60")]
    pub summary_interval_secs: u64,
    #[serde(default = "d_30")]
    pub status_interval_secs: u64,
    #[serde(default = "d_60")]
    pub checkpoint_interval_secs: u64,
    /// Transcript payloads above this are rejected as Validation errors.
    #[serde(default = "d_text_cap")]
    pub max_transcript_chars: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ring_max_items: 1_000,
            ring_max_age_ms: d_ring_age(),
            facts_max_items: 50,
            mailbox_capacity: 1_024,
            reorder_window: 32,
            reorder_ms: 250,
            summary_interval_secs: 60,
            status_interval_secs: 30,
            checkpoint_interval_secs: 60,
            max_transcript_chars: d_text_cap(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Card trigger tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardsConfig {
    /// Recent chunks examined per trigger evaluation.
    #[serde(default = "d_3")]
    pub window_chunks: usize,
    /// Minimum chunks (and concept occurrences) before a card fires.
    #[serde(default = "d_2")]
    pub min_chunks: usize,
    /// Context bullet lines handed to the cards agent.
    #[serde(default = "d_5")]
    pub context_limit: usize,
    /// Suppression window for repeat concepts.
    #[serde(default = "d_freshness")]
    pub freshness_ms: i64,
    /// Matching facts / glossary entries in the supporting context.
    #[serde(default = "d_5")]
    pub fact_limit: usize,
    /// Recent cards in the supporting context.
    #[serde(default = "d_5")]
    pub recent_limit: usize,
}

impl Default for CardsConfig {
    fn default() -> Self {
        Self {
            window_chunks: 3,
            min_chunks: 2,
            context_limit: 5,
            freshness_ms: d_freshness(),
            fact_limit: 5,
            recent_limit: 5,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pollers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "d_15")]
    pub blueprint_secs: u64,
    #[serde(default = "d_15")]
    pub context_secs: u64,
    #[serde(default = "d_30")]
    pub regeneration_secs: u64,
    #[serde(default = "d_5_u64")]
    pub pause_resume_secs: u64,
    #[serde(default = "d_5_u64")]
    pub session_startup_secs: u64,
    /// Max running agents resumed at startup.
    #[serde(default = "d_50")]
    pub resume_limit: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            blueprint_secs: 15,
            context_secs: 15,
            regeneration_secs: 30,
            pause_resume_secs: 5,
            session_startup_secs: 5,
            resume_limit: 50,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Feature flags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeaturesConfig {
    /// Run only the transcript agent; cards and facts stay disabled.
    #[serde(default)]
    pub transcript_only: bool,
}

impl FeaturesConfig {
    pub fn enabled_agents(&self) -> Vec<AgentType> {
        if self.transcript_only {
            vec![AgentType::Transcript]
        } else {
            AgentType::ALL.to_vec()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading, env overrides, validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Config {
    /// Parse a TOML document and apply `SH_*` env overrides.
    pub fn from_toml(raw: &str) -> crate::error::Result<Self> {
        let mut config: Config = toml::from_str(raw)
            .map_err(|e| crate::error::Error::Config(format!("parsing config: {e}")))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults + `SH_*` env overrides, for deployments with no file.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SH_DATASTORE_URL") {
            self.datastore.base_url = v;
        }
        if let Ok(v) = std::env::var("SH_DATASTORE_API_KEY") {
            self.datastore.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("SH_PROVIDER_WS_URL") {
            self.provider.ws_url = v;
        }
        if let Ok(v) = std::env::var("SH_PROVIDER_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("SH_EMBEDDING_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("SH_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("SH_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("SH_PUSH_ENDPOINT") {
            self.push.endpoint = v;
        }
        if let Ok(v) = std::env::var("SH_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("SH_TRANSCRIPT_ONLY") {
            self.features.transcript_only = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    /// Startup validation. Any `Error`-severity issue aborts boot.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut error = |message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message,
            })
        };

        if !self
            .provider
            .model_sets
            .contains_key(&self.provider.default_model_set)
        {
            error(format!(
                "provider.default_model_set `{}` has no entry in provider.model_sets",
                self.provider.default_model_set
            ));
        }
        if self.runtime.mailbox_capacity == 0 {
            error("runtime.mailbox_capacity must be > 0".into());
        }
        if self.runtime.ring_max_items == 0 {
            error("runtime.ring_max_items must be > 0".into());
        }
        if self.runtime.facts_max_items == 0 {
            error("runtime.facts_max_items must be > 0".into());
        }
        if self.cards.min_chunks > self.cards.window_chunks {
            error(format!(
                "cards.min_chunks ({}) exceeds cards.window_chunks ({})",
                self.cards.min_chunks, self.cards.window_chunks
            ));
        }

        if self.provider.api_key.is_none()
            && self.datastore.backend == DatastoreBackend::Http
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "provider.api_key not set — session connects will be unauthenticated"
                    .into(),
            });
        }

        issues
    }
}

// ── serde default helpers ──────────────────────────────────────────

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    3400
}
fn d_store_url() -> String {
    "http://localhost:8000".into()
}
fn d_ws_url() -> String {
    "wss://api.openai.com/v1/realtime".into()
}
fn d_embed_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_embed_model() -> String {
    "text-embedding-3-small".into()
}
fn d_push_url() -> String {
    "http://localhost:8787/push".into()
}
fn d_model_set() -> String {
    "standard".into()
}
fn d_model_sets() -> HashMap<String, ModelSet> {
    let mut sets = HashMap::new();
    sets.insert(
        "standard".into(),
        ModelSet {
            transcript: "gpt-4o-transcribe".into(),
            cards: "gpt-4o-realtime-preview".into(),
            facts: "gpt-4o-realtime-preview".into(),
        },
    );
    sets
}
fn d_prompt_version() -> String {
    "v1".into()
}
fn d_true() -> bool {
    true
}
fn d_2() -> usize {
    2
}
fn d_3() -> usize {
    3
}
fn d_5() -> usize {
    5
}
fn d_5_u64() -> u64 {
    5
}
fn d_15() -> u64 {
    15
}
fn d_30() -> u64 {
    30
}
fn d_60() -> u64 {
    60
}
fn d_32() -> usize {
    32
}
fn d_50() -> usize {
    50
}
fn d_250() -> u64 {
    250
}
fn d_256() -> usize {
    256
}
fn d_1000() -> usize {
    1_000
}
fn d_1024() -> usize {
    1_024
}
fn d_5000() -> u64 {
    5_000
}
fn d_10000() -> u64 {
    10_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_heartbeat() -> u64 {
    25
}
fn d_pong() -> u64 {
    10
}
fn d_attempts() -> u32 {
    10
}
fn d_ring_age() -> i64 {
    5 * 60 * 1_000
}
fn d_freshness() -> i64 {
    5 * 60 * 1_000
}
fn d_text_cap() -> usize {
    100_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        let issues = config.validate();
        assert!(
            !issues
                .iter()
                .any(|i| i.severity == ConfigSeverity::Error),
            "default config must carry no error-severity issues"
        );
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.runtime.ring_max_items, 1_000);
        assert_eq!(config.runtime.facts_max_items, 50);
        assert_eq!(config.cards.freshness_ms, 300_000);
    }

    #[test]
    fn unknown_model_set_is_an_error() {
        let mut config = Config::default();
        config.provider.default_model_set = "missing".into();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("missing")));
    }

    #[test]
    fn transcript_only_narrows_enabled_agents() {
        let mut config = Config::default();
        assert_eq!(config.features.enabled_agents().len(), 3);
        config.features.transcript_only = true;
        assert_eq!(config.features.enabled_agents(), vec![AgentType::Transcript]);
    }

    #[test]
    fn min_chunks_above_window_is_an_error() {
        let mut config = Config::default();
        config.cards.min_chunks = 4;
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Error));
    }
}
