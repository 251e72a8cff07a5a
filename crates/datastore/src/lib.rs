//! Durable-store, push-bus, and embedding contracts.
//!
//! The worker never talks SQL: everything durable goes through the
//! [`EventStore`] trait. Production deployments use the HTTP client
//! against the platform data service; tests and dev mode run on the
//! complete in-process [`MemoryStore`].

pub mod embed;
pub mod http;
pub mod memory;
pub mod push;
pub mod store;
pub mod types;

use std::sync::Arc;

use sh_domain::config::{Config, DatastoreBackend};
use sh_domain::Result;

pub use embed::{EmbeddingClient, HttpEmbeddingClient, HashEmbeddingClient};
pub use http::HttpEventStore;
pub use memory::MemoryStore;
pub use push::{HttpPushBus, MemoryPushBus, PushBus};
pub use store::EventStore;
pub use types::{AgentOutputRow, ContextHit, SessionHistoryRow, TranscriptInsert};

/// Build the configured [`EventStore`] backend.
pub fn create_store(config: &Config) -> Result<Arc<dyn EventStore>> {
    match config.datastore.backend {
        DatastoreBackend::Http => Ok(Arc::new(HttpEventStore::new(&config.datastore)?)),
        DatastoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
