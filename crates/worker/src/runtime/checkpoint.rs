//! Per-(event, agent type) last-processed-seq persistence.
//!
//! A write-through cache over the datastore: saves are skipped when the
//! seq has not advanced, so the periodic checkpoint tick is cheap.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use sh_datastore::EventStore;
use sh_domain::{AgentType, Result};

pub struct CheckpointStore {
    store: Arc<dyn EventStore>,
    cache: Mutex<HashMap<(String, AgentType), u64>>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Last persisted seq, 0 when none exists.
    pub async fn load(&self, event_id: &str, agent_type: AgentType) -> Result<u64> {
        if let Some(seq) = self
            .cache
            .lock()
            .get(&(event_id.to_owned(), agent_type))
            .copied()
        {
            return Ok(seq);
        }
        let seq = self
            .store
            .get_checkpoint(event_id, agent_type)
            .await?
            .unwrap_or(0);
        self.cache
            .lock()
            .insert((event_id.to_owned(), agent_type), seq);
        Ok(seq)
    }

    /// Persist monotonically; regressions and no-ops are skipped.
    pub async fn save(&self, event_id: &str, agent_type: AgentType, seq: u64) -> Result<()> {
        {
            let cache = self.cache.lock();
            if cache
                .get(&(event_id.to_owned(), agent_type))
                .map(|cached| seq <= *cached)
                .unwrap_or(false)
            {
                return Ok(());
            }
        }
        self.store.put_checkpoint(event_id, agent_type, seq).await?;
        self.cache
            .lock()
            .insert((event_id.to_owned(), agent_type), seq);
        Ok(())
    }

    /// Forget cached values for an event (used when a runtime is
    /// removed so a re-created runtime re-reads durable state).
    pub fn forget(&self, event_id: &str) {
        self.cache.lock().retain(|(e, _), _| e != event_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sh_datastore::MemoryStore;

    #[tokio::test]
    async fn load_defaults_to_zero_and_caches() {
        let store = Arc::new(MemoryStore::new());
        let checkpoints = CheckpointStore::new(store.clone());
        assert_eq!(checkpoints.load("E1", AgentType::Cards).await.unwrap(), 0);
        checkpoints.save("E1", AgentType::Cards, 5).await.unwrap();
        assert_eq!(checkpoints.load("E1", AgentType::Cards).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn save_skips_regressions() {
        let store = Arc::new(MemoryStore::new());
        let checkpoints = CheckpointStore::new(store.clone());
        checkpoints.save("E1", AgentType::Facts, 10).await.unwrap();
        checkpoints.save("E1", AgentType::Facts, 3).await.unwrap();
        assert_eq!(
            store.get_checkpoint("E1", AgentType::Facts).await.unwrap(),
            Some(10)
        );
    }

    #[tokio::test]
    async fn forget_drops_only_that_event() {
        let store = Arc::new(MemoryStore::new());
        let checkpoints = CheckpointStore::new(store.clone());
        checkpoints.save("E1", AgentType::Cards, 4).await.unwrap();
        checkpoints.save("E2", AgentType::Cards, 8).await.unwrap();
        checkpoints.forget("E1");
        // E1 re-reads from durable, E2 still cached; both stay correct.
        assert_eq!(checkpoints.load("E1", AgentType::Cards).await.unwrap(), 4);
        assert_eq!(checkpoints.load("E2", AgentType::Cards).await.unwrap(), 8);
    }
}
