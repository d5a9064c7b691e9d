//! In-memory storage backend.
//!
//! Stores derived entities and checkpoints in RAM.
//! Useful for testing and short-lived pipelines that don't need persistence.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chainquery_core::checkpoint::Checkpoint;
use chainquery_core::error::IndexerError;
use chainquery_core::store::{EntityWrite, Store, StoreConnector, WriteBatch};

/// In-memory store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    entities: Mutex<HashMap<(String, String), Value>>,
    commits: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All committed entities of `kind`, keyed by id.
    pub fn entities_of_kind(&self, kind: &str) -> HashMap<String, Value> {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), _)| k == kind)
            .map(|((_, id), v)| (id.clone(), v.clone()))
            .collect()
    }

    /// Total number of committed entities.
    pub fn entity_count(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> u64 {
        *self.commits.lock().unwrap()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_checkpoint(&self, processor_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.checkpoints.lock().unwrap().get(processor_id).cloned())
    }

    async fn delete_checkpoint(&self, processor_id: &str) -> Result<(), IndexerError> {
        self.checkpoints.lock().unwrap().remove(processor_id);
        Ok(())
    }

    async fn get_entity(&self, kind: &str, id: &str) -> Result<Option<Value>, IndexerError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .get(&(kind.to_string(), id.to_string()))
            .cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), IndexerError> {
        // Both locks are held for the whole batch so readers never observe
        // entities without the checkpoint that covers them.
        let mut entities = self.entities.lock().unwrap();
        let mut checkpoints = self.checkpoints.lock().unwrap();
        for write in batch.writes {
            match write {
                EntityWrite::Put { kind, id, value } => {
                    entities.insert((kind, id), value);
                }
                EntityWrite::Remove { kind, id } => {
                    entities.remove(&(kind, id));
                }
            }
        }
        if let Some(cp) = batch.checkpoint {
            checkpoints.insert(cp.processor_id.clone(), cp);
        }
        *self.commits.lock().unwrap() += 1;
        Ok(())
    }
}

/// Connector handing out the same shared [`MemoryStore`] on every connect.
#[derive(Default, Clone)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// The backing store, for inspection.
    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn Store>, IndexerError> {
        Ok(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put(kind: &str, id: &str, value: Value) -> EntityWrite {
        EntityWrite::Put {
            kind: kind.into(),
            id: id.into(),
            value,
        }
    }

    fn cp(height: u64, index: Option<u64>) -> Checkpoint {
        Checkpoint {
            processor_id: "test".into(),
            block_number: height.into(),
            event_index: index.map(Into::into),
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn commit_applies_writes_and_checkpoint() {
        let store = MemoryStore::new();
        store
            .commit(WriteBatch {
                writes: vec![
                    put("account", "alice", json!({"balance": 10})),
                    put("account", "bob", json!({"balance": 5})),
                    EntityWrite::Remove {
                        kind: "account".into(),
                        id: "bob".into(),
                    },
                ],
                checkpoint: Some(cp(1000, Some(3))),
            })
            .await
            .unwrap();

        assert_eq!(store.entity_count(), 1);
        assert_eq!(
            store.get_entity("account", "alice").await.unwrap(),
            Some(json!({"balance": 10}))
        );
        let loaded = store.load_checkpoint("test").await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 1000u64.into());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn checkpoint_delete() {
        let store = MemoryStore::new();
        store
            .commit(WriteBatch {
                writes: vec![],
                checkpoint: Some(cp(5, None)),
            })
            .await
            .unwrap();
        store.delete_checkpoint("test").await.unwrap();
        assert!(store.load_checkpoint("test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn connector_shares_store() {
        let connector = MemoryConnector::new();
        let a = connector.connect().await.unwrap();
        a.commit(WriteBatch {
            writes: vec![put("k", "1", json!(1))],
            checkpoint: None,
        })
        .await
        .unwrap();
        assert_eq!(connector.store().entities_of_kind("k").len(), 1);
    }
}
