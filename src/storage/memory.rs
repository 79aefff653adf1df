//! In-memory document store, for tests and one-shot CLI runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::storage::{DocumentId, DocumentStore, sort_history};

/// Collections of documents held in a map behind a lock.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    collections: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStorage {
    async fn put(&self, collection: &str, id: &str, content: &str) -> Result<()> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), content.to_string());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<String>> {
        let collections = self.collections.read().await;
        Ok(collections.values().find_map(|docs| docs.get(id).cloned()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections.values_mut().any(|docs| docs.remove(id).is_some()))
    }

    async fn list(&self, collection: &str) -> Result<Vec<DocumentId>> {
        let collections = self.collections.read().await;
        let mut ids: Vec<DocumentId> = collections
            .get(collection)
            .map(|docs| docs.keys().filter_map(|id| id.parse().ok()).collect())
            .unwrap_or_default();
        sort_history(&mut ids);
        Ok(ids)
    }
}
