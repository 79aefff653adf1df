//! Typed access to stored trees, deltas, diffs and statistics.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};
use crate::models::{Delta, Diff, Mirror, MirrorStatus, MirrorTree, WorkflowStats};
use crate::pipeline::DeltaEngine;
use crate::storage::{
    DocumentId, DocumentKind, DocumentStore, LATEST_DIFFS_COLLECTION, STATISTICS_COLLECTION,
};

/// Snapshot history on top of a [`DocumentStore`].
#[derive(Clone)]
pub struct SnapshotRepository {
    store: Arc<dyn DocumentStore>,
    engine: DeltaEngine,
}

impl SnapshotRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            engine: DeltaEngine::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    async fn load<T: DeserializeOwned>(&self, id: &DocumentId) -> Result<T> {
        let content = self
            .store
            .get(&id.to_string())
            .await?
            .ok_or_else(|| AppError::persistence(format!("document {id} vanished")))?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn save<T: Serialize + Sync>(&self, collection: &str, id: &str, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)?;
        self.store
            .put(collection, id, &content)
            .await
            .map_err(|e| match e {
                AppError::Persistence(_) => e,
                other => AppError::persistence(format!("storing {collection}/{id}: {other}")),
            })
    }

    /// Newest state of a collection: its latest full snapshot with every later
    /// delta replayed on top, oldest first.
    pub async fn latest_tree(&self, collection: &str) -> Result<Option<MirrorTree>> {
        let ids = self.store.list(collection).await?;
        let Some(base) = ids.iter().rposition(|id| id.kind == DocumentKind::Snapshot) else {
            return Ok(None);
        };

        let mut tree: MirrorTree = self.load(&ids[base]).await?;
        let mut replayed = 0;
        for id in ids[base + 1..].iter().filter(|id| id.kind == DocumentKind::Delta) {
            let delta: Delta = self.load(id).await?;
            tree = self.engine.apply(&tree, &delta)?;
            replayed += 1;
        }

        log::debug!(
            "Loaded {collection} from {} with {replayed} deltas replayed",
            ids[base]
        );
        Ok(Some(tree))
    }

    /// Store a full snapshot as `<mirrorId>-<ts>`.
    pub async fn save_tree(&self, collection: &str, tree: &MirrorTree) -> Result<String> {
        let id = tree.snapshot_id();
        self.save(collection, &id, tree).await?;
        Ok(id)
    }

    /// Store a delta as `<mirrorId>-<ts>-delta`.
    pub async fn save_delta(&self, collection: &str, delta: &Delta) -> Result<String> {
        let id = delta.document_id();
        self.save(collection, &id, delta).await?;
        Ok(id)
    }

    /// Store a diff in the latest-diffs collection and drop the mirror's previous ones.
    pub async fn save_diff(&self, diff: &Diff) -> Result<String> {
        let id = diff.document_id();
        self.save(LATEST_DIFFS_COLLECTION, &id, diff).await?;

        for old in self.store.list(LATEST_DIFFS_COLLECTION).await? {
            let old_id = old.to_string();
            if old.mirror_id == diff.mirror_id && old_id != id {
                self.store.delete(&old_id).await?;
                log::debug!("Superseded diff {old_id}");
            }
        }
        Ok(id)
    }

    pub async fn latest_diff(&self, mirror_id: &str) -> Result<Option<Diff>> {
        match self.store.latest_for_mirror(LATEST_DIFFS_COLLECTION, mirror_id).await? {
            Some((_, content)) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    pub async fn save_stats(&self, stats: &WorkflowStats) -> Result<String> {
        let id = stats.document_id();
        self.save(STATISTICS_COLLECTION, &id, stats).await?;
        Ok(id)
    }

    /// Status of each of `mirrors` as recorded by stored statistics.
    ///
    /// Mirrors without any stored run read as never visited.
    pub async fn stored_status(&self, mirrors: &[Mirror]) -> Result<Vec<MirrorStatus>> {
        let mut history = Vec::new();
        for id in self.store.list(STATISTICS_COLLECTION).await? {
            match self.load::<WorkflowStats>(&id).await {
                Ok(stats) => history.push(stats),
                Err(e) => log::warn!("Skipping unreadable statistics {id}: {e}"),
            }
        }
        history.sort_by_key(|stats| stats.started_at);

        Ok(mirrors
            .iter()
            .map(|mirror| {
                let runs = history.iter().filter(|stats| stats.mirror == mirror.name);
                MirrorStatus::from_history(&mirror.name, mirror.role, runs)
            })
            .collect())
    }
}
