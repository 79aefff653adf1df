//! Full snapshot or delta: the storage decision for a fresh crawl.
//!
//! The first crawl of a mirror has nothing to delta against and is stored
//! whole. Later crawls are stored as a delta against the last snapshot,
//! unless the delta grows past the configured limit, in which case the
//! full tree is cheaper to keep and faster to read back.

use crate::models::Delta;

/// Default number of edits above which a full snapshot is stored.
pub const DEFAULT_DELTA_LIMIT: usize = 100;

/// What the persist stage should write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDecision {
    /// No previous snapshot exists
    FirstSnapshot,
    /// Store the delta
    Delta { size: usize },
    /// Delta too large, store the full tree instead
    FullSnapshot { delta_size: usize, limit: usize },
}

impl StorageDecision {
    pub fn stores_full_tree(&self) -> bool {
        !matches!(self, StorageDecision::Delta { .. })
    }
}

/// Size-based storage policy.
#[derive(Debug, Clone)]
pub struct SnapshotPolicy {
    delta_limit: usize,
}

impl SnapshotPolicy {
    pub fn new(delta_limit: usize) -> Self {
        Self { delta_limit }
    }

    pub fn delta_limit(&self) -> usize {
        self.delta_limit
    }

    /// Decide from the delta against the previous snapshot, if there is one.
    pub fn check(&self, delta: Option<&Delta>) -> StorageDecision {
        match delta {
            None => StorageDecision::FirstSnapshot,
            Some(delta) if delta.size() > self.delta_limit => StorageDecision::FullSnapshot {
                delta_size: delta.size(),
                limit: self.delta_limit,
            },
            Some(delta) => StorageDecision::Delta { size: delta.size() },
        }
    }

    /// Same as [`check`](Self::check), logging the outcome.
    pub fn decide(&self, mirror: &str, delta: Option<&Delta>) -> StorageDecision {
        let decision = self.check(delta);
        match &decision {
            StorageDecision::FirstSnapshot => {
                log::info!("[{mirror}] First crawl, storing full snapshot");
            }
            StorageDecision::Delta { size } => {
                log::info!("[{mirror}] Storing delta ({size} edits)");
            }
            StorageDecision::FullSnapshot { delta_size, limit } => {
                log::info!("[{mirror}] Delta has {delta_size} edits (> {limit}), storing full snapshot");
            }
        }
        decision
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DELTA_LIMIT)
    }
}
