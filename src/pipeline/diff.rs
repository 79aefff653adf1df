//! Structural comparison of a mirror tree against the master's.
//!
//! Nodes are joined on their name path, so a file on one side and a directory
//! on the other meet at the same key and come out as `WrongType` rather than
//! as a `Missing`/`Superfluous` pair.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::models::{Diff, DiffCategory, DiffEntry, MirrorTree, Node, NodePath, NodeSummary};

/// Calculator for master-versus-mirror diffs.
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    /// Report every node under a missing or superfluous directory, not only the top one
    exhaustive: bool,
}

impl DiffEngine {
    /// Engine reporting only the topmost node of an absent subtree.
    pub fn new() -> Self {
        Self { exhaustive: false }
    }

    /// Engine reporting every node of an absent subtree.
    pub fn exhaustive() -> Self {
        Self { exhaustive: true }
    }

    /// Classify every discrepancy between `master` and `mirror`.
    pub fn diff(&self, master: &MirrorTree, mirror: &MirrorTree) -> Diff {
        let master_nodes = master.walk();
        let mirror_nodes = mirror.walk();

        let mirror_by_key: HashMap<String, &Node> = mirror_nodes
            .iter()
            .map(|(path, node)| (path.name_key(), *node))
            .collect();
        let master_keys: HashSet<String> = master_nodes.iter().map(|(path, _)| path.name_key()).collect();

        let mut entries = Vec::new();
        // Name keys whose subtree is already covered by one entry
        let mut pruned: HashSet<String> = HashSet::new();

        for (path, expected) in &master_nodes {
            let expected = *expected;
            let key = path.name_key();
            if self.under_pruned(path, &pruned) {
                pruned.insert(key);
                continue;
            }

            let Some(&actual) = mirror_by_key.get(&key) else {
                entries.push(entry(path, DiffCategory::Missing, Some(expected), None));
                pruned.insert(key);
                continue;
            };

            if actual.kind != expected.kind {
                entries.push(entry(path, DiffCategory::WrongType, Some(expected), Some(actual)));
                pruned.insert(key);
                continue;
            }

            if let (Some(want), Some(got)) = (expected.modified_at, actual.modified_at) {
                if want > got {
                    entries.push(entry(path, DiffCategory::Older, Some(expected), Some(actual)));
                } else if want < got {
                    entries.push(entry(path, DiffCategory::Newer, Some(expected), Some(actual)));
                }
            }
            if let (Some(want), Some(got)) = (expected.size, actual.size) {
                if want != got {
                    entries.push(entry(path, DiffCategory::Corrupted, Some(expected), Some(actual)));
                }
            }
        }

        for (path, actual) in &mirror_nodes {
            let actual = *actual;
            let key = path.name_key();
            if master_keys.contains(&key) {
                continue;
            }
            if self.under_pruned(path, &pruned) {
                pruned.insert(key);
                continue;
            }
            entries.push(entry(path, DiffCategory::Superfluous, None, Some(actual)));
            pruned.insert(key);
        }

        log::debug!(
            "Diff {} against {}: {} entries",
            mirror.mirror_id,
            master.snapshot_id(),
            entries.len()
        );

        Diff {
            mirror_id: mirror.mirror_id.clone(),
            master_snapshot_id: master.snapshot_id(),
            reference_timestamp: master.crawl_finished_at,
            mirror_timestamp: mirror.crawl_finished_at,
            generated_at: Utc::now(),
            entries,
        }
    }

    fn under_pruned(&self, path: &NodePath, pruned: &HashSet<String>) -> bool {
        !self.exhaustive
            && path
                .parent()
                .is_some_and(|parent| !parent.is_root() && pruned.contains(&parent.name_key()))
    }
}

fn entry(path: &NodePath, category: DiffCategory, expected: Option<&Node>, actual: Option<&Node>) -> DiffEntry {
    DiffEntry {
        path: path.clone(),
        category,
        expected: expected.map(NodeSummary::from),
        actual: actual.map(NodeSummary::from),
    }
}
