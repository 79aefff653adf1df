//! Edit sets between two snapshots of one mirror, and their replay.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{AddEdit, Delta, MirrorTree, Node, NodePath, UpdateEdit};

/// Computes and applies [`Delta`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaEngine;

impl DeltaEngine {
    pub fn new() -> Self {
        Self
    }

    /// Edits turning `older` into `newer`.
    ///
    /// A vanished directory yields one remove for the whole subtree; a new
    /// directory yields one add per node, parents first. Renames come out as
    /// a remove plus adds.
    pub fn compute(&self, older: &MirrorTree, newer: &MirrorTree) -> Delta {
        let older_nodes = older.walk();
        let newer_nodes = newer.walk();
        let newer_by_path: HashMap<&NodePath, &Node> = newer_nodes.iter().map(|(p, n)| (p, *n)).collect();
        let older_paths: HashSet<&NodePath> = older_nodes.iter().map(|(p, _)| p).collect();

        let mut removes: Vec<NodePath> = Vec::new();
        let mut updates = Vec::new();
        for (path, old) in &older_nodes {
            if removes.iter().any(|removed| path.starts_with(removed)) {
                continue;
            }
            let Some(new) = newer_by_path.get(path) else {
                removes.push(path.clone());
                continue;
            };

            let size = changed(old.size, new.size);
            let modified_at = changed(old.modified_at, new.modified_at);
            if size.is_some() || modified_at.is_some() {
                updates.push(UpdateEdit {
                    path: path.clone(),
                    modified_at,
                    size,
                });
            }
        }

        let adds: Vec<AddEdit> = newer_nodes
            .iter()
            .filter(|(path, _)| !older_paths.contains(path))
            .map(|(path, node)| AddEdit {
                path: path.clone(),
                modified_at: node.modified_at,
                size: node.size,
            })
            .collect();

        Delta {
            mirror_id: newer.mirror_id.clone(),
            base_snapshot_id: older.snapshot_id(),
            new_snapshot_id: newer.snapshot_id(),
            new_crawl_started_at: newer.crawl_started_at,
            new_crawl_finished_at: newer.crawl_finished_at,
            generated_at: Utc::now(),
            adds,
            removes,
            updates,
        }
    }

    /// Replay `delta` on top of `older`.
    ///
    /// Removes go first, then adds from the shallowest path down, then
    /// updates. An add whose parent is still absent after that ordering is
    /// an error.
    pub fn apply(&self, older: &MirrorTree, delta: &Delta) -> Result<MirrorTree> {
        if delta.base_snapshot_id != older.snapshot_id() {
            return Err(AppError::delta(format!(
                "delta {} is based on {}, not on {}",
                delta.document_id(),
                delta.base_snapshot_id,
                older.snapshot_id()
            )));
        }

        let mut tree = older.clone();

        for path in &delta.removes {
            tree.remove(path)
                .ok_or_else(|| AppError::delta(format!("cannot remove {path}: no such node")))?;
        }

        let mut adds: Vec<&AddEdit> = delta.adds.iter().collect();
        adds.sort_by_key(|add| add.path.depth());
        for add in adds {
            let parent = add
                .path
                .parent()
                .ok_or_else(|| AppError::delta("cannot add the root node"))?;
            let node = Node {
                name: add.name().to_string(),
                kind: add.kind(),
                size: add.size,
                modified_at: add.modified_at,
                children: Vec::new(),
            };
            tree.insert(&parent, node)
                .map_err(|e| AppError::delta(format!("cannot add {}: {e}", add.path)))?;
        }

        for update in &delta.updates {
            let node = tree
                .get_mut(&update.path)
                .ok_or_else(|| AppError::delta(format!("cannot update {}: no such node", update.path)))?;
            if let Some(size) = update.size {
                node.size = Some(size);
            }
            if let Some(modified_at) = update.modified_at {
                node.modified_at = Some(modified_at);
            }
        }

        tree.mirror_id = delta.mirror_id.clone();
        tree.crawl_started_at = delta.new_crawl_started_at;
        tree.crawl_finished_at = delta.new_crawl_finished_at;
        Ok(tree)
    }
}

/// The newer value when it is known and differs from the older one.
fn changed<T: PartialEq + Copy>(old: Option<T>, new: Option<T>) -> Option<T> {
    match new {
        Some(value) if old != Some(value) => Some(value),
        _ => None,
    }
}
