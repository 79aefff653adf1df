//! Edit set between two snapshots of the same mirror.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{NodeKind, NodePath};
use crate::utils::format_report_table;

/// A node present in the newer snapshot only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEdit {
    /// Full path of the new node; its last segment carries name and kind
    pub path: NodePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl AddEdit {
    pub fn name(&self) -> &str {
        self.path.last().map(|s| s.name.as_str()).unwrap_or_default()
    }

    pub fn kind(&self) -> NodeKind {
        self.path.last().map(|s| s.kind).unwrap_or(NodeKind::Directory)
    }
}

/// Changed attributes of a node present in both snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEdit {
    pub path: NodePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Additive, destructive and update edits turning one snapshot into the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub mirror_id: String,
    pub base_snapshot_id: String,
    pub new_snapshot_id: String,
    /// Crawl instants of the newer snapshot, restored on replay
    pub new_crawl_started_at: DateTime<Utc>,
    pub new_crawl_finished_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub adds: Vec<AddEdit>,
    pub removes: Vec<NodePath>,
    pub updates: Vec<UpdateEdit>,
}

impl Delta {
    /// Number of edits.
    pub fn size(&self) -> usize {
        self.adds.len() + self.removes.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// `<mirrorId>-<epochMillis>-delta`, stamped with the newer crawl.
    pub fn document_id(&self) -> String {
        format!(
            "{}-{}-delta",
            self.mirror_id,
            self.new_crawl_finished_at.timestamp_millis()
        )
    }

    pub fn report(&self) -> String {
        format_report_table(
            &format!("Statistics on {}", self.document_id()),
            &[
                (self.adds.len(), "new files"),
                (self.removes.len(), "deleted files"),
                (self.updates.len(), "updated files"),
            ],
        )
    }
}
