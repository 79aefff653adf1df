//! Master-versus-mirror discrepancy report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Node, NodeKind, NodePath};
use crate::utils::format_report_table;

/// Classification of one discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffCategory {
    /// Present on the master, absent on the mirror
    Missing,
    /// Sizes differ
    Corrupted,
    /// Mirror copy is older than the master's
    Older,
    /// Mirror copy is newer than the master's
    Newer,
    /// Present on the mirror, absent on the master
    Superfluous,
    /// File on one side, directory on the other
    WrongType,
}

impl DiffCategory {
    pub const ALL: [DiffCategory; 6] = [
        DiffCategory::Missing,
        DiffCategory::Corrupted,
        DiffCategory::Older,
        DiffCategory::Newer,
        DiffCategory::Superfluous,
        DiffCategory::WrongType,
    ];
}

impl fmt::Display for DiffCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiffCategory::Missing => "missing",
            DiffCategory::Corrupted => "corrupted",
            DiffCategory::Older => "older",
            DiffCategory::Newer => "newer",
            DiffCategory::Superfluous => "superfluous",
            DiffCategory::WrongType => "wrong type",
        };
        f.write_str(name)
    }
}

/// A node without its children, as carried in diff entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            kind: node.kind,
            size: node.size,
            modified_at: node.modified_at,
        }
    }
}

/// One classified discrepancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: NodePath,
    pub category: DiffCategory,
    /// The master's node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<NodeSummary>,
    /// The mirror's node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<NodeSummary>,
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12} {}", self.category.to_string(), self.path)?;
        match self.category {
            DiffCategory::Older | DiffCategory::Newer => {
                let expected = self.expected.as_ref().and_then(|n| n.modified_at);
                let actual = self.actual.as_ref().and_then(|n| n.modified_at);
                if let (Some(e), Some(a)) = (expected, actual) {
                    write!(f, " (expected {}, found {})", e.to_rfc3339(), a.to_rfc3339())?;
                }
            }
            DiffCategory::Corrupted => {
                let expected = self.expected.as_ref().and_then(|n| n.size);
                let actual = self.actual.as_ref().and_then(|n| n.size);
                if let (Some(e), Some(a)) = (expected, actual) {
                    write!(f, " (expected {e} bytes, found {a})")?;
                }
            }
            DiffCategory::WrongType => {
                if let (Some(e), Some(a)) = (&self.expected, &self.actual) {
                    write!(f, " (expected {}, found {})", e.kind, a.kind)?;
                }
            }
            DiffCategory::Missing | DiffCategory::Superfluous => {}
        }
        Ok(())
    }
}

/// Classified discrepancies between a mirror snapshot and the master's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub mirror_id: String,
    /// Snapshot id of the master tree used as reference
    pub master_snapshot_id: String,
    /// Crawl completion of the master tree
    pub reference_timestamp: DateTime<Utc>,
    /// Crawl completion of the mirror tree
    pub mirror_timestamp: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<DiffEntry>,
}

impl Diff {
    /// `<mirrorId>-<epochMillis>-diff`
    pub fn document_id(&self) -> String {
        format!(
            "{}-{}-diff",
            self.mirror_id,
            self.mirror_timestamp.timestamp_millis()
        )
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn of_category(&self, category: DiffCategory) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    pub fn count(&self, category: DiffCategory) -> usize {
        self.of_category(category).count()
    }

    pub fn stats(&self) -> DiffStats {
        DiffStats {
            document_id: self.document_id(),
            missing: self.count(DiffCategory::Missing),
            corrupted: self.count(DiffCategory::Corrupted),
            older: self.count(DiffCategory::Older),
            newer: self.count(DiffCategory::Newer),
            superfluous: self.count(DiffCategory::Superfluous),
            wrong_type: self.count(DiffCategory::WrongType),
        }
    }
}

/// Per-category counts of a diff.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffStats {
    pub document_id: String,
    pub missing: usize,
    pub corrupted: usize,
    pub older: usize,
    pub newer: usize,
    pub superfluous: usize,
    pub wrong_type: usize,
}

impl DiffStats {
    pub fn total(&self) -> usize {
        self.missing + self.corrupted + self.older + self.newer + self.superfluous + self.wrong_type
    }

    /// Boxed text table for logs and the CLI.
    pub fn report(&self) -> String {
        format_report_table(
            &format!("Statistics on {}", self.document_id),
            &[
                (self.missing, "missing files"),
                (self.newer, "newer files"),
                (self.older, "older files"),
                (self.corrupted, "corrupted files"),
                (self.superfluous, "superfluous files (not in the master)"),
                (self.wrong_type, "files of the wrong type"),
            ],
        )
    }
}
