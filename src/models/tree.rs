//! In-memory mirror snapshots.
//!
//! A [`MirrorTree`] is what one crawl of one mirror produced. Every node in it
//! is addressed by a [`NodePath`]: the kind-tagged names from the root down,
//! rendered as `/dir:pkgs/dir:i586/file:foo.rpm`. Names are unique within a
//! directory, which is what makes the path a usable join key between trees.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AppError, Result};
use crate::models::MirrorRole;

/// Size reported for directories whose real size is unknown.
pub const DIRECTORY_PLACEHOLDER_SIZE: u64 = 4096;

/// File or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "dir")]
    Directory,
}

impl NodeKind {
    /// Tag used in node paths.
    pub fn tag(self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Directory => "dir",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// How much of a mirror a crawl captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// Directory hierarchy only
    Skeleton,
    #[default]
    Complete,
}

/// Whether nodes carry size and timestamp attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    #[default]
    Verbose,
}

/// Crawl policy recorded on every tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnalysisPolicy {
    #[serde(default)]
    pub depth: Depth,
    #[serde(default)]
    pub verbosity: Verbosity,
}

impl AnalysisPolicy {
    pub fn new(depth: Depth, verbosity: Verbosity) -> Self {
        Self { depth, verbosity }
    }

    pub fn includes_files(&self) -> bool {
        self.depth == Depth::Complete
    }

    pub fn keeps_attributes(&self) -> bool {
        self.verbosity == Verbosity::Verbose
    }
}

/// One element of a mirror tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn file(name: impl Into<String>, size: Option<u64>, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::File,
            size,
            modified_at,
            children: Vec::new(),
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Directory,
            size: None,
            modified_at: None,
            children: Vec::new(),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    /// Fixture builder; panics on a child `add_child` would reject.
    #[cfg(test)]
    pub(crate) fn with_child(mut self, child: Node) -> Self {
        self.add_child(child).unwrap();
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Drop size and timestamp, keeping name and kind.
    pub fn strip_attributes(&mut self) {
        self.size = None;
        self.modified_at = None;
    }

    pub fn child(&self, kind: NodeKind, name: &str) -> Option<&Node> {
        self.children
            .iter()
            .find(|c| c.kind == kind && c.name == name)
    }

    pub fn child_mut(&mut self, kind: NodeKind, name: &str) -> Option<&mut Node> {
        self.children
            .iter_mut()
            .find(|c| c.kind == kind && c.name == name)
    }

    /// Any child with this name, regardless of kind.
    pub fn child_named(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Append a child, keeping names unique within the directory.
    pub fn add_child(&mut self, child: Node) -> Result<()> {
        if !is_valid_name(&child.name) {
            return Err(AppError::validation(format!(
                "invalid entry name '{}' in directory '{}'",
                child.name.escape_debug(),
                self.name
            )));
        }
        if !self.is_dir() {
            return Err(AppError::validation(format!(
                "cannot add '{}' under file '{}'",
                child.name, self.name
            )));
        }
        if self.child_named(&child.name).is_some() {
            return Err(AppError::validation(format!(
                "duplicate name '{}' in directory '{}'",
                child.name, self.name
            )));
        }
        self.children.push(child);
        Ok(())
    }

    pub fn remove_child(&mut self, kind: NodeKind, name: &str) -> Option<Node> {
        let index = self
            .children
            .iter()
            .position(|c| c.kind == kind && c.name == name)?;
        Some(self.children.remove(index))
    }

    /// Number of nodes in this subtree, excluding self.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }
}

/// Whether `name` can be a single path segment.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

/// One kind-tagged step of a node path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathSegment {
    pub kind: NodeKind,
    pub name: String,
}

/// Kind-tagged address of a node from the tree root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodePath {
    segments: Vec<PathSegment>,
}

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Path of a child of this node.
    pub fn child(&self, kind: NodeKind, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment {
            kind,
            name: name.into(),
        });
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Kind-agnostic key, used to notice a name that changed kind.
    pub fn name_key(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}:{}", segment.kind.tag(), segment.name)?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = AppError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let body = s
            .strip_prefix('/')
            .ok_or_else(|| AppError::validation(format!("node path '{s}' is not absolute")))?;
        if body.is_empty() {
            return Ok(Self::root());
        }

        let segments = body
            .split('/')
            .map(|raw| {
                let (tag, name) = raw.split_once(':').ok_or_else(|| {
                    AppError::validation(format!("segment '{raw}' in '{s}' has no kind tag"))
                })?;
                let kind = match tag {
                    "dir" => NodeKind::Directory,
                    "file" => NodeKind::File,
                    other => {
                        return Err(AppError::validation(format!(
                            "unknown kind tag '{other}' in '{s}'"
                        )));
                    }
                };
                Ok(PathSegment {
                    kind,
                    name: name.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { segments })
    }
}

impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Full snapshot of one mirror at one crawl instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorTree {
    pub mirror_id: String,
    pub role: MirrorRole,
    /// Endpoint the crawl went through, for reports
    #[serde(default)]
    pub source: String,
    pub policy: AnalysisPolicy,
    pub crawl_started_at: DateTime<Utc>,
    pub crawl_finished_at: DateTime<Utc>,
    pub root: Node,
}

impl MirrorTree {
    /// Empty tree stamped with the current instant.
    pub fn new(mirror_id: impl Into<String>, role: MirrorRole, policy: AnalysisPolicy) -> Self {
        let now = Utc::now();
        Self {
            mirror_id: mirror_id.into(),
            role,
            source: String::new(),
            policy,
            crawl_started_at: now,
            crawl_finished_at: now,
            root: Node::directory(""),
        }
    }

    /// Crawl-completion instant in epoch milliseconds.
    pub fn timestamp_millis(&self) -> i64 {
        self.crawl_finished_at.timestamp_millis()
    }

    /// `<mirrorId>-<epochMillis>`, the stored name of this snapshot.
    pub fn snapshot_id(&self) -> String {
        format!("{}-{}", self.mirror_id, self.timestamp_millis())
    }

    pub fn get(&self, path: &NodePath) -> Option<&Node> {
        path.segments()
            .iter()
            .try_fold(&self.root, |node, seg| node.child(seg.kind, &seg.name))
    }

    pub fn get_mut(&mut self, path: &NodePath) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for seg in path.segments() {
            node = node.child_mut(seg.kind, &seg.name)?;
        }
        Some(node)
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.get(path).is_some()
    }

    /// Insert `node` as a child of the directory at `parent`.
    pub fn insert(&mut self, parent: &NodePath, node: Node) -> Result<()> {
        let target = self
            .get_mut(parent)
            .ok_or_else(|| AppError::validation(format!("parent {parent} does not exist")))?;
        target.add_child(node)
    }

    /// Detach and return the node at `path`. The root cannot be removed.
    pub fn remove(&mut self, path: &NodePath) -> Option<Node> {
        let parent = path.parent()?;
        let last = path.last()?;
        self.get_mut(&parent)?.remove_child(last.kind, &last.name)
    }

    /// Pre-order walk over every node except the root.
    pub fn walk(&self) -> Vec<(NodePath, &Node)> {
        let mut out = Vec::new();
        collect(&self.root, &NodePath::root(), &mut out);
        out
    }

    pub fn node_count(&self) -> usize {
        self.root.descendant_count()
    }

    pub fn file_count(&self) -> usize {
        self.walk()
            .iter()
            .filter(|(_, n)| n.kind == NodeKind::File)
            .count()
    }
}

fn collect<'a>(node: &'a Node, path: &NodePath, out: &mut Vec<(NodePath, &'a Node)>) {
    for child in &node.children {
        let child_path = path.child(child.kind, child.name.clone());
        out.push((child_path.clone(), child));
        collect(child, &child_path, out);
    }
}
