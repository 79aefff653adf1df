//! Document storage for snapshots, deltas, diffs and run statistics.
//!
//! Documents are JSON strings grouped in collections and named after the
//! mirror and the crawl instant they describe:
//!
//! ```text
//! storage/
//! ├── master/                       # master snapshots and deltas
//! │   ├── ftp.example.org_ftp-1700000000000.json
//! │   └── ftp.example.org_ftp-1700086400000-delta.json
//! ├── mirror.example.net_http/      # one collection per mirror identity
//! │   └── mirror.example.net_http-1700000500000.json
//! ├── latest-diffs/                 # newest diff of every mirror
//! │   └── mirror.example.net_http-1700000500000-diff.json
//! └── statistics/
//!     └── mirror.example.net_http-1700000400000-workflow.json
//! ```

pub mod local;
pub mod memory;
mod snapshots;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::{AppError, Result};

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use snapshots::SnapshotRepository;

/// Collection holding the newest diff of every mirror.
pub const LATEST_DIFFS_COLLECTION: &str = "latest-diffs";

/// Collection holding per-run workflow statistics.
pub const STATISTICS_COLLECTION: &str = "statistics";

/// What a stored document contains, encoded in its id suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKind {
    Snapshot,
    Delta,
    Diff,
    Workflow,
}

impl DocumentKind {
    fn suffix(self) -> &'static str {
        match self {
            DocumentKind::Snapshot => "",
            DocumentKind::Delta => "-delta",
            DocumentKind::Diff => "-diff",
            DocumentKind::Workflow => "-workflow",
        }
    }
}

/// Parsed `<mirrorId>-<epochMillis>[-delta|-diff|-workflow]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    pub mirror_id: String,
    pub timestamp_ms: i64,
    pub kind: DocumentKind,
}

impl DocumentId {
    pub fn new(mirror_id: impl Into<String>, timestamp_ms: i64, kind: DocumentKind) -> Self {
        Self {
            mirror_id: mirror_id.into(),
            timestamp_ms,
            kind,
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}{}", self.mirror_id, self.timestamp_ms, self.kind.suffix())
    }
}

impl FromStr for DocumentId {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        let (rest, kind) = [DocumentKind::Delta, DocumentKind::Diff, DocumentKind::Workflow]
            .into_iter()
            .find_map(|kind| raw.strip_suffix(kind.suffix()).map(|rest| (rest, kind)))
            .unwrap_or((raw, DocumentKind::Snapshot));

        let (mirror_id, timestamp) = rest
            .rsplit_once('-')
            .ok_or_else(|| AppError::persistence(format!("malformed document id '{raw}'")))?;
        let timestamp_ms = timestamp
            .parse()
            .map_err(|_| AppError::persistence(format!("malformed timestamp in document id '{raw}'")))?;
        if mirror_id.is_empty() {
            return Err(AppError::persistence(format!("document id '{raw}' has no mirror id")));
        }

        Ok(Self::new(mirror_id, timestamp_ms, kind))
    }
}

/// Ordering used for history: oldest first, snapshot before delta at equal instants.
fn history_order(a: &DocumentId, b: &DocumentId) -> std::cmp::Ordering {
    a.timestamp_ms.cmp(&b.timestamp_ms).then(a.kind.cmp(&b.kind))
}

/// Trait for document store backends.
///
/// Every put and delete is atomic on its own: readers see the previous or the
/// next version of a document, never a partial one.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store `content` under `id` in `collection`, replacing any previous version.
    async fn put(&self, collection: &str, id: &str, content: &str) -> Result<()>;

    /// Fetch a document by id from whichever collection holds it.
    async fn get(&self, id: &str) -> Result<Option<String>>;

    /// Remove a document; returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Ids of a collection in history order. Unparsable names are skipped.
    async fn list(&self, collection: &str) -> Result<Vec<DocumentId>>;

    async fn document_count(&self, collection: &str) -> Result<usize> {
        Ok(self.list(collection).await?.len())
    }

    /// Id and content of the newest full snapshot in a collection.
    async fn latest_full_snapshot(&self, collection: &str) -> Result<Option<(DocumentId, String)>> {
        let latest = self
            .list(collection)
            .await?
            .into_iter()
            .filter(|id| id.kind == DocumentKind::Snapshot)
            .max_by(history_order);
        fetch(self, latest).await
    }

    /// Id and content of the newest document about one mirror in a collection.
    async fn latest_for_mirror(
        &self,
        collection: &str,
        mirror_id: &str,
    ) -> Result<Option<(DocumentId, String)>> {
        let latest = self
            .list(collection)
            .await?
            .into_iter()
            .filter(|id| id.mirror_id == mirror_id)
            .max_by(history_order);
        fetch(self, latest).await
    }
}

async fn fetch<S: DocumentStore + ?Sized>(
    store: &S,
    id: Option<DocumentId>,
) -> Result<Option<(DocumentId, String)>> {
    let Some(id) = id else {
        return Ok(None);
    };
    Ok(store.get(&id.to_string()).await?.map(|content| (id, content)))
}

pub(crate) fn sort_history(ids: &mut [DocumentId]) {
    ids.sort_by(history_order);
}
