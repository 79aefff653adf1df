//! Mirror crawler.
//!
//! Walks a mirror breadth-first through a connected [`ProtocolClient`] and
//! materializes what it sees into a [`MirrorTree`].

use std::collections::VecDeque;

use chrono::Utc;

use crate::connection::ProtocolClient;
use crate::error::{AppError, Result};
use crate::models::{AnalysisPolicy, MirrorRole, MirrorTree, NodePath};
use crate::utils::join_remote;

/// Builds mirror trees according to an analysis policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorCrawler {
    policy: AnalysisPolicy,
}

impl MirrorCrawler {
    pub fn new(policy: AnalysisPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AnalysisPolicy {
        self.policy
    }

    /// Crawl from the client's configured remote path.
    pub async fn crawl(
        &self,
        client: &mut dyn ProtocolClient,
        mirror_id: &str,
        role: MirrorRole,
    ) -> Result<MirrorTree> {
        let root = client.endpoint().remote_path().to_string();
        self.crawl_from(client, &root, mirror_id, role).await
    }

    /// Crawl the subtree at `root_path`.
    ///
    /// Directories are always descended; files are kept only for a complete
    /// crawl. Any directory that cannot be listed aborts the whole crawl.
    pub async fn crawl_from(
        &self,
        client: &mut dyn ProtocolClient,
        root_path: &str,
        mirror_id: &str,
        role: MirrorRole,
    ) -> Result<MirrorTree> {
        let mut tree = MirrorTree::new(mirror_id, role, self.policy);
        tree.source = client.endpoint().to_string();
        tree.crawl_started_at = Utc::now();
        log::info!("[{mirror_id}] Crawling {} from {root_path}", tree.source);

        let mut pending = VecDeque::from([(NodePath::root(), root_path.to_string())]);
        let mut listed = 0usize;

        while let Some((path, remote)) = pending.pop_front() {
            let entries = client.list_from(&remote).await.map_err(|e| {
                log::warn!("[{mirror_id}] Listing {remote} failed: {e}");
                AppError::crawl(
                    format!("{mirror_id}:{remote}"),
                    format!("connection produced no listing ({e})"),
                )
            })?;
            listed += 1;

            for mut entry in entries {
                if !entry.is_dir() && !self.policy.includes_files() {
                    continue;
                }
                if !self.policy.keeps_attributes() {
                    entry.strip_attributes();
                }
                entry.children.clear();

                let child_path = path.child(entry.kind, entry.name.clone());
                let child_remote = join_remote(&remote, &entry.name);
                let descend = entry.is_dir();

                if let Err(e) = tree.insert(&path, entry) {
                    log::warn!("[{mirror_id}] Skipping entry in {remote}: {e}");
                    continue;
                }
                if descend {
                    pending.push_back((child_path, child_remote));
                }
            }
        }

        tree.crawl_finished_at = Utc::now();
        log::info!(
            "[{mirror_id}] Crawl done: {} directories listed, {} nodes, {} ms",
            listed,
            tree.node_count(),
            (tree.crawl_finished_at - tree.crawl_started_at).num_milliseconds()
        );
        Ok(tree)
    }
}
