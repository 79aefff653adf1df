//! One run of one mirror.
//!
//! Stages run strictly in order: connect, crawl, delta against the last
//! stored snapshot, diff against the master (secondaries only), persist.
//! The session is closed as soon as the crawl is over, whatever its outcome.

use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::connection::Connector;
use crate::error::Result;
use crate::models::{
    Delta, Diff, DiffStats, MASTER_COLLECTION, Mirror, MirrorStatus, MirrorTree, Misfire, Stage,
    WorkflowStats,
};
use crate::pipeline::{DeltaEngine, DiffEngine, SnapshotPolicy, StorageDecision};
use crate::services::MirrorCrawler;
use crate::storage::SnapshotRepository;

/// Status shared between a running workflow and whoever reports on it.
pub type SharedStatus = Arc<RwLock<MirrorStatus>>;

/// Apply `change` to a shared status. A poisoned lock is taken over as is.
pub(crate) fn update_status(status: &RwLock<MirrorStatus>, change: impl FnOnce(&mut MirrorStatus)) {
    let mut guard = match status.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    change(&mut guard);
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub mirror_id: String,
    /// Id of the stored snapshot or delta document
    pub stored_id: String,
    pub decision: StorageDecision,
    pub delta_size: Option<usize>,
    pub diff: Option<DiffStats>,
    pub stats: WorkflowStats,
}

/// Artifacts carried from the compute stages into persistence.
struct Computed {
    tree: MirrorTree,
    delta: Option<Delta>,
    decision: StorageDecision,
    diff: Option<Diff>,
}

/// Stored tree, stored document id, decision, delta size and diff counts.
type Persisted = (MirrorTree, String, StorageDecision, Option<usize>, Option<DiffStats>);

/// Sequential pipeline for a single mirror.
#[derive(Clone)]
pub struct MirrorWorkflow {
    connector: Connector,
    repository: SnapshotRepository,
    policy: SnapshotPolicy,
    diff: DiffEngine,
    delta: DeltaEngine,
}

impl MirrorWorkflow {
    pub fn new(connector: Connector, repository: SnapshotRepository, policy: SnapshotPolicy) -> Self {
        Self {
            connector,
            repository,
            policy,
            diff: DiffEngine::new(),
            delta: DeltaEngine::new(),
        }
    }

    /// Report every missing node instead of only the topmost of each subtree.
    pub fn with_diff_engine(mut self, diff: DiffEngine) -> Self {
        self.diff = diff;
        self
    }

    pub fn repository(&self) -> &SnapshotRepository {
        &self.repository
    }

    /// Run the whole pipeline once and keep `status` current along the way.
    ///
    /// `last_visit` only moves on success. Statistics are stored whether the
    /// run succeeded or not.
    pub async fn run(
        &self,
        mirror: &mut Mirror,
        status: &RwLock<MirrorStatus>,
        misfires: Vec<Misfire>,
    ) -> Result<RunOutcome> {
        let mut stats = WorkflowStats::start(&mirror.name);
        stats.misfires = misfires;
        update_status(status, |s| {
            s.run_started_at = Some(stats.started_at);
            s.runs += 1;
        });

        let result = self.execute(mirror, status, &mut stats).await;
        stats.finish(result.is_ok());

        let failed_stage = stats.stages.last().map(|t| t.stage).unwrap_or(Stage::Connecting);
        match &result {
            Ok((tree, ..)) => {
                log::info!(
                    "[{}] Run finished in {} ms",
                    mirror.name,
                    stats.total_ms().unwrap_or_default()
                );
                let visited = tree.crawl_finished_at;
                stats.visited_at = Some(visited);
                update_status(status, |s| {
                    s.last_visit = Some(visited);
                    s.last_error = None;
                });
            }
            Err(e) => {
                log::error!("[{}] {} stage failed: {}", mirror.name, failed_stage, e);
                let message = format!("{failed_stage}: {e}");
                stats.error = Some(message.clone());
                update_status(status, |s| {
                    s.failures += 1;
                    s.last_error = Some(message);
                });
            }
        }

        if let Err(e) = self.repository.save_stats(&stats).await {
            log::warn!("[{}] Could not store workflow statistics: {}", mirror.name, e);
        }
        let snapshot = stats.clone();
        update_status(status, |s| {
            s.stage = Stage::Idle;
            s.run_started_at = None;
            s.stuck = false;
            s.last_stats = Some(snapshot);
        });

        let (tree, stored_id, decision, delta_size, diff) = result?;
        Ok(RunOutcome {
            mirror_id: tree.mirror_id,
            stored_id,
            decision,
            delta_size,
            diff,
            stats,
        })
    }

    async fn execute(
        &self,
        mirror: &mut Mirror,
        status: &RwLock<MirrorStatus>,
        stats: &mut WorkflowStats,
    ) -> Result<Persisted> {
        enter(status, stats, Stage::Connecting);
        let mut connection = self.connector.connect(mirror).await?;
        let mirror_id = connection.identity();
        stats.mirror_id = Some(mirror_id.clone());
        update_status(status, |s| s.mirror_id = Some(mirror_id.clone()));

        enter(status, stats, Stage::Crawling);
        let crawled = MirrorCrawler::new(mirror.policy)
            .crawl(connection.client(), &mirror_id, mirror.role)
            .await;
        self.connector.disconnect(mirror, connection).await;
        let tree = crawled?;
        log::info!(
            "[{}] Crawled {} nodes ({} files)",
            mirror.name,
            tree.node_count(),
            tree.file_count()
        );

        let computed = self.compute(mirror, tree, status, stats).await?;

        enter(status, stats, Stage::Persisting);
        self.persist(mirror, computed).await
    }

    async fn compute(
        &self,
        mirror: &Mirror,
        tree: MirrorTree,
        status: &RwLock<MirrorStatus>,
        stats: &mut WorkflowStats,
    ) -> Result<Computed> {
        enter(status, stats, Stage::DeltaComputing);
        let collection = mirror.collection()?;
        let previous = self.repository.latest_tree(&collection).await?;
        let delta = previous.as_ref().map(|older| self.delta.compute(older, &tree));
        let decision = self.policy.decide(&mirror.name, delta.as_ref());

        let diff = if mirror.is_master() {
            None
        } else {
            enter(status, stats, Stage::DiffComputing);
            match self.repository.latest_tree(MASTER_COLLECTION).await? {
                Some(master) => Some(self.diff.diff(&master, &tree)),
                None => {
                    log::warn!("[{}] No master snapshot stored yet, diff skipped", mirror.name);
                    None
                }
            }
        };

        Ok(Computed {
            tree,
            delta,
            decision,
            diff,
        })
    }

    async fn persist(
        &self,
        mirror: &Mirror,
        computed: Computed,
    ) -> Result<Persisted> {
        let Computed {
            tree,
            delta,
            decision,
            diff,
        } = computed;
        let collection = mirror.collection()?;

        let stored = match (&decision, &delta) {
            (StorageDecision::Delta { .. }, Some(delta)) => {
                self.repository.save_delta(&collection, delta).await
            }
            _ => self.repository.save_tree(&collection, &tree).await,
        };
        let stored_id = match stored {
            Ok(id) => id,
            Err(e) => {
                if let Some(delta) = &delta {
                    log::error!("[{}] Unstored delta:\n{}", mirror.name, delta.report());
                }
                if let Some(diff) = &diff {
                    log::error!("[{}] Unstored diff:\n{}", mirror.name, diff.stats().report());
                }
                return Err(e);
            }
        };
        log::info!("[{}] Stored {collection}/{stored_id}", mirror.name);

        let diff_stats = match &diff {
            Some(diff) => {
                let stats = diff.stats();
                if let Err(e) = self.repository.save_diff(diff).await {
                    log::error!("[{}] Unstored diff:\n{}", mirror.name, stats.report());
                    return Err(e);
                }
                log::info!("[{}] Diff against master:\n{}", mirror.name, stats.report());
                Some(stats)
            }
            None => None,
        };

        let delta_size = delta.as_ref().map(Delta::size);
        Ok((tree, stored_id, decision, delta_size, diff_stats))
    }
}

fn enter(status: &RwLock<MirrorStatus>, stats: &mut WorkflowStats, stage: Stage) {
    stats.begin(stage);
    log::debug!("[{}] Entering {} at {}", stats.mirror, stage, Utc::now().to_rfc3339());
    update_status(status, |s| s.stage = stage);
}
