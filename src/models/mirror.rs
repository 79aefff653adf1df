//! Monitored mirrors and their run-time status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{AnalysisPolicy, Pass, WorkflowStats};

/// Collection holding the master's snapshots and deltas.
pub const MASTER_COLLECTION: &str = "master";

/// Message shown until the first connection attempt resolves.
pub const NO_CONNECTION_YET: &str = "No connection yet";

/// Master is the reference, secondaries are compared against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorRole {
    Master,
    Secondary,
}

impl fmt::Display for MirrorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorRole::Master => f.write_str("master"),
            MirrorRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// A monitored mirror: its ordered passes plus the sticky pass memory.
#[derive(Debug, Clone)]
pub struct Mirror {
    pub name: String,
    pub role: MirrorRole,
    pub policy: AnalysisPolicy,
    /// Cron expression driving this mirror's runs
    pub cron: String,
    passes: Vec<Pass>,
    sticky: Option<usize>,
}

impl Mirror {
    pub fn new(
        name: impl Into<String>,
        role: MirrorRole,
        passes: Vec<Pass>,
        policy: AnalysisPolicy,
        cron: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            policy,
            cron: cron.into(),
            passes,
            sticky: None,
        }
    }

    pub fn is_master(&self) -> bool {
        self.role == MirrorRole::Master
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub(crate) fn passes_mut(&mut self) -> &mut [Pass] {
        &mut self.passes
    }

    /// Index of the pass that last connected successfully.
    pub fn sticky_index(&self) -> Option<usize> {
        self.sticky
    }

    pub(crate) fn set_sticky(&mut self, index: usize) {
        self.sticky = Some(index);
    }

    pub fn sticky_pass(&self) -> Option<&Pass> {
        self.sticky.and_then(|i| self.passes.get(i))
    }

    pub fn active_pass(&self) -> Option<&Pass> {
        self.passes.iter().find(|p| p.is_active())
    }

    /// `host_protocol` of the last successful pass.
    ///
    /// Fails until the mirror has connected at least once.
    pub fn identity(&self) -> Result<String> {
        self.sticky_pass()
            .map(|p| p.endpoint.identity())
            .ok_or_else(|| AppError::NotConnected(self.name.clone()))
    }

    /// Document collection this mirror's snapshots and deltas live in.
    pub fn collection(&self) -> Result<String> {
        match self.role {
            MirrorRole::Master => Ok(MASTER_COLLECTION.to_string()),
            MirrorRole::Secondary => self.identity(),
        }
    }
}

/// Pipeline stage of a mirror run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    Connecting,
    Crawling,
    DeltaComputing,
    DiffComputing,
    Persisting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Connecting => "connecting",
            Stage::Crawling => "crawling",
            Stage::DeltaComputing => "delta",
            Stage::DiffComputing => "diff",
            Stage::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// Operator-facing state of one mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorStatus {
    pub name: String,
    pub role: MirrorRole,
    pub mirror_id: Option<String>,
    pub stage: Stage,
    pub last_error: Option<String>,
    /// Crawl completion of the last fully successful run
    pub last_visit: Option<DateTime<Utc>>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub stuck: bool,
    pub runs: u64,
    pub failures: u64,
    pub last_stats: Option<WorkflowStats>,
}

impl MirrorStatus {
    pub fn new(name: impl Into<String>, role: MirrorRole) -> Self {
        Self {
            name: name.into(),
            role,
            mirror_id: None,
            stage: Stage::Idle,
            last_error: Some(NO_CONNECTION_YET.to_string()),
            last_visit: None,
            run_started_at: None,
            stuck: false,
            runs: 0,
            failures: 0,
            last_stats: None,
        }
    }

    /// Rebuild a status from stored run statistics, oldest first.
    pub fn from_history<'a>(
        name: impl Into<String>,
        role: MirrorRole,
        history: impl IntoIterator<Item = &'a WorkflowStats>,
    ) -> Self {
        let mut status = Self::new(name, role);
        for stats in history {
            status.runs += 1;
            if stats.mirror_id.is_some() {
                status.mirror_id = stats.mirror_id.clone();
            }
            if stats.succeeded {
                status.last_visit = stats.visited_at.or(stats.finished_at);
                status.last_error = None;
            } else {
                status.failures += 1;
                status.last_error = Some(
                    stats
                        .error
                        .clone()
                        .unwrap_or_else(|| "run did not finish".to_string()),
                );
            }
            status.last_stats = Some(stats.clone());
        }
        status
    }

    pub fn last_visit_display(&self) -> String {
        match self.last_visit {
            Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            None => "never".to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_started_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Credential, Endpoint, Protocol};

    fn make_mirror(role: MirrorRole) -> Mirror {
        let passes = Pass::build_all(
            &[
                Endpoint::new("mirror.example.org", Protocol::Ftp, "/pub"),
                Endpoint::new("mirror.example.org", Protocol::Http, "/pub"),
            ],
            &[Credential::anonymous()],
        );
        Mirror::new("example", role, passes, AnalysisPolicy::default(), "0 0 2 * * *")
    }

    #[test]
    fn test_identity_requires_a_connection() {
        let mut mirror = make_mirror(MirrorRole::Secondary);
        assert!(matches!(mirror.identity(), Err(AppError::NotConnected(_))));
        assert!(mirror.collection().is_err());

        mirror.set_sticky(1);
        assert_eq!(mirror.identity().unwrap(), "mirror.example.org_http");
        assert_eq!(mirror.collection().unwrap(), "mirror.example.org_http");
    }

    #[test]
    fn test_master_uses_shared_collection() {
        let mut mirror = make_mirror(MirrorRole::Master);
        mirror.set_sticky(0);
        assert_eq!(mirror.collection().unwrap(), MASTER_COLLECTION);
    }

    #[test]
    fn test_fresh_status_reads_never() {
        let status = MirrorStatus::new("example", MirrorRole::Secondary);
        assert_eq!(status.last_visit_display(), "never");
        assert_eq!(status.last_error.as_deref(), Some(NO_CONNECTION_YET));
        assert!(!status.is_running());
    }

    #[test]
    fn test_status_from_history_keeps_last_success_and_last_error() {
        let mut good = WorkflowStats::start("example");
        good.mirror_id = Some("mirror.example.org_ftp".into());
        good.finish(true);
        let visited = good.started_at;
        good.visited_at = Some(visited);

        let mut bad = WorkflowStats::start("example");
        bad.finish(false);
        bad.error = Some("connecting: all passes failed".into());

        let status = MirrorStatus::from_history("example", MirrorRole::Secondary, [&good, &bad]);
        assert_eq!(status.runs, 2);
        assert_eq!(status.failures, 1);
        assert_eq!(status.last_visit, Some(visited));
        assert_eq!(status.last_error.as_deref(), Some("connecting: all passes failed"));
        assert_eq!(status.mirror_id.as_deref(), Some("mirror.example.org_ftp"));

        let never = MirrorStatus::from_history("example", MirrorRole::Secondary, [&bad]);
        assert_eq!(never.last_visit_display(), "never");
        assert!(never.last_error.is_some());
    }
}
