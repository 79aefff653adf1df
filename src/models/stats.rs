//! Per-run workflow statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Stage;

/// Start and end instants of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageTiming {
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// A trigger that fired late or was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Misfire {
    pub job_group: String,
    pub mirror: String,
    pub scheduled_for: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
    pub reason: String,
}

/// Timings of one mirror run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub mirror: String,
    #[serde(default)]
    pub mirror_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageTiming>,
    #[serde(default)]
    pub misfires: Vec<Misfire>,
    #[serde(default)]
    pub succeeded: bool,
    /// `<stage>: <error>` of a failed run
    #[serde(default)]
    pub error: Option<String>,
    /// Crawl completion of a successful run
    #[serde(default)]
    pub visited_at: Option<DateTime<Utc>>,
}

impl WorkflowStats {
    pub fn start(mirror: impl Into<String>) -> Self {
        Self {
            mirror: mirror.into(),
            mirror_id: None,
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            misfires: Vec::new(),
            succeeded: false,
            error: None,
            visited_at: None,
        }
    }

    /// Open a stage, closing the previous one if it is still open.
    pub fn begin(&mut self, stage: Stage) {
        let now = Utc::now();
        self.close_open(now);
        self.stages.push(StageTiming {
            stage,
            started_at: now,
            finished_at: None,
        });
    }

    pub fn finish(&mut self, succeeded: bool) {
        let now = Utc::now();
        self.close_open(now);
        self.finished_at = Some(now);
        self.succeeded = succeeded;
    }

    fn close_open(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.stages.last_mut() {
            if last.finished_at.is_none() {
                last.finished_at = Some(now);
            }
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageTiming> {
        self.stages.iter().find(|t| t.stage == stage)
    }

    /// `<mirrorId>-<epochMillis>-workflow`; the mirror name stands in for
    /// runs that never connected.
    pub fn document_id(&self) -> String {
        format!(
            "{}-{}-workflow",
            self.mirror_id.as_deref().unwrap_or(&self.mirror),
            self.started_at.timestamp_millis()
        )
    }

    pub fn total_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
