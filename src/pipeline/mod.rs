//! Pipeline stages and their orchestration.
//!
//! - `DiffEngine`: classify a mirror tree against the master's
//! - `DeltaEngine`: edits between two snapshots of one mirror, and their replay
//! - `SnapshotPolicy`: full snapshot or delta for a fresh crawl
//! - `MirrorWorkflow`: one sequential run of one mirror
//! - `Monitor`: the whole fleet on cron schedules

pub mod delta;
pub mod diff;
pub mod monitor;
pub mod policy;
pub mod scheduler;
pub mod workflow;

pub use delta::DeltaEngine;
pub use diff::DiffEngine;
pub use monitor::{MirrorRun, Monitor};
pub use policy::{DEFAULT_DELTA_LIMIT, SnapshotPolicy, StorageDecision};
pub use scheduler::{CronScheduler, JobKey, ScheduleListener, Trigger, parse_cron};
pub use workflow::{MirrorWorkflow, RunOutcome, SharedStatus};
