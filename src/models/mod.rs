// src/models/mod.rs

//! Domain models for the mirror monitor.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod delta;
mod diff;
mod endpoint;
mod mirror;
mod stats;
mod tree;

// Re-export all public types
pub use config::{
    AccessConfig, Config, HostKeyPolicy, HttpConfig, LoggingConfig, MirrorConfig, MonitorConfig,
    ScheduleConfig, SshConfig, StorageConfig,
};
pub use delta::{AddEdit, Delta, UpdateEdit};
pub use diff::{Diff, DiffCategory, DiffEntry, DiffStats, NodeSummary};
pub use endpoint::{Credential, DEFAULT_ACCEPTABLE_LAG_MS, Endpoint, Pass, Protocol};
pub use mirror::{MASTER_COLLECTION, Mirror, MirrorRole, MirrorStatus, NO_CONNECTION_YET, Stage};
pub use stats::{Misfire, StageTiming, WorkflowStats};
pub use tree::{
    AnalysisPolicy, DIRECTORY_PLACEHOLDER_SIZE, Depth, MirrorTree, Node, NodeKind, NodePath,
    PathSegment, Verbosity, is_valid_name,
};
