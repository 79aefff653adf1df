//! Fleet orchestration.
//!
//! The monitor owns every configured mirror. Runs of different mirrors go
//! through a bounded worker pool; runs of the same mirror never overlap, a
//! trigger arriving while one is in flight is skipped and recorded as a
//! misfire. A periodic sweep flags runs that have been going for too long.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;

use crate::connection::{ClientFactory, Connector, NetworkClientFactory};
use crate::error::{AppError, Result};
use crate::models::{Config, Mirror, MirrorStatus, Misfire, MonitorConfig};
use crate::pipeline::scheduler::{CronScheduler, JOB_GROUP, JobKey, ScheduleListener};
use crate::pipeline::workflow::{MirrorWorkflow, RunOutcome, SharedStatus, update_status};
use crate::pipeline::SnapshotPolicy;
use crate::storage::{DocumentStore, LocalStorage, SnapshotRepository};

/// One mirror and what is known about it.
struct MirrorHandle {
    name: String,
    cron: String,
    mirror: tokio::sync::Mutex<Mirror>,
    status: SharedStatus,
    pending_misfires: Mutex<Vec<Misfire>>,
}

impl MirrorHandle {
    fn new(mirror: Mirror) -> Self {
        Self {
            name: mirror.name.clone(),
            cron: mirror.cron.clone(),
            status: Arc::new(RwLock::new(MirrorStatus::new(&mirror.name, mirror.role))),
            mirror: tokio::sync::Mutex::new(mirror),
            pending_misfires: Mutex::new(Vec::new()),
        }
    }

    fn record_misfire(&self, misfire: Misfire) {
        let mut pending = match self.pending_misfires.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.push(misfire);
    }

    fn take_misfires(&self) -> Vec<Misfire> {
        let mut pending = match self.pending_misfires.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *pending)
    }

    fn status(&self) -> MirrorStatus {
        match self.status.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Result of one mirror's run; `Ok(None)` when the run was skipped.
pub type MirrorRun = (String, Result<Option<RunOutcome>>);

/// Runs and schedules the master and every secondary mirror.
pub struct Monitor {
    master: Arc<MirrorHandle>,
    secondaries: Vec<Arc<MirrorHandle>>,
    workflow: MirrorWorkflow,
    permits: Arc<Semaphore>,
    config: MonitorConfig,
}

impl Monitor {
    /// Build the fleet from configuration, with network clients and local storage.
    pub fn from_config(config: &Config) -> Result<Self> {
        let factory = NetworkClientFactory::new(config.ssh.clone(), config.http.clone());
        let store = LocalStorage::new(&config.storage.root);
        Self::new(config, Arc::new(factory), Arc::new(store))
    }

    pub fn new(
        config: &Config,
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self> {
        config.validate()?;
        let workflow = MirrorWorkflow::new(
            Connector::new(factory),
            SnapshotRepository::new(store),
            SnapshotPolicy::new(config.monitor.delta_limit),
        );
        Ok(Self::from_parts(
            config.master_mirror()?,
            config.secondary_mirrors(),
            workflow,
            config.monitor.clone(),
        ))
    }

    pub fn from_parts(
        master: Mirror,
        secondaries: Vec<Mirror>,
        workflow: MirrorWorkflow,
        config: MonitorConfig,
    ) -> Self {
        let workers = config.max_concurrent.max(1);
        log::info!(
            "Monitoring {} with {} secondary mirrors, {} workers",
            master.name,
            secondaries.len(),
            workers
        );
        Self {
            master: Arc::new(MirrorHandle::new(master)),
            secondaries: secondaries
                .into_iter()
                .map(|m| Arc::new(MirrorHandle::new(m)))
                .collect(),
            workflow,
            permits: Arc::new(Semaphore::new(workers)),
            config,
        }
    }

    fn handles(&self) -> impl Iterator<Item = &Arc<MirrorHandle>> {
        std::iter::once(&self.master).chain(self.secondaries.iter())
    }

    fn handle(&self, name: &str) -> Option<&Arc<MirrorHandle>> {
        self.handles().find(|h| h.name == name)
    }

    pub fn mirror_names(&self) -> Vec<String> {
        self.handles().map(|h| h.name.clone()).collect()
    }

    /// Current status of every mirror, master first.
    pub fn status(&self) -> Vec<MirrorStatus> {
        self.handles().map(|h| h.status()).collect()
    }

    /// Run one mirror now.
    pub async fn run_mirror(&self, name: &str) -> Result<Option<RunOutcome>> {
        let handle = self
            .handle(name)
            .ok_or_else(|| AppError::validation(format!("unknown mirror '{name}'")))?;
        self.run_handle(handle).await
    }

    /// Run every mirror once: the master first, then the secondaries in parallel.
    pub async fn run_once_all(&self) -> Vec<MirrorRun> {
        let mut runs = vec![(self.master.name.clone(), self.run_handle(&self.master).await)];

        let workers = self.config.max_concurrent.max(1);
        let mut pending = stream::iter(self.secondaries.iter())
            .map(|handle| async move { (handle.name.clone(), self.run_handle(handle).await) })
            .buffer_unordered(workers);

        let mut failures = 0usize;
        while let Some((name, result)) = pending.next().await {
            if result.is_err() {
                failures += 1;
            }
            runs.push((name, result));
        }
        if failures > 0 {
            log::warn!("{failures}/{} secondary mirrors failed", self.secondaries.len());
        }
        runs
    }

    async fn run_handle(&self, handle: &MirrorHandle) -> Result<Option<RunOutcome>> {
        let Ok(mut mirror) = handle.mirror.try_lock() else {
            let now = Utc::now();
            let misfire = Misfire {
                job_group: JOB_GROUP.to_string(),
                mirror: handle.name.clone(),
                scheduled_for: now,
                observed_at: now,
                reason: "previous run still in flight".to_string(),
            };
            log::warn!(
                "Misfire of {} for {} at {}: {}",
                misfire.job_group,
                misfire.mirror,
                now.to_rfc3339(),
                misfire.reason
            );
            handle.record_misfire(misfire);
            return Ok(None);
        };

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::validation("worker pool is closed"))?;
        let misfires = handle.take_misfires();
        self.workflow
            .run(&mut mirror, &handle.status, misfires)
            .await
            .map(Some)
    }

    /// Flag runs started more than `stuck_after_hours` before `now`.
    ///
    /// Each stuck run is reported once; returns the names flagged by this sweep.
    pub fn sweep_stuck(&self, now: DateTime<Utc>) -> Vec<String> {
        let limit = i64::try_from(self.config.stuck_after_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX);
        let mut flagged = Vec::new();
        for handle in self.handles() {
            update_status(&handle.status, |s| {
                let Some(started) = s.run_started_at else {
                    return;
                };
                if !s.stuck && now - started > limit {
                    s.stuck = true;
                    log::error!(
                        "[{}] Run started {} is stuck in {} stage",
                        s.name,
                        started.to_rfc3339(),
                        s.stage
                    );
                    flagged.push(s.name.clone());
                }
            });
        }
        flagged
    }

    /// Schedule every mirror on its cron expression and start the stuck sweep.
    ///
    /// Jobs run until the returned scheduler is shut down or dropped.
    pub fn start(self: &Arc<Self>) -> Result<CronScheduler> {
        let mut scheduler =
            CronScheduler::new(Duration::from_secs(self.config.misfire_threshold_secs));
        scheduler.add_listener(self.clone());

        for handle in self.handles() {
            let monitor = Arc::clone(self);
            let name = handle.name.clone();
            scheduler.schedule(JobKey::mirror(&handle.name), &handle.cron, move |trigger| {
                let monitor = Arc::clone(&monitor);
                let name = name.clone();
                async move {
                    log::debug!("{} fired for {}", trigger.job, trigger.scheduled_for.to_rfc3339());
                    match monitor.run_mirror(&name).await {
                        Ok(Some(outcome)) => log::info!("[{name}] Stored {}", outcome.stored_id),
                        Ok(None) => {}
                        Err(e) => log::debug!("[{name}] Scheduled run failed: {e}"),
                    }
                }
            })?;
        }

        let monitor = Arc::clone(self);
        scheduler.every(
            "stuck-detector",
            Duration::from_secs(self.config.stuck_check_interval_secs.max(1)),
            move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    monitor.sweep_stuck(Utc::now());
                }
            },
        );

        log::info!("Scheduled {} mirrors", scheduler.job_count() - 1);
        Ok(scheduler)
    }
}

impl ScheduleListener for Monitor {
    fn on_misfire(&self, misfire: &Misfire) {
        if let Some(handle) = self.handle(&misfire.mirror) {
            handle.record_misfire(misfire.clone());
        }
    }
}
