//! Cron triggers for mirror runs.
//!
//! Each job runs in its own task: sleep until the next cron instant, fire,
//! wait for the run to finish, repeat. Triggers that came due while the run
//! was still going are not queued; they are reported as misfires, as are
//! triggers that fire later than the configured threshold.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::Misfire;

/// Job group of every mirror run.
pub const JOB_GROUP: &str = "Downloader";

/// Parse a six or seven field cron expression. `?` is read as `*`.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let normalized = expr
        .split_whitespace()
        .map(|field| if field == "?" { "*" } else { field })
        .collect::<Vec<_>>()
        .join(" ");
    Ok(Schedule::from_str(&normalized)?)
}

/// Identity of a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub group: String,
    pub name: String,
}

impl JobKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Key of a mirror's run job.
    pub fn mirror(name: impl Into<String>) -> Self {
        Self::new(JOB_GROUP, name)
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// One firing of a job.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub job: JobKey,
    pub scheduled_for: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
}

/// Observer of scheduler events.
pub trait ScheduleListener: Send + Sync {
    fn on_fire(&self, _trigger: &Trigger) {}

    fn on_misfire(&self, misfire: &Misfire);
}

/// Runs jobs on cron schedules until shut down.
pub struct CronScheduler {
    misfire_threshold: chrono::Duration,
    listeners: Vec<Arc<dyn ScheduleListener>>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl CronScheduler {
    pub fn new(misfire_threshold: Duration) -> Self {
        Self {
            misfire_threshold: chrono::Duration::from_std(misfire_threshold)
                .unwrap_or(chrono::Duration::MAX),
            listeners: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Listeners added after a job was scheduled do not see that job's events.
    pub fn add_listener(&mut self, listener: Arc<dyn ScheduleListener>) {
        self.listeners.push(listener);
    }

    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    /// Run `task` on every instant of `cron_expr`.
    pub fn schedule<F, Fut>(&mut self, job: JobKey, cron_expr: &str, task: F) -> Result<()>
    where
        F: Fn(Trigger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let schedule = parse_cron(cron_expr)?;
        let listeners = self.listeners.clone();
        let threshold = self.misfire_threshold;
        let name = job.to_string();
        log::info!("Scheduled {job} with '{cron_expr}'");

        let handle = tokio::spawn(async move {
            let mut after = Utc::now();
            loop {
                let Some(next) = schedule.after(&after).next() else {
                    log::info!("{job}: schedule has no further instants");
                    return;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;

                let fired_at = Utc::now();
                if fired_at - next > threshold {
                    report(&listeners, &job, next, fired_at, "trigger fired late");
                }
                let trigger = Trigger {
                    job: job.clone(),
                    scheduled_for: next,
                    fired_at,
                };
                for listener in &listeners {
                    listener.on_fire(&trigger);
                }

                task(trigger).await;

                let done = Utc::now();
                for skipped in schedule.after(&next).take_while(|at| *at <= done) {
                    report(&listeners, &job, skipped, done, "previous run still in flight");
                }
                after = done.max(next);
            }
        });
        self.tasks.push((name, handle));
        Ok(())
    }

    /// Run `task` every `period`, first tick immediately.
    pub fn every<F, Fut>(&mut self, name: impl Into<String>, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                task().await;
            }
        });
        self.tasks.push((name.into(), handle));
    }

    /// Stop every job. Runs in progress are dropped at their next await point.
    pub fn shutdown(&mut self) {
        for (name, handle) in self.tasks.drain(..) {
            handle.abort();
            log::debug!("Stopped {name}");
        }
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report(
    listeners: &[Arc<dyn ScheduleListener>],
    job: &JobKey,
    scheduled_for: DateTime<Utc>,
    observed_at: DateTime<Utc>,
    reason: &str,
) {
    let misfire = Misfire {
        job_group: job.group.clone(),
        mirror: job.name.clone(),
        scheduled_for,
        observed_at,
        reason: reason.to_string(),
    };
    log::warn!(
        "Misfire of {} for {} (due {}, observed {}): {}",
        misfire.job_group,
        misfire.mirror,
        scheduled_for.to_rfc3339(),
        observed_at.to_rfc3339(),
        reason
    );
    for listener in listeners {
        listener.on_misfire(&misfire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        fired: AtomicUsize,
        misfires: Mutex<Vec<Misfire>>,
    }

    impl ScheduleListener for Recorder {
        fn on_fire(&self, _trigger: &Trigger) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }

        fn on_misfire(&self, misfire: &Misfire) {
            self.misfires.lock().unwrap().push(misfire.clone());
        }
    }

    #[test]
    fn test_parse_cron_expressions() {
        assert!(parse_cron("0 0 2 * * *").is_ok());
        assert!(parse_cron("0 30 3 * * ?").is_ok());
        assert!(parse_cron("0 0 0/6 * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn test_frequency_schedule_fires_every_n_hours() {
        let schedule = parse_cron("0 0 0/6 * * *").unwrap();
        let hours: Vec<u32> = schedule
            .upcoming(Utc)
            .take(4)
            .map(|at| chrono::Timelike::hour(&at))
            .collect();
        assert!(hours.iter().all(|h| h % 6 == 0));
    }

    #[test]
    fn test_job_key() {
        let key = JobKey::mirror("example");
        assert_eq!(key.group, JOB_GROUP);
        assert_eq!(key.to_string(), "Downloader.example");
    }

    #[tokio::test]
    async fn test_job_fires() {
        let recorder = Arc::new(Recorder::default());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut scheduler = CronScheduler::new(Duration::from_secs(60));
        scheduler.add_listener(recorder.clone());
        let counter = Arc::clone(&runs);
        scheduler
            .schedule(JobKey::mirror("fast"), "* * * * * *", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown();

        assert!(runs.load(Ordering::SeqCst) >= 1);
        assert_eq!(recorder.fired.load(Ordering::SeqCst), runs.load(Ordering::SeqCst));
        assert_eq!(scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_triggers_are_misfires() {
        let recorder = Arc::new(Recorder::default());
        let mut scheduler = CronScheduler::new(Duration::from_secs(60));
        scheduler.add_listener(recorder.clone());
        scheduler
            .schedule(JobKey::mirror("slow"), "* * * * * *", |_| async {
                tokio::time::sleep(Duration::from_millis(2200)).await;
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(3600)).await;
        scheduler.shutdown();

        let misfires = recorder.misfires.lock().unwrap();
        assert!(!misfires.is_empty());
        assert!(misfires.iter().all(|m| m.job_group == JOB_GROUP && m.mirror == "slow"));
        assert!(misfires.iter().all(|m| m.reason.contains("in flight")));
    }
}
