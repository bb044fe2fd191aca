//! Cron-driven recurring jobs. One leader per fleet (via [`crate::leader`])
//! decides when a recurring definition is due and submits it through the
//! ordinary [`JobQueue::add`] path.

use crate::config::SchedulerConfig;
use crate::cron::CronSchedule;
use crate::error::{JobError, JobResult};
use crate::job::{JobOptions, RepeatOptions};
use crate::keys::QueueKeys;
use crate::leader::LeaderElection;
use crate::queue::JobQueue;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use parking_lot::RwLock;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

/// A registered recurring job: what queue and payload to submit, and on
/// what cron schedule.
pub struct ScheduledJob {
    pub name: String,
    pub queue: String,
    pub cron: String,
    pub enabled: bool,
    schedule: CronSchedule,
    data_factory: Arc<dyn Fn() -> String + Send + Sync>,
    opts_template: JobOptions,
}

impl std::fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("cron", &self.cron)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ScheduledJob {
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        repeat: RepeatOptions,
        data_factory: impl Fn() -> String + Send + Sync + 'static,
    ) -> JobResult<Self> {
        let schedule = CronSchedule::parse(&repeat.cron, repeat.tz.as_deref())?;
        Ok(Self {
            name: name.into(),
            queue: queue.into(),
            cron: repeat.cron.clone(),
            enabled: true,
            schedule,
            data_factory: Arc::new(data_factory),
            opts_template: JobOptions {
                repeat: Some(repeat),
                ..Default::default()
            },
        })
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn next_run_from(&self, from: DateTime<Utc>) -> JobResult<DateTime<Utc>> {
        self.schedule.next_after(from)
    }

    fn build_data(&self) -> String {
        (self.data_factory)()
    }
}

/// Snapshot of scheduler activity for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub id: String,
    pub is_leader: bool,
    pub scheduled_jobs: usize,
    pub jobs_executed: u64,
}

/// Information about a registered recurring job.
#[derive(Debug, Clone)]
pub struct ScheduledJobInfo {
    pub name: String,
    pub cron: String,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
}

/// Leader-gated cron dispatcher: only the elected leader actually submits
/// due jobs, so a fleet of N schedulers never double-fires a recurring job.
pub struct Scheduler<Q: JobQueue> {
    id: String,
    pool: Pool,
    queue: Arc<Q>,
    prefix: String,
    config: SchedulerConfig,
    leader: Arc<LeaderElection>,
    jobs: Arc<RwLock<HashMap<String, ScheduledJob>>>,
    shutdown_tx: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    jobs_executed: Arc<AtomicU64>,
}

impl<Q: JobQueue + 'static> Scheduler<Q> {
    pub fn new(pool: Pool, queue: Arc<Q>, prefix: impl Into<String>, config: SchedulerConfig, leader: Arc<LeaderElection>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            id: format!("scheduler-{}", Uuid::new_v4()),
            pool,
            queue,
            prefix: prefix.into(),
            config,
            leader,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            jobs_executed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn register(&self, job: ScheduledJob) {
        let name = job.name.clone();
        self.jobs.write().insert(name.clone(), job);
        info!(job_name = %name, "registered recurring job");
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.jobs.write().remove(name).is_some()
    }

    pub fn enable_job(&self, name: &str) -> bool {
        match self.jobs.write().get_mut(name) {
            Some(job) => {
                job.enabled = true;
                true
            }
            None => false,
        }
    }

    pub fn disable_job(&self, name: &str) -> bool {
        match self.jobs.write().get_mut(name) {
            Some(job) => {
                job.enabled = false;
                true
            }
            None => false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_leader(&self) -> bool {
        self.leader.is_leader()
    }

    pub fn list_jobs(&self) -> Vec<ScheduledJobInfo> {
        let now = Utc::now();
        self.jobs
            .read()
            .values()
            .map(|job| ScheduledJobInfo {
                name: job.name.clone(),
                cron: job.cron.clone(),
                enabled: job.enabled,
                next_run: job.next_run_from(now).ok(),
            })
            .collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            id: self.id.clone(),
            is_leader: self.is_leader(),
            scheduled_jobs: self.jobs.read().len(),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
        }
    }

    /// Runs the leader watchdog and, on each `check_interval` tick while
    /// leading, submits any recurring job whose next fire time has passed.
    pub async fn start(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Scheduler("scheduler already running".to_string()));
        }

        info!(scheduler_id = %self.id, "starting scheduler");
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let watch_interval = self.leader.watch_interval();
        let check_interval = self.config.check_interval();

        let mut since_check = check_interval;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Err(e) = self.leader.tick().await {
                error!(error = %e, "leadership tick failed");
            }
            let _ = self.leader.reconcile().await;

            if since_check >= check_interval {
                since_check = std::time::Duration::from_secs(0);
                if self.leader.is_leader() {
                    if let Err(e) = self.check_and_enqueue_jobs().await {
                        error!(error = %e, "failed to check recurring jobs");
                    }
                }
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(watch_interval) => {
                    since_check += watch_interval;
                }
            }
        }

        let _ = self.leader.step_down().await;
        self.running.store(false, Ordering::SeqCst);
        info!(scheduler_id = %self.id, "scheduler stopped");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn check_and_enqueue_jobs(&self) -> JobResult<()> {
        let now = Utc::now();
        let mut conn = self.pool.get().await?;
        let keys = QueueKeys::new(self.prefix.clone(), "scheduler");

        let due: Vec<(String, String, String)> = {
            let jobs = self.jobs.read();
            let mut due = Vec::new();
            for (name, job) in jobs.iter() {
                if !job.enabled {
                    continue;
                }
                due.push((name.clone(), job.queue.clone(), job.build_data()));
            }
            due
        };

        for (name, queue_name, data) in due {
            let last_run_key = keys.scheduled_last_run(&name);
            let last_run: Option<String> = conn.get(&last_run_key).await?;

            let should_fire = match last_run.as_deref().and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
                Some(last) => match self.next_fire_after(&name, last.with_timezone(&Utc)) {
                    Some(next) => next <= now,
                    None => false,
                },
                None => true,
            };

            if !should_fire {
                continue;
            }

            let _: () = conn.set(&last_run_key, now.to_rfc3339()).await?;
            match self.queue.add(&queue_name, &data, self.opts_for(&name)).await {
                Ok(job_id) => {
                    debug!(job_name = %name, %job_id, "enqueued recurring job");
                    self.jobs_executed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(job_name = %name, error = %e, "failed to enqueue recurring job");
                    let _: () = conn.del(&last_run_key).await?;
                }
            }
        }

        Ok(())
    }

    fn next_fire_after(&self, name: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.jobs.read().get(name).and_then(|job| job.next_run_from(after).ok())
    }

    fn opts_for(&self, name: &str) -> JobOptions {
        self.jobs
            .read()
            .get(name)
            .map(|job| job.opts_template.clone())
            .unwrap_or_default()
    }

    /// Runs a registered job immediately, outside its cron schedule.
    pub async fn trigger_job(&self, name: &str) -> JobResult<String> {
        let (queue_name, data, opts) = {
            let jobs = self.jobs.read();
            let job = jobs
                .get(name)
                .ok_or_else(|| JobError::NotFound(format!("recurring job not registered: {name}")))?;
            (job.queue.clone(), job.build_data(), job.opts_template.clone())
        };
        let job_id = self.queue.add(&queue_name, &data, opts).await?;
        Ok(job_id.to_string())
    }
}

/// A handful of common cron expressions, matching what most embedders reach
/// for first.
pub mod cron_expressions {
    pub const EVERY_MINUTE: &str = "* * * * *";
    pub const EVERY_5_MINUTES: &str = "*/5 * * * *";
    pub const EVERY_15_MINUTES: &str = "*/15 * * * *";
    pub const EVERY_30_MINUTES: &str = "*/30 * * * *";
    pub const EVERY_HOUR: &str = "0 * * * *";
    pub const DAILY_MIDNIGHT: &str = "0 0 * * *";
    pub const DAILY_6AM: &str = "0 6 * * *";
    pub const WEEKLY_MONDAY: &str = "0 0 * * 1";
    pub const MONTHLY: &str = "0 0 1 * *";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_job_computes_next_run() {
        let repeat = RepeatOptions {
            cron: cron_expressions::EVERY_MINUTE.to_string(),
            tz: None,
            start_date: None,
            end_date: None,
            limit: None,
        };
        let job = ScheduledJob::new("heartbeat", "default", repeat, || "{}".to_string()).unwrap();
        let now = Utc::now();
        let next = job.next_run_from(now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn invalid_cron_expression_is_rejected_at_registration() {
        let repeat = RepeatOptions {
            cron: "not a cron".to_string(),
            tz: None,
            start_date: None,
            end_date: None,
            limit: None,
        };
        assert!(ScheduledJob::new("bad", "default", repeat, || "{}".to_string()).is_err());
    }
}
