//! Worker pool: ticks over its queues, promotes delayed jobs and pumps
//! priority lists, then dispatches as many waiting jobs as it has spare
//! concurrency for.

use crate::config::{LockConfig, WorkerConfig};
use crate::dlq::DeadLetterQueue;
use crate::error::{JobError, JobResult};
use crate::events::{names, Event, EventBus};
use crate::job::JobRecord;
use crate::keys::QueueKeys;
use crate::lock::{DistributedLock, LockOptions};
use crate::queue::JobQueue;
use crate::redis::queue::{FailOutcome, RedisJobQueue};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub queues: Vec<String>,
    pub job_timeout: Duration,
    pub tick_interval: Duration,
    pub shutdown_timeout: Duration,
    pub lock: LockConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queues: vec!["default".to_string()],
            job_timeout: Duration::from_secs(300),
            tick_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(30),
            lock: LockConfig::default(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn from_worker_config(config: &WorkerConfig, queues: Vec<String>) -> Self {
        Self {
            concurrency: config.concurrency,
            queues,
            job_timeout: config.job_timeout(),
            tick_interval: config.tick_interval(),
            shutdown_timeout: config.shutdown_timeout(),
            lock: LockConfig::default(),
        }
    }

    pub fn with_lock_config(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }
}

/// A job handler: takes the job record and returns its opaque return value
/// on success. Registered per queue name.
pub type JobHandler =
    Arc<dyn Fn(JobRecord) -> BoxFuture<'static, JobResult<Option<String>>> + Send + Sync>;

/// Concurrent job processor over one or more queues sharing a key prefix.
pub struct WorkerPool {
    id: String,
    queue: Arc<RedisJobQueue>,
    lock: DistributedLock,
    events: Arc<EventBus>,
    config: WorkerPoolConfig,
    dlq_enabled_default: bool,
    handlers: Arc<RwLock<HashMap<String, JobHandler>>>,
    semaphore: Arc<Semaphore>,
    target_concurrency: Arc<AtomicI64>,
    in_flight: Arc<AtomicI64>,
    shutdown_tx: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<RedisJobQueue>,
        lock: DistributedLock,
        events: Arc<EventBus>,
        config: WorkerPoolConfig,
        dlq_enabled_default: bool,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let concurrency = config.concurrency;

        Self {
            id: format!("worker-{}", Uuid::new_v4()),
            queue,
            lock,
            events,
            config,
            dlq_enabled_default,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            target_concurrency: Arc::new(AtomicI64::new(concurrency as i64)),
            in_flight: Arc::new(AtomicI64::new(0)),
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            jobs_processed: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn register<F, Fut>(&self, queue: impl Into<String>, handler: F)
    where
        F: Fn(JobRecord) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = JobResult<Option<String>>> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |job| Box::pin(handler(job)));
        self.handlers.write().insert(queue.into(), handler);
    }

    /// Resizes target concurrency without disturbing in-flight jobs: growing
    /// adds permits immediately, shrinking just lowers the target that
    /// `dispatch` checks before acquiring the next permit.
    pub fn adjust_concurrency(&self, new_concurrency: usize) {
        let previous = self.target_concurrency.swap(new_concurrency as i64, Ordering::SeqCst);
        let delta = new_concurrency as i64 - previous;
        if delta > 0 {
            self.semaphore.add_permits(delta as usize);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the dispatch loop until [`Self::stop`] is called. Returns once
    /// every in-flight job finishes or `shutdown_timeout` elapses first.
    pub async fn start(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Worker("worker pool already running".to_string()));
        }

        info!(
            pool_id = %self.id,
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            "starting worker pool"
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            for queue_name in &self.config.queues {
                if self.queue.is_paused(queue_name).await.unwrap_or(false) {
                    continue;
                }
                let _ = self.queue.promote_delayed(queue_name).await;
                let _ = self.queue.pump_priority(queue_name).await;
            }

            self.dispatch().await;

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }
        }

        info!(pool_id = %self.id, "shutting down, draining in-flight jobs");
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            let _ = timeout(self.config.shutdown_timeout, async {
                while self.in_flight.load(Ordering::SeqCst) > 0 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!(
            pool_id = %self.id,
            processed = self.jobs_processed(),
            failed = self.jobs_failed(),
            "worker pool stopped"
        );
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Fills every free slot, bounded by the current target concurrency,
    /// with one job each across the configured queues in order.
    async fn dispatch(&self) {
        loop {
            if self.in_flight.load(Ordering::SeqCst) >= self.target_concurrency.load(Ordering::SeqCst) {
                break;
            }

            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                break;
            };

            let Some((queue_name, job)) = self.pop_next().await else {
                drop(permit);
                break;
            };

            self.in_flight.fetch_add(1, Ordering::SeqCst);
            self.spawn_job(permit, queue_name, job);
        }
    }

    async fn pop_next(&self) -> Option<(String, JobRecord)> {
        for queue_name in &self.config.queues {
            if let Ok(Some(job)) = self.queue.dequeue(queue_name).await {
                return Some((queue_name.clone(), job));
            }
        }
        None
    }

    fn spawn_job(&self, permit: tokio::sync::OwnedSemaphorePermit, queue_name: String, job: JobRecord) {
        let queue = self.queue.clone();
        let lock = self.lock.clone();
        let events = self.events.clone();
        let handlers = self.handlers.clone();
        let job_timeout = self.config.job_timeout;
        let lock_config = self.config.lock.clone();
        let jobs_processed = self.jobs_processed.clone();
        let jobs_failed = self.jobs_failed.clone();
        let in_flight = self.in_flight.clone();
        let dlq_enabled_default = self.dlq_enabled_default;
        let job_id = job.id.as_str().to_string();

        tokio::spawn(
            async move {
                let handler = handlers.read().get(&queue_name).cloned();
                let Some(handler) = handler else {
                    error!(job_id = %job_id, queue = %queue_name, "no handler registered for queue");
                    let err = JobError::Configuration("no handler registered for queue".to_string());
                    if let Ok(outcome) = queue.fail(&queue_name, &job_id, &err).await {
                        handle_outcome(&queue, &events, &queue_name, dlq_enabled_default, outcome).await;
                    }
                    jobs_failed.fetch_add(1, Ordering::Relaxed);
                    drop(permit);
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    return;
                };

                let guard = if lock_config.enabled {
                    let lock_opts = LockOptions {
                        duration: lock_config.duration(),
                        retries: lock_config.retries,
                        retry_delay: lock_config.retry_delay(),
                        auto_extend: true,
                        extend_interval: lock_config.duration().mul_f64(2.0 / 3.0),
                    };

                    match lock.acquire(&job_id, lock_opts).await {
                        Ok(Some(g)) => Some(g),
                        _ => {
                            // Another instance already claimed this job's lock;
                            // leave it to them rather than racing the handler.
                            drop(permit);
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }
                    }
                } else {
                    None
                };

                let outcome = timeout(job_timeout, handler(job.clone())).await;

                match outcome {
                    Ok(Ok(return_value)) => {
                        if let Err(e) = queue.complete(&queue_name, &job_id, return_value).await {
                            error!(job_id = %job_id, error = %e, "failed to mark job complete");
                        }
                        jobs_processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(e)) => {
                        warn!(job_id = %job_id, error = %e, "job execution failed");
                        if let Ok(outcome) = queue.fail(&queue_name, &job_id, &e).await {
                            handle_outcome(&queue, &events, &queue_name, dlq_enabled_default, outcome).await;
                        }
                        jobs_failed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        warn!(job_id = %job_id, timeout_secs = job_timeout.as_secs(), "job timed out");
                        let err = JobError::Timeout(job_timeout.as_secs());
                        if let Ok(outcome) = queue.fail(&queue_name, &job_id, &err).await {
                            handle_outcome(&queue, &events, &queue_name, dlq_enabled_default, outcome).await;
                        }
                        jobs_failed.fetch_add(1, Ordering::Relaxed);
                    }
                }

                // Release only after complete/fail has persisted the job's
                // terminal or retry state, so the stalled checker never sees
                // an unlocked job that's still mid-transition.
                if let Some(guard) = guard {
                    let _ = guard.release().await;
                }

                drop(permit);
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            .instrument(tracing::info_span!("job", job_id = %job_id)),
        );
    }
}

/// Once a job's retries are exhausted, decides whether it also gets moved
/// into the dead letter queue: a per-job override on `opts.dead_letter`
/// wins, otherwise falls back to the queue's configured default.
async fn handle_outcome(
    queue: &RedisJobQueue,
    events: &EventBus,
    queue_name: &str,
    dlq_enabled_default: bool,
    outcome: FailOutcome,
) {
    let FailOutcome::Exhausted(job) = outcome else {
        return;
    };

    let wants_dlq = job
        .opts
        .dead_letter
        .as_ref()
        .map(|d| d.enabled)
        .unwrap_or(dlq_enabled_default);

    if !wants_dlq {
        return;
    }

    let keys = QueueKeys::new(queue.prefix(), queue_name);
    let dlq = DeadLetterQueue::new(queue.pool().clone(), keys);
    let job_id = job.id.as_str().to_string();

    if let Err(e) = dlq.move_to_dead_letter(&job, true).await {
        error!(job_id = %job_id, error = %e, "failed to move job to dead letter queue");
    } else {
        events.emit(
            Event::new(names::JOB_MOVED_TO_DEAD_LETTER, serde_json::json!({}))
                .for_job(queue_name, &job_id),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_tick_cadence() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(50));
    }

    #[test]
    fn from_worker_config_carries_queue_names() {
        let worker_config = WorkerConfig::default();
        let pool_config = WorkerPoolConfig::from_worker_config(&worker_config, vec!["emails".into()]);
        assert_eq!(pool_config.queues, vec!["emails".to_string()]);
        assert_eq!(pool_config.concurrency, worker_config.concurrency);
    }
}
