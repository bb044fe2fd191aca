//! Observable groups (§4.15): aggregate job counts across multiple named
//! queues, polled on an interval, and fan-out submission of the same
//! payload to every queue in the group.

use crate::error::JobResult;
use crate::job::{JobOptions, JobRecord};
use crate::keys::QueueKeys;
use crate::queue::JobCounts;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn add_counts(total: &mut JobCounts, other: &JobCounts) {
    total.waiting += other.waiting;
    total.active += other.active;
    total.completed += other.completed;
    total.failed += other.failed;
    total.delayed += other.delayed;
    total.paused += other.paused;
    total.dependency_wait += other.dependency_wait;
    total.dead_letter += other.dead_letter;
}

/// Tracks a set of queues as one logical unit: aggregate counts, and
/// fan-out submission of identical payloads.
pub struct Observable {
    pool: Pool,
    prefix: String,
    queues: Vec<String>,
    poll_interval: Duration,
    running: AtomicBool,
    last_snapshot: Mutex<Option<JobCounts>>,
}

impl Observable {
    pub fn new(pool: Pool, prefix: impl Into<String>, queues: Vec<String>, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            pool,
            prefix: prefix.into(),
            queues,
            poll_interval,
            running: AtomicBool::new(false),
            last_snapshot: Mutex::new(None),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn counts_for(&self, queue: &str) -> JobResult<JobCounts> {
        let keys = QueueKeys::new(self.prefix.clone(), queue);
        let mut conn = self.pool.get().await?;

        let waiting: u64 = conn.llen(keys.waiting()).await?;
        let active: u64 = conn.llen(keys.active()).await?;
        let completed: u64 = conn.llen(keys.completed()).await?;
        let failed: u64 = conn.llen(keys.failed()).await?;
        let delayed: u64 = conn.zcard(keys.delayed()).await?;
        let dependency_wait: u64 = conn.scard(keys.dependency_wait()).await?;
        let dead_letter: u64 = conn.llen(keys.dead_letter()).await?;
        let paused: u64 = if conn.exists(keys.paused()).await? { 1 } else { 0 };

        Ok(JobCounts {
            waiting,
            active,
            completed,
            failed,
            delayed,
            paused,
            dependency_wait,
            dead_letter,
        })
    }

    /// Sums job counts across every queue in the group, caching the result
    /// as the last snapshot.
    pub async fn aggregate_counts(&self) -> JobResult<JobCounts> {
        let mut total = JobCounts::default();
        for queue in &self.queues {
            add_counts(&mut total, &self.counts_for(queue).await?);
        }
        *self.last_snapshot.lock().await = Some(total.clone());
        Ok(total)
    }

    pub async fn last_snapshot(&self) -> Option<JobCounts> {
        self.last_snapshot.lock().await.clone()
    }

    /// Submits the same payload to every queue in the group, returning the
    /// id assigned on each.
    pub async fn fan_out(&self, data: &str, opts: JobOptions) -> JobResult<HashMap<String, String>> {
        let mut results = HashMap::with_capacity(self.queues.len());
        let mut conn = self.pool.get().await?;

        for queue in &self.queues {
            let keys = QueueKeys::new(self.prefix.clone(), queue);
            let job = JobRecord::new(queue.clone(), data, opts.clone());
            let fields = crate::codec::encode_job(&job)?;
            let _: () = conn
                .hset_multiple(keys.job(job.id.as_str()), &fields.into_iter().collect::<Vec<_>>())
                .await?;
            let _: () = conn.rpush(keys.waiting(), job.id.as_str()).await?;
            results.insert(queue.clone(), job.id.as_str().to_string());
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_counts_add_accumulates_all_fields() {
        let mut total = JobCounts::default();
        add_counts(
            &mut total,
            &JobCounts {
                waiting: 1,
                active: 2,
                completed: 3,
                failed: 4,
                delayed: 5,
                paused: 0,
                dependency_wait: 0,
                dead_letter: 6,
            },
        );
        add_counts(
            &mut total,
            &JobCounts {
                waiting: 1,
                active: 1,
                completed: 1,
                failed: 1,
                delayed: 1,
                paused: 0,
                dependency_wait: 0,
                dead_letter: 1,
            },
        );
        assert_eq!(total.waiting, 2);
        assert_eq!(total.dead_letter, 7);
    }
}
