//! Redis-backed [`JobQueue`] implementation: submission (§4.4), promotion
//! (§4.5), and query/mutation (§4.6).

use crate::codec::{decode_job, encode_job};
use crate::error::{JobError, JobResult};
use crate::events::{names, Event, EventBus};
use crate::job::{JobId, JobInfo, JobOptions, JobRecord, JobStatus};
use crate::keys::QueueKeys;
use crate::priority;
use crate::queue::{BulkResult, JobCounts, JobQueue, Page};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Redis-backed implementation of [`JobQueue`]; serves any number of queues
/// sharing one key prefix.
pub struct RedisJobQueue {
    pool: Pool,
    prefix: String,
    priority_levels: u8,
    rate_limiter: Option<RateLimiter>,
    events: Arc<EventBus>,
}

impl RedisJobQueue {
    pub fn new(pool: Pool, prefix: impl Into<String>, priority_levels: u8, events: Arc<EventBus>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            priority_levels,
            rate_limiter: None,
            events,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        QueueKeys::new(self.prefix.clone(), queue)
    }

    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    async fn store_job(&self, keys: &QueueKeys, job: &JobRecord) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let fields = encode_job(job)?;
        let _: () = conn
            .hset_multiple(keys.job(job.id.as_str()), &fields.into_iter().collect::<Vec<_>>())
            .await?;
        Ok(())
    }

    async fn load_job(&self, keys: &QueueKeys, job_id: &str) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(keys.job(job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(decode_job(&fields)?))
    }

    /// Places a job already past its dependency/rate-limit gates into the
    /// delayed set, a priority list, or straight into `waiting`.
    async fn place(&self, keys: &QueueKeys, job: &JobRecord) -> JobResult<()> {
        if job.delay > 0 {
            let fire_at = job.timestamp.timestamp_millis() + job.delay as i64;
            let mut conn = self.conn().await?;
            let _: () = conn.zadd(keys.delayed(), job.id.as_str(), fire_at).await?;
            self.events.emit(
                Event::new(names::JOB_DELAYED, serde_json::json!({"delay": job.delay}))
                    .for_job(keys.queue_name(), job.id.as_str()),
            );
        } else {
            priority::enqueue(
                &self.pool,
                keys,
                job.id.as_str(),
                job.opts.priority,
                self.priority_levels,
                job.opts.lifo,
            )
            .await?;
        }
        Ok(())
    }

    /// Registers `job` as waiting on each of its unfinished dependencies,
    /// recording the reverse edge so completion can re-evaluate it later.
    async fn gate_on_dependencies(&self, keys: &QueueKeys, job: &JobRecord, unfinished: &[String]) -> JobResult<()> {
        let mut conn = self.conn().await?;
        for dep in unfinished {
            let _: () = conn.sadd(keys.dependents(dep), job.id.as_str()).await?;
        }
        let _: () = conn.sadd(keys.dependency_wait(), job.id.as_str()).await?;
        Ok(())
    }

    /// Returns the subset of `dep_ids` that have not completed yet (i.e.
    /// their job hash still exists and is not in `completed`).
    async fn unfinished_dependencies(&self, keys: &QueueKeys, dep_ids: &[String]) -> JobResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut unfinished = Vec::new();
        for dep in dep_ids {
            let exists: bool = conn.exists(keys.job(dep)).await?;
            if exists {
                unfinished.push(dep.clone());
            }
        }
        Ok(unfinished)
    }

    /// Re-evaluates every job waiting on `completed_id`'s completion: drops
    /// the satisfied dependency from each, and promotes any whose
    /// dependencies are now all satisfied.
    async fn release_dependents(&self, keys: &QueueKeys, completed_id: &str) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let dependents: Vec<String> = conn.smembers(keys.dependents(completed_id)).await?;

        for dependent_id in dependents {
            let Some(mut dependent) = self.load_job(keys, &dependent_id).await? else {
                continue;
            };
            dependent.dependencies.retain(|d| d != completed_id);
            self.store_job(keys, &dependent).await?;

            if dependent.dependencies.is_empty() {
                let _: () = conn.srem(keys.dependency_wait(), &dependent_id).await?;
                self.place(keys, &dependent).await?;
                debug!(job_id = %dependent_id, "dependencies satisfied, promoted to waiting");
            }
        }

        let _: () = conn.del(keys.dependents(completed_id)).await?;
        Ok(())
    }

    /// Sweeps `delayed` for entries whose fire time has passed and places
    /// them onto a priority list / `waiting` (§4.5).
    pub async fn promote_delayed(&self, queue: &str) -> JobResult<u64> {
        let keys = self.keys(queue);
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = conn.zrangebyscore(keys.delayed(), 0, now).await?;
        let mut moved = 0u64;

        for id in due {
            // ZREM returning 0 means another instance already claimed it.
            let removed: i64 = conn.zrem(keys.delayed(), &id).await?;
            if removed == 0 {
                continue;
            }

            let Some(job) = self.load_job(&keys, &id).await? else { continue };
            priority::enqueue(&self.pool, &keys, &id, job.opts.priority, self.priority_levels, job.opts.lifo).await?;
            moved += 1;
        }

        if moved > 0 {
            debug!(queue, moved, "promoted delayed jobs to waiting");
        }
        Ok(moved)
    }

    /// Runs the priority-list pump for `queue` (§4.12).
    pub async fn pump_priority(&self, queue: &str) -> JobResult<u64> {
        priority::pump(&self.pool, &self.keys(queue), self.priority_levels).await
    }

    /// Pops the next job off `waiting`, moves it to `active`, and returns it.
    /// Returns `None` if the queue is empty.
    pub async fn dequeue(&self, queue: &str) -> JobResult<Option<JobRecord>> {
        let keys = self.keys(queue);
        let mut conn = self.conn().await?;

        let job_id: Option<String> = conn.lpop(keys.waiting(), None).await?;
        let Some(job_id) = job_id else { return Ok(None) };

        let Some(mut job) = self.load_job(&keys, &job_id).await? else {
            return Ok(None);
        };
        job.mark_processing();
        self.store_job(&keys, &job).await?;
        let _: () = conn.rpush(keys.active(), &job_id).await?;

        self.events.emit(Event::new(names::JOB_ACTIVE, serde_json::json!({})).for_job(queue, &job_id));
        Ok(Some(job))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Cheap readiness probe: a `PING` round trip against the pool.
    pub async fn health_check(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    /// Marks `job_id` completed: moves it out of `active`, appends to
    /// `completed`, and releases any dependents.
    pub async fn complete(&self, queue: &str, job_id: &str, return_value: Option<String>) -> JobResult<()> {
        let keys = self.keys(queue);
        let mut conn = self.conn().await?;

        let Some(mut job) = self.load_job(&keys, job_id).await? else {
            return Err(JobError::NotFound(job_id.to_string()));
        };
        job.mark_completed(return_value);
        self.store_job(&keys, &job).await?;

        let _: () = conn.lrem(keys.active(), 0, job_id).await?;
        let _: () = conn.rpush(keys.completed(), job_id).await?;

        self.release_dependents(&keys, job_id).await?;

        self.events.emit(
            Event::new(names::JOB_COMPLETED, serde_json::json!({}))
                .for_job(queue, job_id),
        );
        Ok(())
    }

    /// Marks `job_id` failed. If its retry policy permits another attempt,
    /// re-delays it; otherwise appends it to `failed` and returns
    /// [`FailOutcome::Exhausted`] so the caller can decide whether to also
    /// move it to the dead letter queue.
    pub async fn fail(&self, queue: &str, job_id: &str, error: &JobError) -> JobResult<FailOutcome> {
        let keys = self.keys(queue);
        let mut conn = self.conn().await?;

        let Some(mut job) = self.load_job(&keys, job_id).await? else {
            return Err(JobError::NotFound(job_id.to_string()));
        };
        job.mark_failed(error.to_string());
        let _: () = conn.lrem(keys.active(), 0, job_id).await?;

        // The configured retry policy decides *when* to stop retrying; the
        // error's own classification decides *whether* retrying this kind
        // of failure makes sense at all.
        let should_retry =
            job.retry_policy().should_retry(job.attempts_made) && error.is_retryable() && !error.should_dlq();

        if should_retry {
            let delay = job.retry_policy().delay_for_attempt(job.attempts_made);
            job.delay = delay.as_millis() as u64;
            job.timestamp = Utc::now();
            self.store_job(&keys, &job).await?;
            self.place(&keys, &job).await?;
            Ok(FailOutcome::Retried(job))
        } else {
            job.mark_terminal_failure();
            self.store_job(&keys, &job).await?;
            let _: () = conn.rpush(keys.failed(), job_id).await?;
            self.events.emit(
                Event::new(names::JOB_FAILED, serde_json::json!({"reason": error.to_string()}))
                    .for_job(queue, job_id),
            );
            Ok(FailOutcome::Exhausted(job))
        }
    }
}

/// What happened to a job after [`RedisJobQueue::fail`].
pub enum FailOutcome {
    /// Re-delayed per its retry policy; still in play.
    Retried(JobRecord),
    /// Retries exhausted (or no retry policy); now sitting in `failed`.
    Exhausted(JobRecord),
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn add(&self, queue: &str, data: &str, mut opts: JobOptions) -> JobResult<JobId> {
        if let Some(limiter) = &self.rate_limiter {
            let result = limiter.check(queue, None).await?;
            if result.limited {
                opts.delay = opts.delay.max(result.reset_in_ms);
            }
        }

        let keys = self.keys(queue);
        let job = JobRecord::new(queue, data, opts);
        self.store_job(&keys, &job).await?;

        if !job.dependencies.is_empty() {
            let unfinished = self.unfinished_dependencies(&keys, &job.dependencies).await?;
            if !unfinished.is_empty() {
                self.gate_on_dependencies(&keys, &job, &unfinished).await?;
                self.events.emit(
                    Event::new(names::JOB_ADDED, serde_json::json!({"status": "dependency-wait"}))
                        .for_job(queue, job.id.as_str()),
                );
                return Ok(job.id);
            }
        }

        self.place(&keys, &job).await?;
        self.events.emit(
            Event::new(names::JOB_ADDED, serde_json::json!({}))
                .for_job(queue, job.id.as_str()),
        );
        Ok(job.id)
    }

    async fn get_job(&self, queue: &str, job_id: &str) -> JobResult<Option<JobInfo>> {
        let keys = self.keys(queue);
        let Some(job) = self.load_job(&keys, job_id).await? else {
            return Ok(None);
        };
        let status = self.status_of(&keys, &job).await?;
        let mut info = JobInfo::from(&job);
        info.status = status;
        Ok(Some(info))
    }

    async fn get_jobs(&self, queue: &str, status: Option<JobStatus>, page: Page) -> JobResult<Vec<JobInfo>> {
        let keys = self.keys(queue);
        let mut conn = self.conn().await?;

        let ids: Vec<String> = match status {
            Some(JobStatus::Waiting) | None => {
                conn.lrange(keys.waiting(), page.offset as isize, (page.offset + page.limit) as isize - 1)
                    .await?
            }
            Some(JobStatus::Active) => {
                conn.lrange(keys.active(), page.offset as isize, (page.offset + page.limit) as isize - 1)
                    .await?
            }
            Some(JobStatus::Completed) => {
                conn.lrange(keys.completed(), page.offset as isize, (page.offset + page.limit) as isize - 1)
                    .await?
            }
            Some(JobStatus::Failed) => {
                conn.lrange(keys.failed(), page.offset as isize, (page.offset + page.limit) as isize - 1)
                    .await?
            }
            Some(JobStatus::Delayed) => conn.zrange(keys.delayed(), page.offset as isize, (page.offset + page.limit) as isize - 1).await?,
            Some(JobStatus::DependencyWait) => conn.smembers(keys.dependency_wait()).await?,
            Some(JobStatus::DeadLetter) => {
                conn.lrange(keys.dead_letter(), page.offset as isize, (page.offset + page.limit) as isize - 1)
                    .await?
            }
            Some(JobStatus::Paused) => conn.lrange(keys.paused_jobs(), page.offset as isize, (page.offset + page.limit) as isize - 1).await?,
        };

        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load_job(&keys, &id).await? {
                let resolved_status = status.unwrap_or(self.status_of(&keys, &job).await?);
                let mut info = JobInfo::from(&job);
                info.status = resolved_status;
                infos.push(info);
            }
        }
        Ok(infos)
    }

    async fn get_job_counts(&self, queue: &str) -> JobResult<JobCounts> {
        let keys = self.keys(queue);
        let mut conn = self.conn().await?;

        Ok(JobCounts {
            waiting: conn.llen(keys.waiting()).await?,
            active: conn.llen(keys.active()).await?,
            completed: conn.llen(keys.completed()).await?,
            failed: conn.llen(keys.failed()).await?,
            delayed: conn.zcard(keys.delayed()).await?,
            paused: if conn.exists(keys.paused()).await? { 1 } else { 0 },
            dependency_wait: conn.scard(keys.dependency_wait()).await?,
            dead_letter: conn.llen(keys.dead_letter()).await?,
        })
    }

    async fn pause(&self, queue: &str) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set(self.keys(queue).paused(), "1").await?;
        Ok(())
    }

    async fn resume(&self, queue: &str) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(self.keys(queue).paused()).await?;
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(self.keys(queue).paused()).await?)
    }

    async fn remove_job(&self, queue: &str, job_id: &str) -> JobResult<bool> {
        let keys = self.keys(queue);
        let mut conn = self.conn().await?;

        let existed: i64 = conn.exists(keys.job(job_id)).await?;
        if existed == 0 {
            return Ok(false);
        }

        let _: () = redis::pipe()
            .del(keys.job(job_id))
            .lrem(keys.waiting(), 0, job_id)
            .lrem(keys.active(), 0, job_id)
            .lrem(keys.completed(), 0, job_id)
            .lrem(keys.failed(), 0, job_id)
            .zrem(keys.delayed(), job_id)
            .srem(keys.dependency_wait(), job_id)
            .lrem(keys.paused_jobs(), 0, job_id)
            .query_async(&mut *conn)
            .await?;

        for level in 0..self.priority_levels {
            let _: () = conn.lrem(keys.priority(level), 0, job_id).await?;
        }

        self.events.emit(Event::new(names::JOB_REMOVED, serde_json::json!({})).for_job(queue, job_id));
        Ok(true)
    }

    async fn empty(&self, queue: &str) -> JobResult<u64> {
        let keys = self.keys(queue);
        let mut conn = self.conn().await?;

        let ids: Vec<String> = conn.lrange(keys.waiting(), 0, -1).await?;
        let mut removed = ids.len() as u64;

        let paused_ids: Vec<String> = conn.lrange(keys.paused_jobs(), 0, -1).await?;
        removed += paused_ids.len() as u64;

        let mut pipe = redis::pipe();
        pipe.del(keys.waiting())
            .del(keys.active())
            .del(keys.completed())
            .del(keys.failed())
            .del(keys.delayed())
            .del(keys.dependency_wait())
            .del(keys.paused_jobs());
        let _: () = pipe.query_async(&mut *conn).await?;

        for id in ids.iter().chain(paused_ids.iter()) {
            let _: () = conn.del(keys.job(id)).await?;
        }

        for level in 0..self.priority_levels {
            let level_ids: Vec<String> = conn.lrange(keys.priority(level), 0, -1).await?;
            removed += level_ids.len() as u64;
            let _: () = conn.del(keys.priority(level)).await?;
        }

        Ok(removed)
    }

    async fn bulk_remove(&self, queue: &str, job_ids: &[String]) -> JobResult<BulkResult> {
        let mut result = BulkResult::default();
        for id in job_ids {
            if self.remove_job(queue, id).await? {
                result.succeeded.push(id.clone());
            } else {
                result.missing.push(id.clone());
            }
        }
        Ok(result)
    }

    /// Moves each id out of `waiting`/`delayed` and into `paused-jobs`.
    /// Ids not found in either are reported missing; already-active,
    /// completed, or dead-lettered jobs are left untouched and also count
    /// as missing, since there is nothing left to pause.
    async fn bulk_pause(&self, queue: &str, job_ids: &[String]) -> JobResult<BulkResult> {
        let keys = self.keys(queue);
        let mut conn = self.conn().await?;
        let mut result = BulkResult::default();

        for id in job_ids {
            let removed_from_waiting: i64 = conn.lrem(keys.waiting(), 0, id).await?;
            let removed_from_delayed: i64 = conn.zrem(keys.delayed(), id).await?;
            let mut removed_from_priority = 0i64;
            for level in 0..self.priority_levels {
                removed_from_priority += conn.lrem::<_, _, i64>(keys.priority(level), 0, id).await?;
            }

            if removed_from_waiting > 0 || removed_from_delayed > 0 || removed_from_priority > 0 {
                let _: () = conn.rpush(keys.paused_jobs(), id).await?;
                result.succeeded.push(id.clone());
            } else {
                result.missing.push(id.clone());
            }
        }
        Ok(result)
    }

    /// Moves each id out of `paused-jobs` back into `waiting`. Ids not
    /// currently paused are reported missing.
    async fn bulk_resume(&self, queue: &str, job_ids: &[String]) -> JobResult<BulkResult> {
        let keys = self.keys(queue);
        let mut conn = self.conn().await?;
        let mut result = BulkResult::default();

        for id in job_ids {
            let removed: i64 = conn.lrem(keys.paused_jobs(), 0, id).await?;
            if removed > 0 {
                let _: () = conn.rpush(keys.waiting(), id).await?;
                result.succeeded.push(id.clone());
            } else {
                result.missing.push(id.clone());
            }
        }
        Ok(result)
    }
}

impl RedisJobQueue {
    /// Derives a job's current [`JobStatus`] by probing the lists/sets it
    /// could be a member of. Not cheap — `get_jobs` with an explicit
    /// `status` filter avoids this by construction.
    async fn status_of(&self, keys: &QueueKeys, job: &JobRecord) -> JobResult<JobStatus> {
        let mut conn = self.conn().await?;
        let id = job.id.as_str();

        if conn.lpos::<_, _, Option<i64>>(keys.active(), id, Default::default()).await?.is_some() {
            return Ok(JobStatus::Active);
        }
        if job.finished_on.is_some() && job.failed_reason.is_none() {
            return Ok(JobStatus::Completed);
        }
        if conn.lpos::<_, _, Option<i64>>(keys.failed(), id, Default::default()).await?.is_some() {
            return Ok(JobStatus::Failed);
        }
        if conn.lpos::<_, _, Option<i64>>(keys.paused_jobs(), id, Default::default()).await?.is_some() {
            return Ok(JobStatus::Paused);
        }
        if conn.sismember(keys.dependency_wait(), id).await? {
            return Ok(JobStatus::DependencyWait);
        }
        if conn.zscore::<_, _, Option<f64>>(keys.delayed(), id).await?.is_some() {
            return Ok(JobStatus::Delayed);
        }
        if conn.lpos::<_, _, Option<i64>>(keys.dead_letter(), id, Default::default()).await?.is_some() {
            return Ok(JobStatus::DeadLetter);
        }
        Ok(JobStatus::Waiting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_per_queue_instance() {
        let pool_prefix = "queue";
        let keys_a = QueueKeys::new(pool_prefix, "emails");
        let keys_b = QueueKeys::new(pool_prefix, "reports");
        assert_ne!(keys_a.waiting(), keys_b.waiting());
    }
}
