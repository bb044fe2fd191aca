//! Dead letter queue (§4.11): a separate list + per-entry hash, distinct
//! from the ordinary `failed` list, for jobs that exhausted retries (or
//! failed validation) and need operator attention. Entries carry their own
//! record shape rather than the full `JobRecord` — just enough to diagnose
//! and optionally republish.

use crate::error::JobResult;
use crate::job::JobRecord;
use crate::keys::QueueKeys;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default)]
pub struct RepublishOptions {
    /// Reset `attemptsMade` to 0 before re-enqueuing.
    pub reset_retries: bool,
}

/// The record stored for one dead-lettered job — distinct from (and
/// smaller than) the originating [`JobRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: String,
    pub original_queue: String,
    pub data: String,
    pub failed_reason: Option<String>,
    pub attempts_made: u32,
    pub stacktrace: Vec<String>,
    pub moved_at: DateTime<Utc>,
    pub original_timestamp: DateTime<Utc>,
}

impl DeadLetterRecord {
    fn from_job(job: &JobRecord) -> Self {
        Self {
            id: job.id.as_str().to_string(),
            original_queue: job.queue.clone(),
            data: job.data.clone(),
            failed_reason: job.failed_reason.clone(),
            attempts_made: job.attempts_made,
            stacktrace: job.stacktrace.clone(),
            moved_at: Utc::now(),
            original_timestamp: job.timestamp,
        }
    }
}

pub struct DeadLetterQueue {
    pool: Pool,
    keys: QueueKeys,
}

impl DeadLetterQueue {
    pub fn new(pool: Pool, keys: QueueKeys) -> Self {
        Self { pool, keys }
    }

    /// Moves `job` into the dead letter queue under its own record shape.
    /// If `remove_from_original`, also removes it from the queue's own
    /// `failed` list so it does not appear in both places.
    pub async fn move_to_dead_letter(&self, job: &JobRecord, remove_from_original: bool) -> JobResult<()> {
        let mut conn = self.pool.get().await?;
        let record = DeadLetterRecord::from_job(job);
        let json = serde_json::to_string(&record)?;
        let job_key = self.keys.dead_letter_job(job.id.as_str());

        let _: () = conn.set(&job_key, &json).await?;
        let _: () = conn.rpush(self.keys.dead_letter(), job.id.as_str()).await?;

        if remove_from_original {
            let _: () = conn.lrem(self.keys.failed(), 0, job.id.as_str()).await?;
        }
        Ok(())
    }

    pub async fn get_jobs(&self, offset: isize, count: isize) -> JobResult<Vec<DeadLetterRecord>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = conn
            .lrange(self.keys.dead_letter(), offset, offset + count - 1)
            .await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let json: Option<String> = conn.get(self.keys.dead_letter_job(&id)).await?;
            if let Some(json) = json {
                records.push(serde_json::from_str(&json)?);
            }
        }
        Ok(records)
    }

    /// Re-enqueues `job_id` back onto its originating queue's `waiting`
    /// list from the dead-letter record, and removes it from the dead
    /// letter queue. The re-enqueued job is a fresh [`JobRecord`] built
    /// from the preserved `data`; only `attemptsMade` carries over unless
    /// `opts.reset_retries` is set.
    pub async fn republish(&self, job_id: &str, opts: RepublishOptions) -> JobResult<Option<JobRecord>> {
        let mut conn = self.pool.get().await?;
        let job_key = self.keys.dead_letter_job(job_id);
        let json: Option<String> = conn.get(&job_key).await?;
        let Some(json) = json else {
            return Ok(None);
        };
        let record: DeadLetterRecord = serde_json::from_str(&json)?;

        let mut job = JobRecord::new(&record.original_queue, &record.data, crate::job::JobOptions {
            job_id: Some(record.id.clone()),
            ..Default::default()
        });
        if !opts.reset_retries {
            job.attempts_made = record.attempts_made;
        }

        let new_fields = crate::codec::encode_job(&job)?;
        let _: () = conn
            .hset_multiple(self.keys.job(job_id), &new_fields.into_iter().collect::<Vec<_>>())
            .await?;
        let _: () = conn.rpush(self.keys.waiting(), job_id).await?;

        let _: () = conn.del(&job_key).await?;
        let _: () = conn.lrem(self.keys.dead_letter(), 0, job_id).await?;

        Ok(Some(job))
    }

    pub async fn remove(&self, job_id: &str) -> JobResult<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = conn.del(self.keys.dead_letter_job(job_id)).await?;
        let _: () = conn.lrem(self.keys.dead_letter(), 0, job_id).await?;
        Ok(removed > 0)
    }

    /// Drops every entry in the dead letter queue.
    pub async fn clear(&self) -> JobResult<u64> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = conn.lrange(self.keys.dead_letter(), 0, -1).await?;
        for id in &ids {
            let _: () = conn.del(self.keys.dead_letter_job(id)).await?;
        }
        let _: () = conn.del(self.keys.dead_letter()).await?;
        Ok(ids.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;

    #[test]
    fn republish_options_default_to_keeping_retry_count() {
        let opts = RepublishOptions::default();
        assert!(!opts.reset_retries);
    }

    #[test]
    fn dead_letter_record_carries_the_original_queue_and_timestamp() {
        let job = JobRecord::new("emails", "{\"to\":\"a@b.com\"}", JobOptions::default());
        let record = DeadLetterRecord::from_job(&job);
        assert_eq!(record.original_queue, "emails");
        assert_eq!(record.original_timestamp, job.timestamp);
        assert_eq!(record.data, job.data);
        assert!(record.moved_at >= job.timestamp);
    }
}
