//! Stalled-job checker (§4.8): periodically scans `active` for jobs whose
//! processing time has exceeded the configured threshold, and re-enqueues
//! them — unless they have already stalled too many times, in which case
//! they're marked as terminally failed and moved to the dead letter queue.

use crate::dlq::DeadLetterQueue;
use crate::error::JobResult;
use crate::events::{names, Event, EventBus};
use crate::job::JobRecord;
use crate::keys::QueueKeys;
use crate::lock::DistributedLock;
use chrono::Utc;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct StalledChecker {
    pool: Pool,
    keys: QueueKeys,
    lock: DistributedLock,
    dlq: DeadLetterQueue,
    events: Arc<EventBus>,
    /// A job is considered stalled once its processing time has exceeded
    /// this long without reaching a terminal state.
    threshold: Duration,
    max_stalled_retries: u32,
}

impl StalledChecker {
    pub fn new(
        pool: Pool,
        keys: QueueKeys,
        lock: DistributedLock,
        dlq: DeadLetterQueue,
        events: Arc<EventBus>,
        threshold: Duration,
        max_stalled_retries: u32,
    ) -> Self {
        Self {
            pool,
            keys,
            lock,
            dlq,
            events,
            threshold,
            max_stalled_retries,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// One scan of `active`. Returns the ids recovered (re-enqueued or
    /// dead-lettered).
    pub async fn check(&self) -> JobResult<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let active_ids: Vec<String> = conn.lrange(self.keys.active(), 0, -1).await?;
        let mut recovered = Vec::new();
        let now = Utc::now();

        for id in active_ids {
            let fields: HashMap<String, String> = conn.hgetall(self.keys.job(&id)).await?;
            if fields.is_empty() {
                let _: () = conn.lrem(self.keys.active(), 0, &id).await?;
                continue;
            }

            let mut job: JobRecord = crate::codec::decode_job(&fields)?;

            let Some(processed_on) = job.processed_on else {
                continue;
            };
            let elapsed = now.signed_duration_since(processed_on);
            if elapsed.num_milliseconds() <= self.threshold.as_millis() as i64 {
                continue;
            }

            // The lock's presence only strengthens the check: if it's still
            // held, a worker may still be legitimately running long, but the
            // processing-time threshold is the primary signal either way.
            if self.lock.is_locked(&id).await? {
                continue;
            }

            let _: () = conn.lrem(self.keys.active(), 0, &id).await?;

            self.events.emit(
                Event::new(names::JOB_STALLED, serde_json::json!({}))
                    .for_job(self.keys.queue_name(), &id),
            );

            let stall_count = job.push_stall_marker();
            if stall_count > self.max_stalled_retries {
                warn!(job_id = %id, stall_count, "job stalled too many times, moving to dead letter");
                job.mark_failed("stalled and exceeded retries");
                job.mark_terminal_failure();
                let fields = crate::codec::encode_job(&job)?;
                let _: () = conn
                    .hset_multiple(self.keys.job(&id), &fields.into_iter().collect::<Vec<_>>())
                    .await?;
                self.dlq.move_to_dead_letter(&job, false).await?;
            } else {
                info!(job_id = %id, stall_count, "recovering stalled job");
                let fields = crate::codec::encode_job(&job)?;
                let _: () = conn
                    .hset_multiple(self.keys.job(&id), &fields.into_iter().collect::<Vec<_>>())
                    .await?;
                let _: () = conn.lpush(self.keys.waiting(), &id).await?;
            }

            recovered.push(id);
        }

        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;

    #[test]
    fn a_freshly_added_job_has_no_processed_on_and_is_never_stalled() {
        let job = JobRecord::new("default", "{}", JobOptions::default());
        assert!(job.processed_on.is_none());
    }

    #[test]
    fn marking_a_stalled_job_terminally_failed_records_the_reason() {
        let mut job = JobRecord::new("default", "{}", JobOptions::default());
        job.mark_failed("stalled and exceeded retries");
        job.mark_terminal_failure();
        assert_eq!(job.failed_reason.as_deref(), Some("stalled and exceeded retries"));
        assert!(job.finished_on.is_some());
    }

    #[test]
    fn stall_markers_accumulate_past_the_retry_cap() {
        let mut job = JobRecord::new("default", "{}", JobOptions::default());
        let max_stalled_retries = 1u32;
        assert!(job.push_stall_marker() <= max_stalled_retries);
        assert!(job.push_stall_marker() > max_stalled_retries);
    }
}
