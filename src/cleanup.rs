//! Cleanup sweep (§4.9): periodically trims `completed`/`failed`, first by
//! age then by a count cap, skipping any job marked `keepJobs`.

use crate::codec::decode_job;
use crate::error::JobResult;
use crate::keys::QueueKeys;
use chrono::Utc;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

pub struct CleanupPolicy {
    pub completed_lifetime: Duration,
    pub failed_lifetime: Duration,
    pub completed_cap: usize,
    pub failed_cap: usize,
}

pub struct Cleaner {
    pool: Pool,
    keys: QueueKeys,
    policy: CleanupPolicy,
}

impl Cleaner {
    pub fn new(pool: Pool, keys: QueueKeys, policy: CleanupPolicy) -> Self {
        Self { pool, keys, policy }
    }

    /// Runs one sweep over both `completed` and `failed`. Returns the
    /// number of job hashes removed.
    pub async fn run(&self) -> JobResult<u64> {
        let completed = self
            .sweep_list(&self.keys.completed(), self.policy.completed_lifetime, self.policy.completed_cap)
            .await?;
        let failed = self
            .sweep_list(&self.keys.failed(), self.policy.failed_lifetime, self.policy.failed_cap)
            .await?;
        let total = completed + failed;
        if total > 0 {
            info!(completed, failed, "cleanup sweep removed jobs");
        }
        Ok(total)
    }

    async fn sweep_list(&self, list_key: &str, lifetime: Duration, cap: usize) -> JobResult<u64> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = conn.lrange(list_key, 0, -1).await?;
        let now = Utc::now();
        let mut removed = 0u64;
        let mut survivors = Vec::with_capacity(ids.len());

        // Age pass: drop anything past its lifetime unless keep_jobs is set.
        for id in ids {
            let fields: HashMap<String, String> = conn.hgetall(self.keys.job(&id)).await?;
            if fields.is_empty() {
                continue;
            }
            let job = decode_job(&fields)?;
            if job.opts.keep_jobs {
                survivors.push(id);
                continue;
            }

            let finished_at = job.finished_on.unwrap_or(job.timestamp);
            let age = now.signed_duration_since(finished_at);
            if age.to_std().unwrap_or_default() > lifetime {
                let _: () = conn.del(self.keys.job(&id)).await?;
                let _: () = conn.lrem(list_key, 0, &id).await?;
                removed += 1;
            } else {
                survivors.push(id);
            }
        }

        // Count-cap pass: trim oldest survivors beyond `cap` (list order is
        // oldest-first, so trim from the head).
        if survivors.len() > cap {
            let overflow = survivors.len() - cap;
            for id in &survivors[..overflow] {
                let fields: HashMap<String, String> = conn.hgetall(self.keys.job(id)).await?;
                let keep = fields
                    .is_empty()
                    .then_some(false)
                    .unwrap_or_else(|| decode_job(&fields).map(|j| j.opts.keep_jobs).unwrap_or(false));
                if keep {
                    continue;
                }
                let _: () = conn.del(self.keys.job(id)).await?;
                let _: () = conn.lrem(list_key, 0, id).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_policy_stores_independent_lifetimes_per_list() {
        let policy = CleanupPolicy {
            completed_lifetime: Duration::from_secs(60),
            failed_lifetime: Duration::from_secs(120),
            completed_cap: 10,
            failed_cap: 20,
        };
        assert_ne!(policy.completed_lifetime, policy.failed_lifetime);
    }
}
