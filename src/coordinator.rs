//! Work coordinator (§4.14): each instance periodically writes a
//! TTL'd record of its capacity, and every instance independently computes
//! the same fair worker-count distribution from the shared set of records.

use crate::error::JobResult;
use crate::keys::QueueKeys;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub max_workers: u32,
    pub jobs_per_worker: u32,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub workers_assigned: u32,
}

/// Publishes and evicts this fleet's instance records, and computes the
/// fair worker-count split.
pub struct Coordinator {
    pool: Pool,
    keys: QueueKeys,
    instance_id: String,
    max_workers: u32,
    jobs_per_worker: u32,
    started_at: DateTime<Utc>,
    ttl: Duration,
    /// This instance's current share, seeded to `max_workers` until the
    /// first distribution cycle settles it.
    workers_assigned: AtomicU32,
}

impl Coordinator {
    pub fn new(
        pool: Pool,
        keys: QueueKeys,
        instance_id: impl Into<String>,
        max_workers: u32,
        jobs_per_worker: u32,
        ttl: Duration,
    ) -> Self {
        Self {
            pool,
            keys,
            instance_id: instance_id.into(),
            max_workers,
            jobs_per_worker,
            started_at: Utc::now(),
            ttl,
            workers_assigned: AtomicU32::new(max_workers),
        }
    }

    fn record(&self) -> InstanceRecord {
        InstanceRecord {
            id: self.instance_id.clone(),
            max_workers: self.max_workers,
            jobs_per_worker: self.jobs_per_worker,
            started_at: self.started_at,
            last_heartbeat: Utc::now(),
            workers_assigned: self.workers_assigned.load(Ordering::SeqCst),
        }
    }

    /// Writes/refreshes this instance's record with a TTL of `self.ttl`.
    pub async fn heartbeat(&self) -> JobResult<()> {
        let mut conn = self.pool.get().await?;
        let record = self.record();
        let json = serde_json::to_string(&record)?;
        let key = self.keys.instance(&self.instance_id);

        let _: () = conn.set_ex(&key, &json, self.ttl.as_secs().max(1)).await?;
        let _: () = conn.sadd(self.keys.instances(), &self.instance_id).await?;
        Ok(())
    }

    /// Removes this instance's record and drops it from the registered set,
    /// for a clean shutdown rather than waiting out the TTL.
    pub async fn leave(&self) -> JobResult<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.del(self.keys.instance(&self.instance_id)).await?;
        let _: () = conn.srem(self.keys.instances(), &self.instance_id).await?;
        Ok(())
    }

    /// Reads all live instance records. Expired records fall out of the TTL
    /// store on their own; this just drops their id from the registered set
    /// when a lookup misses.
    pub async fn live_instances(&self) -> JobResult<Vec<InstanceRecord>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = conn.smembers(self.keys.instances()).await?;
        let mut live = Vec::with_capacity(ids.len());

        for id in ids {
            let key = self.keys.instance(&id);
            let raw: Option<String> = conn.get(&key).await?;
            match raw {
                Some(json) => {
                    if let Ok(record) = serde_json::from_str::<InstanceRecord>(&json) {
                        live.push(record);
                    }
                }
                None => {
                    let _: () = conn.srem(self.keys.instances(), &id).await?;
                }
            }
        }
        Ok(live)
    }

    /// Computes each instance's fair worker allocation from the fleet's
    /// current live records. The cluster target is derived internally
    /// rather than taken as a parameter: `totalWorkers = min(Σ
    /// workersAssigned, Σ maxWorkers)`, so the fleet never grows past its
    /// own declared capacity and otherwise perpetuates the last settled
    /// split.
    ///
    /// Two-pass algorithm: a proportional pass assigns
    /// `floor(total * max_workers / sum(max_workers))` to each instance
    /// (capped at its own `max_workers`), then a remainder pass hands out
    /// whatever is left one at a time, to the instances with the most
    /// *relative* headroom (`assigned / max_workers` ascending) first, so no
    /// single instance is favored twice.
    pub fn distribute(instances: &[InstanceRecord]) -> HashMap<String, u32> {
        if instances.is_empty() {
            return HashMap::new();
        }

        let capacity_sum: u64 = instances.iter().map(|i| i.max_workers as u64).sum();
        let mut assigned: HashMap<String, u32> = HashMap::with_capacity(instances.len());

        if capacity_sum == 0 {
            for instance in instances {
                assigned.insert(instance.id.clone(), 0);
            }
            return assigned;
        }

        let currently_assigned: u64 = instances.iter().map(|i| i.workers_assigned as u64).sum();
        let total_workers = currently_assigned.min(capacity_sum) as u32;

        let mut running_total = 0u32;
        for instance in instances {
            let share = ((total_workers as u64 * instance.max_workers as u64) / capacity_sum) as u32;
            let share = share.min(instance.max_workers);
            assigned.insert(instance.id.clone(), share);
            running_total += share;
        }

        let mut remainder = total_workers.saturating_sub(running_total);
        while remainder > 0 {
            let candidate = instances
                .iter()
                .filter(|i| assigned[&i.id] < i.max_workers)
                .min_by(|a, b| {
                    let ratio = |i: &InstanceRecord| assigned[&i.id] as f64 / i.max_workers as f64;
                    ratio(a).partial_cmp(&ratio(b)).unwrap()
                });

            match candidate {
                Some(instance) => {
                    *assigned.get_mut(&instance.id).unwrap() += 1;
                    remainder -= 1;
                }
                None => break,
            }
        }

        assigned
    }

    /// One full coordination cycle: reads the fleet's live records,
    /// computes the fair split, stores this instance's new share, and
    /// writes it back into the record (spec step 4).
    pub async fn redistribute(&self) -> JobResult<u32> {
        let live = self.live_instances().await?;
        let assigned = Self::distribute(&live);
        let mine = assigned.get(&self.instance_id).copied().unwrap_or(0);
        self.workers_assigned.store(mine, Ordering::SeqCst);
        self.heartbeat().await?;
        Ok(mine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, max_workers: u32, workers_assigned: u32) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            max_workers,
            jobs_per_worker: 5,
            started_at: Utc::now(),
            last_heartbeat: Utc::now(),
            workers_assigned,
        }
    }

    #[test]
    fn even_split_across_equal_capacity_instances() {
        let instances = vec![instance("a", 4, 4), instance("b", 4, 4)];
        let assigned = Coordinator::distribute(&instances);
        assert_eq!(assigned["a"], 4);
        assert_eq!(assigned["b"], 4);
    }

    #[test]
    fn proportional_split_weighted_by_capacity() {
        let instances = vec![instance("a", 1, 1), instance("b", 3, 3)];
        let assigned = Coordinator::distribute(&instances);
        assert_eq!(assigned["a"], 1);
        assert_eq!(assigned["b"], 3);
    }

    #[test]
    fn remainder_never_exceeds_an_instances_own_capacity() {
        let instances = vec![instance("a", 2, 2), instance("b", 2, 1)];
        let assigned = Coordinator::distribute(&instances);
        assert!(assigned["a"] <= 2);
        assert!(assigned["b"] <= 2);
        assert_eq!(assigned["a"] + assigned["b"], 3);
    }

    #[test]
    fn target_is_capped_at_total_fleet_capacity() {
        let instances = vec![instance("a", 1, 5), instance("b", 1, 5)];
        let assigned = Coordinator::distribute(&instances);
        // Σ workersAssigned (10) exceeds Σ maxWorkers (2); capped at capacity.
        assert_eq!(assigned["a"] + assigned["b"], 2);
    }

    #[test]
    fn target_never_exceeds_the_previously_assigned_sum() {
        let instances = vec![instance("a", 10, 1), instance("b", 10, 1)];
        let assigned = Coordinator::distribute(&instances);
        // Σ workersAssigned (2) is the binding constraint, not Σ maxWorkers (20).
        assert_eq!(assigned["a"] + assigned["b"], 2);
    }

    #[test]
    fn no_instances_yields_empty_assignment() {
        assert!(Coordinator::distribute(&[]).is_empty());
    }
}
