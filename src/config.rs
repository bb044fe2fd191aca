//! Typed, `serde`-deserializable configuration. The crate never reads the
//! environment or a config file itself — construction from env/files is the
//! embedding application's job — but every struct derives `Deserialize` so
//! an application can load it with whatever mechanism it likes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the job queue system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            worker: WorkerConfig::default(),
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            lock: LockConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Key prefix for all job-related keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "queue".to_string()
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_stalled_interval")]
    pub stalled_check_interval_secs: u64,
    #[serde(default = "default_stalled_threshold")]
    pub stalled_threshold_ms: u64,
    #[serde(default = "default_max_stalled_retries")]
    pub max_stalled_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            tick_interval_ms: default_tick_interval_ms(),
            job_timeout_secs: default_job_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            stalled_check_interval_secs: default_stalled_interval(),
            stalled_threshold_ms: default_stalled_threshold(),
            max_stalled_retries: default_max_stalled_retries(),
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

/// Worker loop ticks at a fixed short interval (§4.7: ~50ms).
fn default_tick_interval_ms() -> u64 {
    50
}

fn default_job_timeout() -> u64 {
    300
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Stalled checker runs periodically (§4.8: ~30s).
fn default_stalled_interval() -> u64 {
    30
}

/// A job is stalled once its lease has been unattended this long (§4.8:
/// ~10s).
fn default_stalled_threshold() -> u64 {
    10_000
}

fn default_max_stalled_retries() -> u32 {
    1
}

impl WorkerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn stalled_check_interval(&self) -> Duration {
        Duration::from_secs(self.stalled_check_interval_secs)
    }

    pub fn stalled_threshold(&self) -> Duration {
        Duration::from_millis(self.stalled_threshold_ms)
    }
}

/// Queue-level configuration: cleanup policy and priority levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub priority_levels: u8,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub dlq: DlqConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            priority_levels: 0,
            cleanup: CleanupConfig::default(),
            dlq: DlqConfig::default(),
        }
    }
}

/// Cleanup sweep configuration (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_completed_lifetime")]
    pub completed_lifetime_secs: u64,
    #[serde(default = "default_failed_lifetime")]
    pub failed_lifetime_secs: u64,
    #[serde(default = "default_cap")]
    pub completed_cap: usize,
    #[serde(default = "default_cap")]
    pub failed_cap: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            completed_lifetime_secs: default_completed_lifetime(),
            failed_lifetime_secs: default_failed_lifetime(),
            completed_cap: default_cap(),
            failed_cap: default_cap(),
        }
    }
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_completed_lifetime() -> u64 {
    86_400
}

fn default_failed_lifetime() -> u64 {
    86_400 * 7
}

fn default_cap() -> usize {
    1000
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Dead letter queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    #[serde(default = "default_dlq_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            enabled: default_dlq_enabled(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_dlq_enabled() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

/// Distributed lock defaults (overridable per-call via `LockOptions`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Acquire a per-job lock before dispatching. Disabling this skips
    /// locking entirely, e.g. for single-instance deployments that don't
    /// need it.
    #[serde(default = "default_lock_enabled")]
    pub enabled: bool,
    #[serde(default = "default_lock_duration_ms")]
    pub duration_ms: u64,
    #[serde(default = "default_lock_retries")]
    pub retries: u32,
    #[serde(default = "default_lock_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: default_lock_enabled(),
            duration_ms: default_lock_duration_ms(),
            retries: default_lock_retries(),
            retry_delay_ms: default_lock_retry_delay_ms(),
        }
    }
}

fn default_lock_enabled() -> bool {
    true
}

impl LockConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_lock_duration_ms() -> u64 {
    30_000
}

fn default_lock_retries() -> u32 {
    3
}

fn default_lock_retry_delay_ms() -> u64 {
    200
}

/// Scheduler configuration (cron + leader election).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_leader_timeout")]
    pub leader_timeout_secs: u64,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            leader_timeout_secs: default_leader_timeout(),
            check_interval_secs: default_check_interval(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_leader_timeout() -> u64 {
    30
}

fn default_check_interval() -> u64 {
    30
}

impl SchedulerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn leader_timeout(&self) -> Duration {
        Duration::from_secs(self.leader_timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Horizontal-scaling / work-coordination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_workers")]
    pub max_workers_per_instance: u32,
    #[serde(default = "default_jobs_per_worker")]
    pub jobs_per_worker: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_workers_per_instance: default_max_workers(),
            jobs_per_worker: default_jobs_per_worker(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_max_workers() -> u32 {
    4
}

fn default_jobs_per_worker() -> u32 {
    1
}

fn default_poll_interval() -> u64 {
    5
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Instance records expire after 3x the poll interval (§4.14).
    pub fn instance_ttl(&self) -> Duration {
        self.poll_interval() * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = JobsConfig::default();
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.redis.key_prefix, "queue");
    }

    #[test]
    fn instance_ttl_is_three_times_poll_interval() {
        let coordinator = CoordinatorConfig::default();
        assert_eq!(
            coordinator.instance_ttl(),
            coordinator.poll_interval() * 3
        );
    }
}
