//! Prometheus metrics via the `metrics` facade crate.
//!
//! These are an additional, optional sink for embedders running Prometheus;
//! the crate's own rolling counters (§4.15) do not depend on this module.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job queue system.
pub mod names {
    pub const JOBS_ENQUEUED_TOTAL: &str = "queueforge_jobs_enqueued_total";
    pub const JOBS_DEQUEUED_TOTAL: &str = "queueforge_jobs_dequeued_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "queueforge_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "queueforge_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "queueforge_jobs_retried_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "queueforge_jobs_dead_lettered_total";
    pub const JOBS_TIMED_OUT_TOTAL: &str = "queueforge_jobs_timed_out_total";

    pub const JOBS_WAITING: &str = "queueforge_jobs_waiting";
    pub const JOBS_ACTIVE: &str = "queueforge_jobs_active";
    pub const JOBS_DELAYED: &str = "queueforge_jobs_delayed";
    pub const JOBS_DEAD_LETTER: &str = "queueforge_jobs_dead_letter";

    pub const JOB_DURATION_SECONDS: &str = "queueforge_job_duration_seconds";
    pub const JOB_WAIT_TIME_SECONDS: &str = "queueforge_job_wait_time_seconds";

    pub const WORKERS_ACTIVE: &str = "queueforge_workers_active";
    pub const WORKERS_CONCURRENCY: &str = "queueforge_workers_concurrency";

    pub const SCHEDULER_IS_LEADER: &str = "queueforge_scheduler_is_leader";
    pub const SCHEDULER_JOBS_TRIGGERED: &str = "queueforge_scheduler_jobs_triggered_total";

    pub const REDIS_POOL_SIZE: &str = "queueforge_redis_pool_size";
    pub const REDIS_POOL_AVAILABLE: &str = "queueforge_redis_pool_available";
    pub const REDIS_OPERATION_DURATION: &str = "queueforge_redis_operation_duration_seconds";
}

/// Registers descriptions for every metric this crate emits.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_DEQUEUED_TOTAL,
        "Total number of jobs dequeued for processing"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of jobs that failed");
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of job retries");
    describe_counter!(
        names::JOBS_DEAD_LETTERED_TOTAL,
        "Total number of jobs sent to the dead letter queue"
    );
    describe_counter!(names::JOBS_TIMED_OUT_TOTAL, "Total number of jobs that timed out");

    describe_gauge!(names::JOBS_WAITING, "Current number of waiting jobs");
    describe_gauge!(names::JOBS_ACTIVE, "Current number of active (running) jobs");
    describe_gauge!(names::JOBS_DELAYED, "Current number of delayed jobs");
    describe_gauge!(names::JOBS_DEAD_LETTER, "Current size of the dead letter queue");

    describe_histogram!(names::JOB_DURATION_SECONDS, "Job execution duration in seconds");
    describe_histogram!(
        names::JOB_WAIT_TIME_SECONDS,
        "Time a job spent waiting before it was picked up, in seconds"
    );

    describe_gauge!(names::WORKERS_ACTIVE, "Number of workers currently holding a job");
    describe_gauge!(names::WORKERS_CONCURRENCY, "Worker pool target concurrency");

    describe_gauge!(
        names::SCHEDULER_IS_LEADER,
        "Whether this instance is the scheduler leader (1) or not (0)"
    );
    describe_counter!(
        names::SCHEDULER_JOBS_TRIGGERED,
        "Total number of scheduled jobs triggered"
    );

    describe_gauge!(names::REDIS_POOL_SIZE, "Redis connection pool size");
    describe_gauge!(names::REDIS_POOL_AVAILABLE, "Available connections in the Redis pool");
    describe_histogram!(
        names::REDIS_OPERATION_DURATION,
        "Redis operation duration in seconds"
    );
}

/// Job lifecycle metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    pub fn job_enqueued(queue: &str) {
        counter!(names::JOBS_ENQUEUED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_dequeued(queue: &str) {
        counter!(names::JOBS_DEQUEUED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_completed(queue: &str, duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL, "queue" => queue.to_string()).increment(1);
        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_failed(queue: &str, duration: Duration) {
        counter!(names::JOBS_FAILED_TOTAL, "queue" => queue.to_string()).increment(1);
        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_retried(queue: &str, attempt: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "queue" => queue.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    pub fn job_dead_lettered(queue: &str) {
        counter!(names::JOBS_DEAD_LETTERED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_timed_out(queue: &str) {
        counter!(names::JOBS_TIMED_OUT_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_wait_time(queue: &str, wait_time: Duration) {
        histogram!(names::JOB_WAIT_TIME_SECONDS, "queue" => queue.to_string())
            .record(wait_time.as_secs_f64());
    }

    /// Updates the per-queue state gauges from a freshly-fetched
    /// [`crate::queue::JobCounts`] snapshot.
    pub fn update_queue_sizes(queue: &str, waiting: u64, active: u64, delayed: u64, dlq: u64) {
        gauge!(names::JOBS_WAITING, "queue" => queue.to_string()).set(waiting as f64);
        gauge!(names::JOBS_ACTIVE, "queue" => queue.to_string()).set(active as f64);
        gauge!(names::JOBS_DELAYED, "queue" => queue.to_string()).set(delayed as f64);
        gauge!(names::JOBS_DEAD_LETTER, "queue" => queue.to_string()).set(dlq as f64);
    }
}

/// Worker pool metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    pub fn update_workers(pool_id: &str, active: u64, concurrency: usize) {
        gauge!(names::WORKERS_ACTIVE, "pool_id" => pool_id.to_string()).set(active as f64);
        gauge!(names::WORKERS_CONCURRENCY, "pool_id" => pool_id.to_string())
            .set(concurrency as f64);
    }
}

/// Scheduler metrics recorder.
#[derive(Clone)]
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    pub fn update_leader_status(scheduler_id: &str, is_leader: bool) {
        gauge!(names::SCHEDULER_IS_LEADER, "scheduler_id" => scheduler_id.to_string())
            .set(if is_leader { 1.0 } else { 0.0 });
    }

    pub fn job_triggered(scheduler_id: &str, job_name: &str) {
        counter!(
            names::SCHEDULER_JOBS_TRIGGERED,
            "scheduler_id" => scheduler_id.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }
}

/// Redis pool/operation metrics recorder.
#[derive(Clone)]
pub struct RedisMetrics;

impl RedisMetrics {
    pub fn update_pool_status(pool_size: usize, available: usize) {
        gauge!(names::REDIS_POOL_SIZE).set(pool_size as f64);
        gauge!(names::REDIS_POOL_AVAILABLE).set(available as f64);
    }

    pub fn operation_duration(operation: &str, duration: Duration) {
        histogram!(names::REDIS_OPERATION_DURATION, "operation" => operation.to_string())
            .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_metrics_does_not_panic() {
        register_metrics();
    }

    #[test]
    fn job_metrics_do_not_panic_without_a_recorder_installed() {
        JobMetrics::job_enqueued("default");
        JobMetrics::job_dequeued("default");
        JobMetrics::job_completed("default", Duration::from_secs(1));
        JobMetrics::job_failed("default", Duration::from_secs(5));
        JobMetrics::update_queue_sizes("default", 3, 1, 0, 0);
    }
}
