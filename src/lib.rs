//! queueforge — a Redis-backed distributed job queue.
//!
//! - Typed job records with `serde` payloads
//! - Configurable worker pools with dynamic concurrency and per-job locking
//! - Retry policies with fixed or exponential backoff, dead letter routing
//! - Explicit priority lists, delayed jobs, job dependencies
//! - Cron-based recurring jobs with leader-elected singleton dispatch
//! - Horizontal-scaling coordination across instances sharing one prefix
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          queueforge                                 │
//! ├────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  Producer                                                           │
//! │     │  RedisJobQueue::add()                                         │
//! │     ▼                                                               │
//! │  ┌────────────────────────────────────────────────────────────┐    │
//! │  │                     Redis key space                         │    │
//! │  │  ┌──────────┐  ┌────────┐  ┌─────────┐  ┌────────────────┐ │    │
//! │  │  │ priority │  │ waiting│  │ delayed │  │ dependency-wait │ │    │
//! │  │  │  lists   │─▶│  list  │◀─│  zset   │  │      set        │ │    │
//! │  │  └──────────┘  └───┬────┘  └─────────┘  └────────────────┘ │    │
//! │  └──────────────────────┼──────────────────────────────────────┘   │
//! │                         ▼                                          │
//! │  ┌────────────────────────────────────────────────────────────┐    │
//! │  │                       WorkerPool                             │    │
//! │  │   dequeue → lock (§) → handler → complete/fail → release     │    │
//! │  └──────────────┬──────────────────────────────┬────────────────┘   │
//! │                 ▼                              ▼                   │
//! │           completed / failed              dead letter queue        │
//! │                                                                     │
//! │  Scheduler (cron) ──leader-elected──▶ RedisJobQueue::add()          │
//! │  Coordinator ── heartbeats instance records, distributes workers    │
//! │  EventBus ── in-process pub/sub of lifecycle events                 │
//! │  metrics ── optional Prometheus sink                                │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use queueforge::{JobOptions, JobRecord, JobQueue};
//! use std::sync::Arc;
//!
//! # async fn run(queue: Arc<queueforge::RedisJobQueue>) -> queueforge::JobResult<()> {
//! let id = queue
//!     .add("emails", r#"{"to":"user@example.com"}"#, JobOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod cron;
pub mod dlq;
pub mod error;
pub mod events;
pub mod id;
pub mod job;
pub mod keys;
pub mod leader;
pub mod lock;
pub mod metrics;
pub mod observable;
pub mod priority;
pub mod queue;
pub mod rate_limit;
pub mod redis;
pub mod retry;
pub mod scheduler;
pub mod stalled;
pub mod worker;

pub use cleanup::{Cleaner, CleanupPolicy};
pub use config::JobsConfig;
pub use coordinator::{Coordinator, InstanceRecord};
pub use dlq::{DeadLetterQueue, DeadLetterRecord, RepublishOptions};
pub use error::{JobError, JobResult};
pub use events::{Event, EventBus};
pub use job::{
    JobId, JobInfo, JobOptions, JobOptionsBuilder, JobRecord, JobStatus, RepeatOptions,
};
pub use keys::QueueKeys;
pub use leader::{LeaderElection, LeaderState};
pub use lock::{DistributedLock, LockGuard, LockOptions};
pub use metrics::{register_metrics, JobMetrics, RedisMetrics, SchedulerMetrics, WorkerMetrics};
pub use queue::{BulkResult, JobCounts, JobQueue, Page};
pub use rate_limit::{RateLimiter, RateLimiterOptions, RateLimitResult};
pub use redis::{create_pool, RedisJobQueue};
pub use retry::{BackoffPolicy, RetryPolicy, RetryStrategy};
pub use scheduler::{cron_expressions, ScheduledJob, ScheduledJobInfo, Scheduler, SchedulerStats};
pub use stalled::StalledChecker;
pub use worker::{JobHandler, WorkerPool, WorkerPoolConfig};

/// Re-export of the traits and types most call sites need.
pub mod prelude {
    pub use crate::error::{JobError, JobResult};
    pub use crate::job::{JobId, JobOptions, JobRecord, JobStatus};
    pub use crate::queue::JobQueue;
    pub use crate::redis::RedisJobQueue;
    pub use crate::worker::WorkerPool;
}
