//! The `JobQueue` trait: the operations named in §4.4/§4.6, independent of
//! the Redis-backed implementation in [`crate::redis::queue`].

use crate::error::JobResult;
use crate::job::{JobId, JobInfo, JobOptions, JobStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Snapshot of how many jobs sit in each state for one queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: u64,
    pub dependency_wait: u64,
    pub dead_letter: u64,
}

/// A page selector for `getJobs`.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}

/// Result of a bulk operation: which ids succeeded and which were not
/// found.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkResult {
    pub succeeded: Vec<String>,
    pub missing: Vec<String>,
}

/// Queue operations a caller submits work through and queries state
/// through. Implemented by [`crate::redis::queue::RedisJobQueue`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submits `data` onto `queue`, subject to rate limiting, dependency
    /// gating, delay, and priority placement (§4.4). Returns the assigned id.
    async fn add(&self, queue: &str, data: &str, opts: JobOptions) -> JobResult<JobId>;

    async fn get_job(&self, queue: &str, job_id: &str) -> JobResult<Option<JobInfo>>;

    async fn get_jobs(&self, queue: &str, status: Option<JobStatus>, page: Page) -> JobResult<Vec<JobInfo>>;

    async fn get_job_counts(&self, queue: &str) -> JobResult<JobCounts>;

    /// Prevents new jobs in `waiting` from being dispatched; jobs already
    /// active continue to completion.
    async fn pause(&self, queue: &str) -> JobResult<()>;

    async fn resume(&self, queue: &str) -> JobResult<()>;

    async fn is_paused(&self, queue: &str) -> JobResult<bool>;

    /// Removes a job outright, regardless of its current state.
    async fn remove_job(&self, queue: &str, job_id: &str) -> JobResult<bool>;

    /// Drops every job and clears every list/set/hash for `queue`.
    async fn empty(&self, queue: &str) -> JobResult<u64>;

    async fn bulk_remove(&self, queue: &str, job_ids: &[String]) -> JobResult<BulkResult>;

    /// Moves each named job out of `waiting`/`delayed` and into the
    /// individually-paused list; ids not currently in the queue are reported
    /// missing rather than erroring the whole batch.
    async fn bulk_pause(&self, queue: &str, job_ids: &[String]) -> JobResult<BulkResult>;

    /// Moves each named job back out of the individually-paused list into
    /// `waiting`.
    async fn bulk_resume(&self, queue: &str, job_ids: &[String]) -> JobResult<BulkResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_to_first_fifty() {
        let page = Page::default();
        assert_eq!(page.offset, 0);
        assert_eq!(page.limit, 50);
    }
}
