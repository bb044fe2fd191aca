//! Job record: the unit of work tracked by the queue, and its lifecycle.

use crate::retry::{BackoffPolicy, RetryPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stack traces are bounded to the 10 most recent entries; older ones are
/// dropped as new failures are appended.
pub const MAX_STACKTRACE_ENTRIES: usize = 10;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Submission-time options (§6 of the design).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Requested delay in milliseconds before the job becomes eligible.
    pub delay: u64,

    /// Maximum total handler invocations, including the first.
    pub attempts: u32,

    /// Retry backoff policy (fixed or exponential).
    pub backoff: Option<BackoffPolicy>,

    /// Priority level (0..N-1), only meaningful on a priority queue.
    pub priority: Option<u8>,

    /// Push to the tail instead of the head of the selected list.
    pub lifo: bool,

    /// Caller-supplied job id. Colliding with an existing id overwrites it
    /// silently.
    pub job_id: Option<String>,

    /// Ids that must finish before this job runs.
    pub depends_on: Vec<String>,

    /// Exempt this job from cleanup trimming.
    pub keep_jobs: bool,

    /// Remove automatically when this job reaches a terminal state.
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,

    /// Enable the dead letter queue for this job, optionally overriding the
    /// queue's configured max retries.
    pub dead_letter: Option<DeadLetterOverride>,

    /// Cron recurrence, if this submission originates from the scheduler.
    pub repeat: Option<RepeatOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterOverride {
    pub enabled: bool,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatOptions {
    pub cron: String,
    pub tz: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Fluent builder over [`JobOptions`], for call sites that would otherwise
/// hand-assemble the struct literal.
#[derive(Debug, Clone, Default)]
pub struct JobOptionsBuilder {
    opts: JobOptions,
}

impl JobOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, delay: std::time::Duration) -> Self {
        self.opts.delay = delay.as_millis() as u64;
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.opts.attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.opts.backoff = Some(backoff);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.opts.priority = Some(priority);
        self
    }

    pub fn lifo(mut self, lifo: bool) -> Self {
        self.opts.lifo = lifo;
        self
    }

    pub fn job_id(mut self, id: impl Into<String>) -> Self {
        self.opts.job_id = Some(id.into());
        self
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.opts.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn keep_jobs(mut self, keep: bool) -> Self {
        self.opts.keep_jobs = keep;
        self
    }

    pub fn remove_on_complete(mut self, remove: bool) -> Self {
        self.opts.remove_on_complete = remove;
        self
    }

    pub fn remove_on_fail(mut self, remove: bool) -> Self {
        self.opts.remove_on_fail = remove;
        self
    }

    pub fn dead_letter(mut self, enabled: bool, max_retries: Option<u32>) -> Self {
        self.opts.dead_letter = Some(DeadLetterOverride { enabled, max_retries });
        self
    }

    pub fn repeat(mut self, repeat: RepeatOptions) -> Self {
        self.opts.repeat = Some(repeat);
        self
    }

    pub fn build(self) -> JobOptions {
        self.opts
    }
}

/// The job record persisted in the queue's hash, one per submitted unit of
/// work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    /// Opaque payload, stored as a compact JSON string.
    pub data: String,
    pub opts: JobOptions,

    pub timestamp: DateTime<Utc>,
    pub delay: u64,
    pub attempts_made: u32,
    pub progress: u8,

    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub return_value: Option<String>,
    pub failed_reason: Option<String>,
    pub stacktrace: Vec<String>,

    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,

    /// Number of times the stalled-job checker has reclaimed this job from
    /// a dead worker's lease.
    #[serde(default)]
    pub stalled_count: u32,
}

impl JobRecord {
    pub fn new(queue: impl Into<String>, data: impl Into<String>, opts: JobOptions) -> Self {
        let id = opts
            .job_id
            .clone()
            .map(JobId::from_string)
            .unwrap_or_else(JobId::new);

        Self {
            id,
            queue: queue.into(),
            data: data.into(),
            delay: opts.delay,
            dependencies: opts.depends_on.clone(),
            opts,
            timestamp: Utc::now(),
            attempts_made: 0,
            progress: 0,
            processed_on: None,
            finished_on: None,
            return_value: None,
            failed_reason: None,
            stacktrace: Vec::new(),
            dependents: Vec::new(),
            stalled_count: 0,
        }
    }

    /// Maximum total attempts; defaults to 1 (no retry) when unset.
    pub fn max_attempts(&self) -> u32 {
        self.opts.attempts.max(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match &self.opts.backoff {
            Some(b) => RetryPolicy::from_backoff(b.clone(), self.max_attempts()),
            None => RetryPolicy::none(),
        }
    }

    /// Appends a failure to the stack trace, keeping only the most recent
    /// [`MAX_STACKTRACE_ENTRIES`].
    pub fn push_stacktrace(&mut self, frame: impl Into<String>) {
        self.stacktrace.push(frame.into());
        let overflow = self.stacktrace.len().saturating_sub(MAX_STACKTRACE_ENTRIES);
        if overflow > 0 {
            self.stacktrace.drain(0..overflow);
        }
    }

    pub fn mark_processing(&mut self) {
        self.processed_on = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, return_value: Option<String>) {
        self.finished_on = Some(Utc::now());
        self.return_value = return_value;
        self.progress = 100;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.attempts_made += 1;
        self.failed_reason = Some(reason.into());
        self.push_stacktrace(self.failed_reason.clone().unwrap_or_default());
    }

    pub fn mark_terminal_failure(&mut self) {
        self.finished_on = Some(Utc::now());
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts()
    }

    /// Records one stall recovery and returns the new total stall count.
    pub fn push_stall_marker(&mut self) -> u32 {
        self.stalled_count += 1;
        self.stalled_count
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Snapshot of a job's state for query responses; cheaper to construct than
/// a full [`JobRecord`] when only summary fields are needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub queue: String,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
}

impl From<&JobRecord> for JobInfo {
    fn from(r: &JobRecord) -> Self {
        Self {
            id: r.id.clone(),
            queue: r.queue.clone(),
            status: JobStatus::Waiting,
            attempts_made: r.attempts_made,
            max_attempts: r.max_attempts(),
            progress: r.progress,
            timestamp: r.timestamp,
            processed_on: r.processed_on,
            finished_on: r.finished_on,
            failed_reason: r.failed_reason.clone(),
        }
    }
}

/// The eight mutually-exclusive job states (§3: single-state invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Paused,
    DependencyWait,
    DeadLetter,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Delayed => "delayed",
            JobStatus::Paused => "paused",
            JobStatus::DependencyWait => "dependency-wait",
            JobStatus::DeadLetter => "dead-letter",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_generation_is_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn stacktrace_is_bounded() {
        let mut job = JobRecord::new("default", "{}", JobOptions::default());
        for i in 0..15 {
            job.push_stacktrace(format!("frame {i}"));
        }
        assert_eq!(job.stacktrace.len(), MAX_STACKTRACE_ENTRIES);
        assert_eq!(job.stacktrace.first().unwrap(), "frame 5");
        assert_eq!(job.stacktrace.last().unwrap(), "frame 14");
    }

    #[test]
    fn round_trips_through_json() {
        let job = JobRecord::new("default", "{\"v\":1}", JobOptions::default());
        let json = job.to_json().unwrap();
        let restored = JobRecord::from_json(&json).unwrap();
        assert_eq!(job.id, restored.id);
        assert_eq!(job.data, restored.data);
    }

    #[test]
    fn job_id_defaults_to_generated_when_unset() {
        let job = JobRecord::new("default", "{}", JobOptions::default());
        assert!(!job.id.as_str().is_empty());
    }

    #[test]
    fn caller_supplied_job_id_is_honored() {
        let opts = JobOptions {
            job_id: Some("my-id".into()),
            ..Default::default()
        };
        let job = JobRecord::new("default", "{}", opts);
        assert_eq!(job.id.as_str(), "my-id");
    }

    #[test]
    fn builder_assembles_options() {
        let opts = JobOptionsBuilder::new()
            .attempts(5)
            .priority(2)
            .lifo(true)
            .job_id("custom")
            .depends_on(["a", "b"])
            .build();
        assert_eq!(opts.attempts, 5);
        assert_eq!(opts.priority, Some(2));
        assert!(opts.lifo);
        assert_eq!(opts.job_id.as_deref(), Some("custom"));
        assert_eq!(opts.depends_on, vec!["a".to_string(), "b".to_string()]);
    }
}
