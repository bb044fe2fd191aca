//! Namespaced Redis key scheme: `"{prefix}:{queue}:..."`.

/// Builds every Redis key this crate touches, all under one queue namespace.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    prefix: String,
    queue: String,
}

impl QueueKeys {
    pub fn new(prefix: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            queue: queue.into(),
        }
    }

    fn base(&self) -> String {
        format!("{}:{}", self.prefix, self.queue)
    }

    /// List of waiting job ids (FIFO head = next to dispatch).
    pub fn waiting(&self) -> String {
        format!("{}:waiting", self.base())
    }

    /// List of ids currently leased to a worker.
    pub fn active(&self) -> String {
        format!("{}:active", self.base())
    }

    /// List of ids that finished successfully.
    pub fn completed(&self) -> String {
        format!("{}:completed", self.base())
    }

    /// List of ids that finished with a retryable-exhausted or terminal failure.
    pub fn failed(&self) -> String {
        format!("{}:failed", self.base())
    }

    /// Sorted set of delayed ids, scored by fire-time in epoch ms.
    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.base())
    }

    /// Pause flag for the queue as a whole.
    pub fn paused(&self) -> String {
        format!("{}:paused", self.base())
    }

    /// Set of ids waiting on unfinished dependencies.
    pub fn dependency_wait(&self) -> String {
        format!("{}:dependency-wait", self.base())
    }

    /// List of ids individually paused via `bulkPause`, as distinct from the
    /// queue-wide [`Self::paused`] flag.
    pub fn paused_jobs(&self) -> String {
        format!("{}:paused-jobs", self.base())
    }

    /// Hash holding one job record.
    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.base(), id)
    }

    /// Set of ids that depend on `id` finishing.
    pub fn dependents(&self, id: &str) -> String {
        format!("{}:job:{}:dependents", self.base(), id)
    }

    /// List for priority level `n` (higher `n` = higher priority).
    pub fn priority(&self, n: u8) -> String {
        format!("{}:priority:{}", self.base(), n)
    }

    /// Sorted set of the sliding-window entries for rate-limit identifier.
    pub fn limit(&self, identifier: &str) -> String {
        format!("{}:limit:{}", self.base(), identifier)
    }

    /// String key for the distributed lock on `resource`.
    pub fn lock(&self, resource: &str) -> String {
        format!("{}:lock:{}", self.prefix, resource)
    }

    /// List of entries moved to the dead letter queue.
    pub fn dead_letter(&self) -> String {
        format!("{}-dead-letter", self.base())
    }

    /// Hash for one dead-letter entry.
    pub fn dead_letter_job(&self, id: &str) -> String {
        format!("{}-dead-letter:job:{}", self.base(), id)
    }

    /// Global leader-election key (not per-queue).
    pub fn leader(&self) -> String {
        format!("{}:leader:current", self.prefix)
    }

    /// Instance record key for horizontal-scaling coordination.
    pub fn instance(&self, instance_id: &str) -> String {
        format!("{}:instance:{}", self.prefix, instance_id)
    }

    /// Key holding the set of registered instance ids.
    pub fn instances(&self) -> String {
        format!("{}:instances", self.prefix)
    }

    /// Last-fired timestamp (RFC 3339) for a named recurring job.
    pub fn scheduled_last_run(&self, name: &str) -> String {
        format!("{}:scheduled:last-run:{}", self.prefix, name)
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let keys = QueueKeys::new("queue", "default");
        assert_eq!(keys.waiting(), "queue:default:waiting");
        assert_eq!(keys.job("1"), "queue:default:job:1");
        assert_eq!(keys.priority(3), "queue:default:priority:3");
        assert_eq!(keys.dead_letter(), "queue:default-dead-letter");
        assert_eq!(keys.lock("resource"), "queue:lock:resource");
        assert_eq!(keys.leader(), "queue:leader:current");
    }
}
