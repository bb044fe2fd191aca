//! Distributed lock: SET-NX + token + auto-extend, with a `with_lock`
//! wrapper guaranteeing release on every exit path.

use crate::error::{JobError, JobResult};
use crate::id::new_lock_token;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Compare-and-delete: only releases the lock if the caller's token still
/// matches the stored value. This is the only permitted release primitive —
/// it is what makes release safe against expiry-then-reacquire races.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("del", KEYS[1])
else
  return 0
end
"#;

/// Refreshes TTL only if still owned by this token.
const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("pexpire", KEYS[1], ARGV[2])
else
  return 0
end
"#;

#[derive(Debug, Clone)]
pub struct LockOptions {
    pub duration: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub auto_extend: bool,
    pub extend_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        let duration = Duration::from_secs(30);
        Self {
            duration,
            retries: 3,
            retry_delay: Duration::from_millis(200),
            auto_extend: true,
            // Default is two-thirds of the lock duration.
            extend_interval: duration.mul_f64(2.0 / 3.0),
        }
    }
}

/// A held lock. Dropping this without calling [`LockGuard::release`] stops
/// the auto-extend task but does not release the key early — release is
/// explicit so callers can guarantee ordering relative to other work.
pub struct LockGuard {
    resource: String,
    token: String,
    pool: Pool,
    stop_extend: Option<oneshot::Sender<()>>,
}

impl LockGuard {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Deletes the lock key iff it is still owned by this guard's token.
    pub async fn release(mut self) -> JobResult<bool> {
        if let Some(stop) = self.stop_extend.take() {
            let _ = stop.send(());
        }
        let mut conn = self.pool.get().await?;
        let released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.resource)
            .arg(&self.token)
            .invoke_async(&mut *conn)
            .await?;
        Ok(released == 1)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_extend.take() {
            let _ = stop.send(());
        }
    }
}

/// Distributed lock over a Redis-backed keyspace.
#[derive(Clone)]
pub struct DistributedLock {
    pool: Pool,
    prefix: String,
}

impl DistributedLock {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, resource: &str) -> String {
        format!("{}:lock:{}", self.prefix, resource)
    }

    /// Attempts to acquire `resource`, retrying up to `opts.retries` times.
    /// Returns `None` if all attempts fail — callers decide whether to
    /// retry, queue-with-delay, or surface the failure.
    pub async fn acquire(
        &self,
        resource: &str,
        opts: LockOptions,
    ) -> JobResult<Option<LockGuard>> {
        let key = self.key(resource);
        let token = new_lock_token();

        for attempt in 0..=opts.retries {
            let mut conn = self.pool.get().await?;
            let acquired: bool = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(opts.duration.as_millis() as u64)
                .query_async::<Option<String>>(&mut *conn)
                .await?
                .is_some();

            if acquired {
                debug!(resource, %token, "lock acquired");
                let stop_extend = if opts.auto_extend {
                    Some(self.spawn_auto_extend(
                        key.clone(),
                        token.clone(),
                        opts.duration,
                        opts.extend_interval,
                    ))
                } else {
                    None
                };

                return Ok(Some(LockGuard {
                    resource: key,
                    token,
                    pool: self.pool.clone(),
                    stop_extend,
                }));
            }

            if attempt < opts.retries {
                tokio::time::sleep(opts.retry_delay).await;
            }
        }

        Ok(None)
    }

    /// Refreshes TTL iff `token` still owns `resource`.
    pub async fn extend(&self, resource: &str, token: &str, duration: Duration) -> JobResult<bool> {
        let mut conn = self.pool.get().await?;
        let extended: i64 = redis::Script::new(EXTEND_SCRIPT)
            .key(self.key(resource))
            .arg(token)
            .arg(duration.as_millis() as u64)
            .invoke_async(&mut *conn)
            .await?;
        Ok(extended == 1)
    }

    pub async fn is_locked(&self, resource: &str) -> JobResult<bool> {
        let mut conn = self.pool.get().await?;
        Ok(conn.exists(self.key(resource)).await?)
    }

    /// Acquires `resource`, runs `f`, and releases on every exit path
    /// (success, failure, or panic-unwind through `?`).
    pub async fn with_lock<F, Fut, T>(
        &self,
        resource: &str,
        opts: LockOptions,
        f: F,
    ) -> JobResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = JobResult<T>>,
    {
        let guard = self
            .acquire(resource, opts)
            .await?
            .ok_or_else(|| JobError::Lock {
                resource: resource.to_string(),
                reason: "could not acquire lock".to_string(),
            })?;

        let result = f().await;
        let _ = guard.release().await;
        result
    }

    fn spawn_auto_extend(
        &self,
        key: String,
        token: String,
        duration: Duration,
        interval: Duration,
    ) -> oneshot::Sender<()> {
        let pool = self.pool.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => return,
                    _ = tokio::time::sleep(interval) => {}
                }

                let Ok(mut conn) = pool.get().await else { return };
                let extended: JobResult<i64> = redis::Script::new(EXTEND_SCRIPT)
                    .key(&key)
                    .arg(&token)
                    .arg(duration.as_millis() as u64)
                    .invoke_async(&mut *conn)
                    .await
                    .map_err(JobError::from);

                match extended {
                    Ok(1) => {}
                    _ => {
                        warn!(resource = %key, "lock lost, stopping auto-extend");
                        return;
                    }
                }
            }
        });

        stop_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_extend_interval_is_two_thirds_of_duration() {
        let opts = LockOptions::default();
        assert_eq!(opts.extend_interval, Duration::from_secs(20));
    }
}
