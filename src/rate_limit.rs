//! Sliding-window rate limiter, one token set per identifier.

use crate::error::JobResult;
use deadpool_redis::Pool;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Trims the window to `[now-duration, now]`, admits iff the remaining
/// count is below `max`, and records the admission — all as one script so
/// two concurrent checks cannot both slip past `max`.
const CHECK_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local duration = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
local member = ARGV[4]

redis.call("zremrangebyscore", key, "-inf", now - duration)

local count = redis.call("zcard", key)
local limited = 0
if count >= max then
  limited = 1
else
  redis.call("zadd", key, now, member)
  count = count + 1
end

redis.call("pexpire", key, duration)

local oldest = redis.call("zrange", key, 0, 0, "withscores")
local reset_in = 0
if count > 0 and #oldest > 0 then
  local oldest_score = tonumber(oldest[2])
  reset_in = (oldest_score + duration) - now
  if reset_in < 0 then reset_in = 0 end
end

return {limited, count, reset_in}
"#;

#[derive(Debug, Clone)]
pub struct RateLimiterOptions {
    pub max: u64,
    pub duration_ms: u64,
    /// Extra namespacing appended to the queue name to compute the
    /// identifier, e.g. a tenant id extracted from the job payload.
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub limited: bool,
    pub remaining: u64,
    pub reset_in_ms: u64,
}

/// Sliding-window limiter backed by one Redis sorted set per identifier.
pub struct RateLimiter {
    pool: Pool,
    prefix: String,
    opts: RateLimiterOptions,
}

impl RateLimiter {
    pub fn new(pool: Pool, prefix: impl Into<String>, opts: RateLimiterOptions) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            opts,
        }
    }

    fn identifier(&self, queue: &str, key: Option<&str>) -> String {
        match key.or(self.opts.key_prefix.as_deref()) {
            Some(k) => format!("{}:{}", queue, k),
            None => queue.to_string(),
        }
    }

    fn limit_key(&self, identifier: &str) -> String {
        format!("{}:limit:{}", self.prefix, identifier)
    }

    /// Checks and, if admitted, records one unit of usage for `queue`
    /// (optionally scoped further by `key`, derived from the submitted
    /// data by the caller).
    pub async fn check(&self, queue: &str, key: Option<&str>) -> JobResult<RateLimitResult> {
        let identifier = self.identifier(queue, key);
        let key = self.limit_key(&identifier);

        let now = chrono::Utc::now().timestamp_millis();
        // Distinguishes concurrent admissions landing in the same millisecond.
        let member = format!("{now}:{}", rand::thread_rng().gen::<u32>());

        let mut conn = self.pool.get().await?;
        let (limited, count, reset_in): (i64, i64, i64) = redis::Script::new(CHECK_SCRIPT)
            .key(&key)
            .arg(now)
            .arg(self.opts.duration_ms)
            .arg(self.opts.max)
            .arg(member)
            .invoke_async(&mut *conn)
            .await?;

        Ok(RateLimitResult {
            limited: limited == 1,
            remaining: (self.opts.max as i64 - count).max(0) as u64,
            reset_in_ms: reset_in.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_uses_key_prefix_when_no_explicit_key() {
        let opts = RateLimiterOptions {
            max: 1,
            duration_ms: 1000,
            key_prefix: Some("tenant-a".into()),
        };
        // Constructing a RateLimiter requires a pool; exercise the pure
        // identifier logic directly instead.
        struct Fake;
        impl Fake {
            fn identifier(opts: &RateLimiterOptions, queue: &str, key: Option<&str>) -> String {
                match key.or(opts.key_prefix.as_deref()) {
                    Some(k) => format!("{}:{}", queue, k),
                    None => queue.to_string(),
                }
            }
        }
        assert_eq!(Fake::identifier(&opts, "emails", None), "emails:tenant-a");
        assert_eq!(Fake::identifier(&opts, "emails", Some("x")), "emails:x");
    }
}
