//! Explicit priority lists (§4.12): one Redis list per priority level,
//! drained highest-to-lowest into `waiting` by a periodic pump rather than
//! folded into the waiting list's ordering itself.

use crate::error::JobResult;
use crate::keys::QueueKeys;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::trace;

/// How often the pump drains priority lists into `waiting`, about every
/// 25ms (§4.12).
pub const PUMP_INTERVAL: Duration = Duration::from_millis(25);

/// Places `job_id` onto its priority list (or straight into `waiting` if
/// `priority` is `None` or the queue has no priority levels configured).
pub async fn enqueue(
    pool: &Pool,
    keys: &QueueKeys,
    job_id: &str,
    priority: Option<u8>,
    levels: u8,
    lifo: bool,
) -> JobResult<()> {
    let mut conn = pool.get().await?;
    let level = priority.filter(|&p| p < levels);
    let list = match level {
        Some(p) => keys.priority(p),
        None => keys.waiting(),
    };

    if lifo {
        let _: () = conn.lpush(&list, job_id).await?;
    } else {
        let _: () = conn.rpush(&list, job_id).await?;
    }
    Ok(())
}

/// Drains every priority list, highest level first, into `waiting`,
/// preserving each list's own internal order. Returns the number of ids
/// moved.
///
/// Priority level `N-1` is drained first (highest), `0` last, so a
/// continuous stream of high-priority submissions can starve level 0: a
/// deliberate choice, not round-robin fairness across levels.
pub async fn pump(pool: &Pool, keys: &QueueKeys, levels: u8) -> JobResult<u64> {
    if levels == 0 {
        return Ok(0);
    }

    let mut conn = pool.get().await?;
    let mut moved = 0u64;

    for level in (0..levels).rev() {
        let list = keys.priority(level);
        loop {
            let job_id: Option<String> = conn.lpop(&list, None).await?;
            match job_id {
                Some(id) => {
                    let _: () = conn.rpush(keys.waiting(), &id).await?;
                    moved += 1;
                }
                None => break,
            }
        }
    }

    if moved > 0 {
        trace!(moved, "priority pump drained jobs into waiting");
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_interval_matches_documented_cadence() {
        assert_eq!(PUMP_INTERVAL, Duration::from_millis(25));
    }
}
