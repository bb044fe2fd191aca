//! Leader election (§4.13): one instance across a fleet holds the
//! `leader:current` lock and alone runs singleton tasks (cron dispatch,
//! stalled-job sweep, cleanup). Built directly on [`crate::lock`]'s
//! CAS-guarded primitives rather than a bespoke election protocol.

use crate::error::JobResult;
use crate::keys::QueueKeys;
use crate::lock::{DistributedLock, LockGuard, LockOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Follower,
    Candidate,
    Leader,
}

/// Runs the follower -> candidate -> leader -> follower state machine for
/// one instance.
///
/// The watchdog polls at `heartbeat_interval / 3` (floor 1s), attempting to
/// acquire the lock whenever not already held; holding the lock is itself
/// the heartbeat, since [`crate::lock::LockGuard`]'s auto-extend keeps
/// renewing it for as long as this instance stays alive.
pub struct LeaderElection {
    lock: DistributedLock,
    resource: String,
    heartbeat_interval: Duration,
    lock_duration: Duration,
    state_tx: watch::Sender<LeaderState>,
    state_rx: watch::Receiver<LeaderState>,
    guard: Mutex<Option<LockGuard>>,
}

impl LeaderElection {
    pub fn new(
        lock: DistributedLock,
        keys: &QueueKeys,
        heartbeat_interval: Duration,
        lock_duration: Duration,
    ) -> Arc<Self> {
        let _ = keys;
        let (state_tx, state_rx) = watch::channel(LeaderState::Follower);
        Arc::new(Self {
            lock,
            resource: "leader".to_string(),
            heartbeat_interval,
            lock_duration,
            state_tx,
            state_rx,
            guard: Mutex::new(None),
        })
    }

    pub fn watch_interval(&self) -> Duration {
        (self.heartbeat_interval / 3).max(Duration::from_secs(1))
    }

    pub fn state(&self) -> LeaderState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LeaderState> {
        self.state_rx.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.state() == LeaderState::Leader
    }

    /// One watchdog tick: attempt to (re)acquire leadership if not already
    /// held. Call this on a loop at [`Self::watch_interval`].
    pub async fn tick(&self) -> JobResult<()> {
        let mut guard = self.guard.lock().await;
        if guard.is_some() {
            // Auto-extend inside the held LockGuard keeps the TTL alive;
            // nothing to do until it is dropped or lost.
            return Ok(());
        }

        self.state_tx.send_replace(LeaderState::Candidate);
        let opts = LockOptions {
            duration: self.lock_duration,
            retries: 0,
            retry_delay: Duration::from_millis(0),
            auto_extend: true,
            extend_interval: self.lock_duration.mul_f64(2.0 / 3.0),
        };

        match self.lock.acquire(&self.resource, opts).await? {
            Some(new_guard) => {
                info!("became leader");
                *guard = Some(new_guard);
                self.state_tx.send_replace(LeaderState::Leader);
            }
            None => {
                debug!("leadership not acquired, remaining follower");
                self.state_tx.send_replace(LeaderState::Follower);
            }
        }
        Ok(())
    }

    /// Voluntarily releases leadership, if held.
    pub async fn step_down(&self) -> JobResult<()> {
        let mut guard = self.guard.lock().await;
        if let Some(g) = guard.take() {
            let _ = g.release().await?;
            info!("stepped down as leader");
        }
        self.state_tx.send_replace(LeaderState::Follower);
        Ok(())
    }

    /// Checks whether this instance still actually holds the lock, demoting
    /// itself if the key has disappeared out from under it (e.g. evicted,
    /// or the auto-extend task lost a race). Call this alongside `tick`.
    pub async fn reconcile(&self) -> JobResult<()> {
        let mut guard = self.guard.lock().await;
        if let Some(g) = guard.as_ref() {
            let extended = self.lock.extend(&self.resource, g.token(), self.lock_duration).await?;
            if !extended {
                *guard = None;
                self.state_tx.send_replace(LeaderState::Follower);
                info!("lost leadership");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_interval_is_a_third_of_heartbeat_with_one_second_floor() {
        let heartbeat = Duration::from_secs(10);
        let interval = (heartbeat / 3).max(Duration::from_secs(1));
        assert_eq!(interval, Duration::from_secs(3));

        let fast_heartbeat = Duration::from_millis(300);
        let interval = (fast_heartbeat / 3).max(Duration::from_secs(1));
        assert_eq!(interval, Duration::from_secs(1));
    }
}
