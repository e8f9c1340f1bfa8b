use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::locks::UserLocks;
use crate::registry::{SandboxRegistry, unix_now};

/// Background sweep deleting sandboxes past their retention window.
///
/// Sweeps run strictly one after another on a single task, so a sweep
/// can never overlap itself, and they never block request handling.
pub struct ExpiryReaper {
    registry: Arc<SandboxRegistry>,
    locks: Arc<UserLocks>,
    retention: Duration,
    interval: Duration,
}

impl ExpiryReaper {
    pub fn new(
        registry: Arc<SandboxRegistry>,
        locks: Arc<UserLocks>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            locks,
            retention,
            interval,
        }
    }

    /// One pass: delete every expired sandbox whose exclusivity lock
    /// can be taken. Failures and busy sandboxes are left for the next
    /// sweep, never propagated. Returns how many were deleted.
    pub async fn sweep(&self) -> usize {
        let expired = match self
            .registry
            .list_expired(unix_now(), self.retention.as_secs())
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "expiry scan failed");
                return 0;
            }
        };

        let mut reaped = 0;
        for user_id in expired {
            let guard = match self.locks.exclusive(user_id) {
                Ok(g) => g,
                Err(_) => {
                    debug!(user = user_id, "expired sandbox busy, skipping");
                    continue;
                }
            };
            match self.registry.delete(user_id).await {
                Ok(()) => {
                    drop(guard);
                    self.locks.remove(user_id);
                    info!(user = user_id, "reaped expired sandbox");
                    reaped += 1;
                }
                Err(e) => {
                    warn!(user = user_id, error = %e, "reap failed, retrying next sweep");
                }
            }
        }
        reaped
    }

    /// Run sweeps forever at the configured interval. The first sweep
    /// happens immediately so leftovers from a previous process are
    /// cleaned at startup.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Arc<SandboxRegistry>, Arc<UserLocks>) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SandboxRegistry::new(dir.path().to_path_buf()));
        (dir, registry, Arc::new(UserLocks::new()))
    }

    fn backdate(base: &std::path::Path, user: u64, last_used: u64) {
        let meta = serde_json::json!({ "created_at": last_used, "last_used": last_used });
        std::fs::write(
            base.join(format!("{user}.meta.json")),
            serde_json::to_vec(&meta).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired() {
        let (dir, registry, locks) = setup();
        registry.create(1).await.unwrap();
        registry.create(2).await.unwrap();
        backdate(dir.path(), 2, 1000);

        let reaper = ExpiryReaper::new(
            Arc::clone(&registry),
            locks,
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        assert_eq!(reaper.sweep().await, 1);

        registry.get(1).await.unwrap();
        assert!(registry.get(2).await.is_err());
    }

    #[tokio::test]
    async fn sweep_skips_busy_sandboxes() {
        let (dir, registry, locks) = setup();
        registry.create(1).await.unwrap();
        backdate(dir.path(), 1, 1000);

        let held = locks.exclusive(1).unwrap();
        let reaper = ExpiryReaper::new(
            Arc::clone(&registry),
            Arc::clone(&locks),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        assert_eq!(reaper.sweep().await, 0);
        registry.get(1).await.unwrap();

        // Released: the next sweep takes it.
        drop(held);
        assert_eq!(reaper.sweep().await, 1);
        assert!(registry.get(1).await.is_err());
    }

    #[tokio::test]
    async fn spawn_sweeps_on_its_own_task() {
        let (dir, registry, locks) = setup();
        registry.create(1).await.unwrap();
        backdate(dir.path(), 1, 1000);

        let reaper = ExpiryReaper::new(
            Arc::clone(&registry),
            locks,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        let handle = reaper.spawn();

        // The first sweep fires immediately; poll for its effect.
        let mut reaped = false;
        for _ in 0..100 {
            if registry.get(1).await.is_err() {
                reaped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert!(reaped);
    }

    #[tokio::test]
    async fn sweep_with_empty_base_is_a_noop() {
        let (_dir, registry, locks) = setup();
        let reaper = ExpiryReaper::new(
            registry,
            locks,
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        assert_eq!(reaper.sweep().await, 0);
    }
}
