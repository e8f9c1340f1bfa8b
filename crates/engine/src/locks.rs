use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::{EngineError, Result};

/// Per-user exclusivity lock map.
///
/// Execution-class operations (`run`, `install`) and sandbox deletion
/// take the exclusive half and fail fast with `SandboxBusy` when it is
/// held. File and listing operations take the shared half, so they may
/// overlap each other but never an in-flight delete or execution.
/// Entries are created lazily and removed on sandbox deletion so the
/// map cannot grow without bound.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<u64, Arc<RwLock<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, user_id: u64) -> Arc<RwLock<()>> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(user_id).or_default())
    }

    /// Acquire the exclusivity lock, failing immediately if any
    /// execution-class operation (or delete) is in flight.
    pub fn exclusive(&self, user_id: u64) -> Result<OwnedRwLockWriteGuard<()>> {
        self.entry(user_id)
            .try_write_owned()
            .map_err(|_| EngineError::SandboxBusy)
    }

    /// Acquire the shared half, waiting out a concurrent delete.
    pub async fn shared(&self, user_id: u64) -> OwnedRwLockReadGuard<()> {
        self.entry(user_id).read_owned().await
    }

    /// Drop the lock entry after its sandbox is deleted.
    pub fn remove(&self, user_id: u64) {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        map.remove(&user_id);
    }
}
