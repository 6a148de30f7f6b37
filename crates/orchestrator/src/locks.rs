use std::sync::Arc;

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, OwnedMutexGuard},
};

/// One async mutex per project id. Create, recreate and update hold it so two
/// containers never race for the same name.
#[derive(Default)]
pub struct ProjectLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the project's lock. The guard is owned so it can move into
    /// a background task.
    pub async fn acquire(&self, project_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(project_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Take the lock only if it is free. Control actions use this so a
    /// request never waits behind a background provisioning run.
    pub fn try_acquire(&self, project_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .entry(project_id.to_string())
            .or_default()
            .clone();
        lock.try_lock_owned().ok()
    }

    /// Forget a deleted project's lock.
    pub fn remove(&self, project_id: &str) {
        self.locks.remove(project_id);
    }
}
