use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// One reader-writer lock per aggregate name, created on first use.
///
/// Locks are process-local. Writers in other processes are only kept out by the
/// server's optimistic concurrency on `resourceVersion`.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        if let Some(lock) = self.locks.get(name) {
            return Arc::clone(lock.value());
        }
        Arc::clone(self.locks.entry(name.to_string()).or_default().value())
    }

    pub async fn read(&self, name: &str) -> OwnedRwLockReadGuard<()> {
        self.lock_for(name).read_owned().await
    }

    pub async fn write(&self, name: &str) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(name).write_owned().await
    }
}
