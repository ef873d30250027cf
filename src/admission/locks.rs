use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key, created on first use and dropped again once
/// nobody holds or waits for it.
pub(crate) struct LockTable<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

/// Held lock on one key. Releasing it evicts the key's mutex when idle.
pub(crate) struct KeyGuard<'a, K: Eq + Hash> {
    table: &'a LockTable<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> LockTable<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        // Clone the Arc out so no DashMap shard lock is held across the await.
        let mutex = self.locks.entry(key.clone()).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            table: self,
            key,
            guard: Some(guard),
        }
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        // The guard owns a clone of the Arc; release it before counting.
        drop(self.guard.take());
        // Count 1 means only the table holds it: no holder, no waiter. The
        // shard lock taken by remove_if excludes a concurrent `lock` clone.
        self.table
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
