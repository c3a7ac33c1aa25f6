//! Per-key async locks
//!
//! Serialises work on one tenant id without blocking other ids. An entry
//! lives in the map only while some task holds or waits for it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

#[derive(Debug, Clone, Default)]
pub(crate) struct KeyedLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: &str) -> KeyedGuard {
        let lock = self.locks.lock().entry(key.to_string()).or_default().clone();
        let mut guard = KeyedGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            lock: lock.clone(),
            held: None,
        };
        guard.held = Some(lock.lock_owned().await);
        guard
    }

    /// Keys currently held or waited on.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Releases the key on drop and forgets it once nobody else wants it.
#[derive(Debug)]
pub(crate) struct KeyedGuard {
    key: String,
    locks: Arc<Mutex<LockMap>>,
    lock: Arc<tokio::sync::Mutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.held.take();

        // The map and this guard are the only owners left: no waiters.
        let mut locks = self.locks.lock();
        if Arc::strong_count(&self.lock) == 2
            && locks
                .get(&self.key)
                .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock))
        {
            locks.remove(&self.key);
        }
    }
}
