//! Keyed async locks that keep commit and publish order together.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;

/// One async mutex per key, created on demand and pruned once unused.
pub(crate) struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Entry>>,
}

struct Entry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// Holders plus waiters
    users: usize,
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let mutex = {
            let mut locks = self.table();
            let entry = locks.entry(key).or_insert_with(|| Entry {
                mutex: Arc::default(),
                users: 0,
            });
            entry.users += 1;
            entry.mutex.clone()
        };
        // Registered above; dropping the guard, even mid-wait, deregisters.
        let mut guard = KeyGuard {
            owner: self,
            key,
            guard: None,
        };
        guard.guard = Some(mutex.lock_owned().await);
        guard
    }

    fn release(&self, key: K) {
        let mut locks = self.table();
        if let Some(entry) = locks.get_mut(&key) {
            entry.users -= 1;
            if entry.users == 0 {
                locks.remove(&key);
            }
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<K, Entry>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table().len()
    }
}

/// Held while a key is locked.
pub(crate) struct KeyGuard<'a, K: Eq + Hash + Copy> {
    owner: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Copy> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        self.owner.release(self.key);
    }
}
