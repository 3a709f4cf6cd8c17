use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::lock;

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Async mutual exclusion per string key.
///
/// Holding a [`KeyedGuard`] across `.await` points is the point of this type:
/// it serializes check-then-act spans (idempotent requests, purchases,
/// client-message-id sends) that have to await in the middle. Entries are
/// removed once the last holder releases and nobody is waiting.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: LockMap,
}

pub struct KeyedGuard {
    key: String,
    entry: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let entry = {
            let mut map = lock(&self.inner);
            map.entry(key.to_string()).or_default().clone()
        };
        let guard = entry.clone().lock_owned().await;

        KeyedGuard {
            key: key.to_string(),
            entry,
            guard: Some(guard),
            locks: self.inner.clone(),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guard.take();

        // Clones are only taken under the map lock, so the count is stable here.
        // Two references left means the map's and ours: no waiter.
        let mut map = lock(&self.locks);
        if Arc::strong_count(&self.entry) == 2 {
            map.remove(&self.key);
        }
    }
}
