use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::sync_loop::CloseReason;

/// Lets another task end a realtime connection and say why.
#[derive(Clone, Default)]
pub struct CloseHandle {
    token: CancellationToken,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

impl CloseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first reason given wins.
    pub fn close(&self, reason: CloseReason) {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(reason);
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) -> CloseReason {
        self.token.cancelled().await;
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(CloseReason::Revoked)
    }
}

/// Live realtime connections, at most one per user.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<String, (Uuid, CloseHandle)>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user`. An older connection of the same
    /// user is told to close as superseded.
    pub async fn register(&self, user: &str) -> (Uuid, CloseHandle) {
        let conn_id = Uuid::new_v4();
        let handle = CloseHandle::new();
        let previous = self
            .inner
            .write()
            .await
            .insert(user.to_string(), (conn_id, handle.clone()));

        if let Some((_, old)) = previous {
            old.close(CloseReason::Superseded);
        }
        (conn_id, handle)
    }

    /// Remove the entry, but only if `conn_id` still owns it.
    pub async fn unregister(&self, user: &str, conn_id: Uuid) {
        let mut connections = self.inner.write().await;
        if let Some((stored, _)) = connections.get(user) {
            if *stored == conn_id {
                connections.remove(user);
            }
        }
    }

    /// Close `user`'s live connection, if any. Returns whether one existed.
    pub async fn close_user(&self, user: &str, reason: CloseReason) -> bool {
        match self.inner.write().await.remove(user) {
            Some((_, handle)) => {
                handle.close(reason);
                true
            }
            None => false,
        }
    }

    pub async fn is_connected(&self, user: &str) -> bool {
        self.inner.read().await.contains_key(user)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newer_connection_supersedes_older() {
        let registry = Registry::new();
        let (first_id, first) = registry.register("+1").await;
        let (second_id, second) = registry.register("+1").await;

        assert!(first.is_closed());
        assert_eq!(first.closed().await, CloseReason::Superseded);
        assert!(!second.is_closed());

        // The superseded connection's cleanup leaves the new entry alone
        registry.unregister("+1", first_id).await;
        assert!(registry.is_connected("+1").await);
        registry.unregister("+1", second_id).await;
        assert!(!registry.is_connected("+1").await);
    }

    #[tokio::test]
    async fn close_user_reports_reason() {
        let registry = Registry::new();
        assert!(!registry.close_user("+1", CloseReason::Revoked).await);

        let (_, handle) = registry.register("+1").await;
        assert!(registry.close_user("+1", CloseReason::Revoked).await);
        assert_eq!(handle.closed().await, CloseReason::Revoked);
        assert_eq!(registry.len().await, 0);
    }

    #[test]
    fn first_reason_wins() {
        let handle = CloseHandle::new();
        handle.close(CloseReason::Revoked);
        handle.close(CloseReason::Superseded);
        let reason = handle.reason.lock().unwrap().clone();
        assert_eq!(reason, Some(CloseReason::Revoked));
    }
}
