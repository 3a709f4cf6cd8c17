use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use killagram_types::models::{ConversationId, OutgoingMessage, ScheduledSend};

use crate::lock;

/// Deferred sends per user, kept sorted by due time.
#[derive(Default)]
pub struct ScheduledDeliveryQueue {
    inner: Mutex<HashMap<String, Vec<ScheduledSend>>>,
}

impl ScheduledDeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries with equal due times keep their enqueue order.
    pub fn enqueue(
        &self,
        user: &str,
        conversation: ConversationId,
        payload: OutgoingMessage,
        due_at: DateTime<Utc>,
    ) -> ScheduledSend {
        let entry = ScheduledSend {
            id: Uuid::new_v4(),
            conversation,
            payload,
            due_at,
        };

        let mut inner = lock(&self.inner);
        let queue = inner.entry(user.to_string()).or_default();
        let at = queue.partition_point(|e| e.due_at <= due_at);
        queue.insert(at, entry.clone());
        entry
    }

    /// Remove and return every entry due at `now`, earliest first.
    pub fn pop_due(&self, user: &str, now: DateTime<Utc>) -> Vec<ScheduledSend> {
        let mut inner = lock(&self.inner);
        let Some(queue) = inner.get_mut(user) else {
            return Vec::new();
        };

        let split = queue.partition_point(|e| e.due_at <= now);
        let due: Vec<ScheduledSend> = queue.drain(..split).collect();
        if queue.is_empty() {
            inner.remove(user);
        }
        due
    }

    /// Put entries back after a failed delivery attempt. They go ahead of
    /// anything queued later with the same due time.
    pub fn requeue(&self, user: &str, entries: Vec<ScheduledSend>) {
        if entries.is_empty() {
            return;
        }
        let mut inner = lock(&self.inner);
        let queue = inner.entry(user.to_string()).or_default();
        for entry in entries.into_iter().rev() {
            let at = queue.partition_point(|e| e.due_at < entry.due_at);
            queue.insert(at, entry);
        }
    }

    pub fn pending(&self, user: &str) -> Vec<ScheduledSend> {
        lock(&self.inner).get(user).cloned().unwrap_or_default()
    }
}
