use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use killagram_types::events::{EventEnvelope, RealtimeEvent};

use crate::lock;

/// Per-user FIFO of events waiting for the realtime channel.
///
/// Events pushed while no channel is connected stay here until the next
/// drain. There is a single consumer: concurrent drains split the events
/// between them.
#[derive(Default)]
pub struct EventOutbox {
    inner: Mutex<HashMap<String, VecDeque<EventEnvelope>>>,
}

impl EventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id given to the event.
    pub fn push(&self, user: &str, event: RealtimeEvent) -> String {
        let envelope = EventEnvelope::new(event);
        let event_id = envelope.event_id.clone();
        lock(&self.inner)
            .entry(user.to_string())
            .or_default()
            .push_back(envelope);
        event_id
    }

    /// Take everything queued for `user`, oldest first.
    pub fn drain(&self, user: &str) -> Vec<EventEnvelope> {
        lock(&self.inner)
            .remove(user)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn len(&self, user: &str) -> usize {
        lock(&self.inner).get(user).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use killagram_types::models::{ConversationId, TypingState};

    fn typing(on: bool) -> RealtimeEvent {
        RealtimeEvent::TypingUpdated(TypingState {
            chat_id: ConversationId(1),
            is_typing: on,
        })
    }

    #[test]
    fn drain_returns_pushed_events_once() {
        let outbox = EventOutbox::new();
        let first = outbox.push("u", typing(true));
        let second = outbox.push("u", typing(false));
        assert_ne!(first, second);

        let drained = outbox.drain("u");
        let ids: Vec<_> = drained.iter().map(|e| e.event_id.clone()).collect();
        assert_eq!(ids, [first, second]);
        assert!(outbox.drain("u").is_empty());
    }

    #[test]
    fn users_are_isolated() {
        let outbox = EventOutbox::new();
        outbox.push("a", typing(true));
        assert!(outbox.drain("b").is_empty());
        assert_eq!(outbox.len("a"), 1);
    }

    #[test]
    fn concurrent_pushes_are_never_lost_or_duplicated() {
        use std::sync::Arc;
        use std::thread;

        let outbox = Arc::new(EventOutbox::new());
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let outbox = outbox.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        outbox.push("u", typing(true));
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        while producers.iter().any(|p| !p.is_finished()) {
            seen.extend(outbox.drain("u"));
        }
        for producer in producers {
            producer.join().unwrap();
        }
        seen.extend(outbox.drain("u"));

        let mut ids: Vec<_> = seen.into_iter().map(|e| e.event_id).collect();
        assert_eq!(ids.len(), 1000);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
    }
}
