use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use killagram_types::models::{ConversationId, MessageView, Transaction};

use crate::lock;
use crate::locks::{KeyedGuard, KeyedLocks};

pub const REQUEST_TTL_SECS: i64 = 300;

/// Response replayed for a retried request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

struct RequestEntry {
    response: CachedResponse,
    expires_at: DateTime<Utc>,
}

type SentKey = (String, ConversationId, String);

/// Three caches that make retries safe:
///
/// - request level: full responses by composite key, expiring after the TTL
/// - purchase level: transactions by (user, client key), kept for the process lifetime
/// - sent messages: the first send for (user, conversation, client message id)
pub struct IdempotencyCache {
    requests: Mutex<HashMap<String, RequestEntry>>,
    purchases: Mutex<HashMap<(String, String), Transaction>>,
    sent: Mutex<HashMap<SentKey, MessageView>>,
    locks: KeyedLocks,
    ttl: Duration,
}

/// `<client key>:<signature>`
pub fn composite_key(client_key: &str, signature: &str) -> String {
    format!("{client_key}:{signature}")
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::with_ttl(Duration::seconds(REQUEST_TTL_SECS))
    }
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            purchases: Mutex::new(HashMap::new()),
            sent: Mutex::new(HashMap::new()),
            locks: KeyedLocks::new(),
            ttl,
        }
    }

    /// Exclusive hold on `key` for the whole check, execute, store span.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        self.locks.lock(key).await
    }

    // -- Request level --

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        self.get_at(key, Utc::now())
    }

    /// Expired entries are removed on read and reported as absent.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<CachedResponse> {
        let mut requests = lock(&self.requests);
        match requests.get(key) {
            Some(entry) if entry.expires_at < now => {
                requests.remove(key);
                None
            }
            Some(entry) => Some(entry.response.clone()),
            None => None,
        }
    }

    pub fn put(&self, key: &str, response: CachedResponse) {
        self.put_at(key, response, Utc::now());
    }

    pub fn put_at(&self, key: &str, response: CachedResponse, now: DateTime<Utc>) {
        lock(&self.requests).insert(
            key.to_string(),
            RequestEntry {
                response,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop every expired request entry. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut requests = lock(&self.requests);
        let before = requests.len();
        requests.retain(|_, entry| entry.expires_at >= now);
        before - requests.len()
    }

    // -- Purchases --

    pub fn purchase(&self, user: &str, key: &str) -> Option<Transaction> {
        lock(&self.purchases)
            .get(&(user.to_string(), key.to_string()))
            .cloned()
    }

    pub fn record_purchase(&self, user: &str, key: &str, transaction: Transaction) {
        lock(&self.purchases).insert((user.to_string(), key.to_string()), transaction);
    }

    // -- Sent messages --

    pub fn sent_message(
        &self,
        user: &str,
        conversation: ConversationId,
        client_message_id: &str,
    ) -> Option<MessageView> {
        lock(&self.sent)
            .get(&(user.to_string(), conversation, client_message_id.to_string()))
            .cloned()
    }

    pub fn record_sent_message(
        &self,
        user: &str,
        conversation: ConversationId,
        client_message_id: &str,
        message: MessageView,
    ) {
        lock(&self.sent).insert(
            (user.to_string(), conversation, client_message_id.to_string()),
            message,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(body: &str) -> CachedResponse {
        CachedResponse {
            status: 200,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn entries_expire_lazily() {
        let cache = IdempotencyCache::new();
        let t0 = Utc::now();
        cache.put_at("k:sig", response("{}"), t0);

        assert_eq!(cache.get_at("k:sig", t0 + Duration::seconds(299)), Some(response("{}")));
        assert_eq!(cache.get_at("k:sig", t0 + Duration::seconds(301)), None);
        // removed, not just hidden
        assert_eq!(cache.get_at("k:sig", t0), None);
    }

    #[test]
    fn purge_drops_only_expired() {
        let cache = IdempotencyCache::new();
        let t0 = Utc::now();
        cache.put_at("old", response("1"), t0 - Duration::seconds(600));
        cache.put_at("new", response("2"), t0);

        assert_eq!(cache.purge_expired(t0), 1);
        assert!(cache.get_at("new", t0).is_some());
    }

    #[test]
    fn composite_keys_differ_by_signature() {
        assert_ne!(composite_key("k", "aa"), composite_key("k", "bb"));
        assert_eq!(composite_key("k", "aa"), "k:aa");
    }

    #[tokio::test]
    async fn concurrent_duplicates_execute_once() {
        let cache = Arc::new(IdempotencyCache::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let executions = executions.clone();
            handles.push(tokio::spawn(async move {
                let _guard = cache.lock("k:sig").await;
                if let Some(hit) = cache.get("k:sig") {
                    return hit;
                }
                executions.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                let fresh = response("{\"ok\":true}");
                cache.put("k:sig", fresh.clone());
                fresh
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), response("{\"ok\":true}"));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }
}
