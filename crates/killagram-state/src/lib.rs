pub mod accounts;
pub mod conversations;
pub mod folders;
pub mod idempotency;
pub mod locks;
pub mod market;
pub mod outbox;
pub mod rate_limit;
pub mod scheduled;
pub mod search;
pub mod summary;
pub mod tokens;
pub mod views;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use killagram_provider::CredentialStore;
use killagram_types::CoreResult;
use killagram_types::models::{MessageView, ProviderMessage, Transaction};

use accounts::Accounts;
use conversations::ConversationStateStore;
use folders::FolderStore;
use idempotency::IdempotencyCache;
use market::Market;
use outbox::EventOutbox;
use rate_limit::SlidingWindowLimiter;
use scheduled::ScheduledDeliveryQueue;
use summary::SummaryCache;
use tokens::TokenAuthority;

/// Store maps stay usable after a panicking holder; every critical section
/// leaves them consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct StateConfig {
    pub session_secret: Vec<u8>,
    pub rate_limit_per_minute: usize,
}

/// Outcome of a purchase. `replayed` is set when the idempotency key
/// matched an earlier purchase and nothing was charged.
#[derive(Debug, Clone)]
pub struct Purchase {
    pub transaction: Transaction,
    pub replayed: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub idempotency_purged: usize,
    pub limiter_buckets_swept: usize,
}

/// All in-memory session state of the process. Built once at startup and
/// shared by `Arc`; nothing here survives a restart.
pub struct State {
    pub accounts: Arc<Accounts>,
    pub tokens: TokenAuthority,
    pub idempotency: IdempotencyCache,
    pub conversations: ConversationStateStore,
    pub scheduled: ScheduledDeliveryQueue,
    pub outbox: EventOutbox,
    /// Per client address.
    pub api_limiter: SlidingWindowLimiter,
    /// Per conversation, limit depends on premium.
    pub ai_limiter: SlidingWindowLimiter,
    pub folders: FolderStore,
    pub market: Market,
    pub summaries: SummaryCache,
}

impl State {
    /// Ephemeral state: account versions start over on every restart.
    pub fn new(config: StateConfig) -> Self {
        Self::build(config, Arc::new(Accounts::new()))
    }

    /// State whose account versions are read from and written to `store`,
    /// so tokens revoked before a restart stay revoked.
    pub fn with_store(config: StateConfig, store: Arc<dyn CredentialStore>) -> CoreResult<Self> {
        Ok(Self::build(config, Arc::new(Accounts::with_store(store)?)))
    }

    fn build(config: StateConfig, accounts: Arc<Accounts>) -> Self {
        Self {
            tokens: TokenAuthority::new(&config.session_secret, accounts.clone()),
            accounts,
            idempotency: IdempotencyCache::new(),
            conversations: ConversationStateStore::new(),
            scheduled: ScheduledDeliveryQueue::new(),
            outbox: EventOutbox::new(),
            api_limiter: SlidingWindowLimiter::per_minute(config.rate_limit_per_minute),
            ai_limiter: SlidingWindowLimiter::per_minute(killagram_types::models::AI_SUMMARY_LIMIT),
            folders: FolderStore::new(),
            market: Market::new(),
            summaries: SummaryCache::new(),
        }
    }

    /// `message` as seen by `user`.
    pub fn message_view(&self, user: &str, message: &ProviderMessage) -> MessageView {
        views::message_view(&self.conversations, user, message, Utc::now())
    }

    /// Buy `quantity` of a catalog item.
    ///
    /// Runs under the user's purchase lock. With an idempotency key, a repeat
    /// returns the original transaction and charges nothing.
    pub async fn purchase(
        &self,
        user: &str,
        item_id: &str,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> CoreResult<Purchase> {
        let _guard = self.market.lock_user(user).await;

        if let Some(key) = idempotency_key {
            if let Some(transaction) = self.idempotency.purchase(user, key) {
                debug!("Replaying purchase {} for {}", transaction.id, user);
                return Ok(Purchase {
                    transaction,
                    replayed: true,
                });
            }
        }

        let account = self.accounts.get(user);
        let item = self.market.item_for(item_id, account.premium)?;
        let amount = item.price_stars * i64::from(quantity);
        let balance = self.accounts.debit(user, amount)?;

        let transaction = Transaction {
            id: Uuid::new_v4(),
            phone: user.to_string(),
            item_id: item.id.clone(),
            quantity,
            amount_stars: amount,
            created_at: Utc::now(),
        };
        self.market.record_transaction(transaction.clone());
        if let Some(key) = idempotency_key {
            self.idempotency.record_purchase(user, key, transaction.clone());
        }

        info!(
            "{} bought {}x {} for {} stars, balance {}",
            user, quantity, item_id, amount, balance
        );
        Ok(Purchase {
            transaction,
            replayed: false,
        })
    }

    /// Periodic cleanup of expired idempotency entries and idle limiter buckets.
    pub fn maintain(&self, now: DateTime<Utc>, instant: Instant) -> MaintenanceReport {
        MaintenanceReport {
            idempotency_purged: self.idempotency.purge_expired(now),
            limiter_buckets_swept: self.api_limiter.sweep(instant) + self.ai_limiter.sweep(instant),
        }
    }

    /// State is ephemeral, so there is nothing to flush.
    pub fn teardown(&self) {
        info!("Session state dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use killagram_crypto::token::TokenKind;
    use killagram_provider::MemoryCredentialStore;
    use killagram_types::CoreError;
    use killagram_types::error::PolicyViolation;
    use killagram_types::models::{MarketItem, MarketItemType};

    fn config() -> StateConfig {
        StateConfig {
            session_secret: b"test-secret".to_vec(),
            rate_limit_per_minute: 60,
        }
    }

    fn state() -> State {
        State::new(config())
    }

    fn state_with_price(price_stars: i64) -> State {
        let mut state = state();
        state.market = Market::with_catalog(
            Vec::new(),
            vec![MarketItem {
                id: "thing".into(),
                title: "Thing".into(),
                item_type: MarketItemType::Gift,
                price_stars,
            }],
        );
        state
    }

    #[tokio::test]
    async fn same_key_purchase_charges_once() {
        let state = state_with_price(50);
        let first = state.purchase("+1", "thing", 1, Some("k")).await.unwrap();
        let second = state.purchase("+1", "thing", 1, Some("k")).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.transaction, second.transaction);
        assert_eq!(state.accounts.get("+1").stars_balance, 50);
        assert_eq!(state.market.transactions("+1").len(), 1);
    }

    #[tokio::test]
    async fn different_keys_charge_twice() {
        let state = state_with_price(50);
        state.purchase("+1", "thing", 1, Some("a")).await.unwrap();
        state.purchase("+1", "thing", 1, Some("b")).await.unwrap();
        assert_eq!(state.accounts.get("+1").stars_balance, 0);
    }

    #[tokio::test]
    async fn second_purchase_can_run_out_of_stars() {
        let state = state_with_price(60);
        state.purchase("+1", "thing", 1, Some("a")).await.unwrap();
        let err = state.purchase("+1", "thing", 1, Some("b")).await.unwrap_err();
        assert_eq!(err, CoreError::Policy(PolicyViolation::InsufficientStars));
        assert_eq!(state.accounts.get("+1").stars_balance, 40);
    }

    #[tokio::test]
    async fn concurrent_same_key_purchases_charge_once() {
        let state = Arc::new(state_with_price(50));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { state.purchase("+1", "thing", 1, Some("k")).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().transaction.id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(state.accounts.get("+1").stars_balance, 50);
    }

    #[tokio::test]
    async fn revoked_token_stays_revoked_after_restart() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());

        let before = State::with_store(config(), store.clone()).unwrap();
        let token = before.tokens.issue("+1").unwrap();
        before.tokens.bump_version("+1").await.unwrap();
        before.teardown();

        let after = State::with_store(config(), store).unwrap();
        assert!(!after.tokens.verify(&token, "+1", TokenKind::Api));

        let fresh = after.tokens.issue("+1").unwrap();
        assert!(after.tokens.verify(&fresh, "+1", TokenKind::Api));
    }

    #[test]
    fn maintenance_purges() {
        let state = state();
        let now = Utc::now();
        state.idempotency.put_at(
            "k:s",
            idempotency::CachedResponse {
                status: 200,
                body: Vec::new(),
            },
            now - chrono::Duration::seconds(400),
        );
        let report = state.maintain(now, Instant::now());
        assert_eq!(report.idempotency_purged, 1);
    }
}
