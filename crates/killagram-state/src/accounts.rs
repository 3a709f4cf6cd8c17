use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::error;
use uuid::Uuid;

use killagram_provider::CredentialStore;
use killagram_types::error::{CoreError, CoreResult, PolicyViolation};
use killagram_types::models::{Account, AccountStatus, Appeal};

use crate::lock;

const PREMIUM_DAYS: i64 = 30;

/// Account records, created lazily on first access.
///
/// With a store attached, account versions are seeded from it and every
/// bump is written back, so revocation outlives a restart.
#[derive(Default)]
pub struct Accounts {
    inner: Mutex<AccountsInner>,
    store: Option<Arc<dyn CredentialStore>>,
}

#[derive(Default)]
struct AccountsInner {
    accounts: HashMap<String, Account>,
    appeals: HashMap<String, Vec<Appeal>>,
}

impl AccountsInner {
    fn entry(&mut self, phone: &str, now: DateTime<Utc>) -> &mut Account {
        let account = self
            .accounts
            .entry(phone.to_string())
            .or_insert_with(|| Account::new(phone));

        // Lapsed premium reverts on the next access
        if account.premium && account.premium_until.is_some_and(|until| until <= now) {
            account.premium = false;
            account.premium_until = None;
        }
        account
    }
}

impl Accounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts backed by `store`, starting from the versions it holds.
    pub fn with_store(store: Arc<dyn CredentialStore>) -> CoreResult<Self> {
        let versions = store
            .account_versions()
            .map_err(|e| CoreError::Internal(format!("loading account versions: {e}")))?;

        let accounts = Self {
            inner: Mutex::new(AccountsInner::default()),
            store: Some(store),
        };
        {
            let mut inner = lock(&accounts.inner);
            let now = Utc::now();
            for (phone, version) in versions {
                inner.entry(&phone, now).account_version = version;
            }
        }
        Ok(accounts)
    }

    /// Snapshot of the account, creating it if needed.
    pub fn get(&self, phone: &str) -> Account {
        lock(&self.inner).entry(phone, Utc::now()).clone()
    }

    /// Current token epoch. Unknown accounts are at version 1 and are not
    /// created by this lookup.
    pub fn version(&self, phone: &str) -> u64 {
        lock(&self.inner)
            .accounts
            .get(phone)
            .map_or(1, |account| account.account_version)
    }

    /// Raise the version in memory, then persist it. The in-memory bump
    /// stands even when the write fails.
    pub async fn bump_version(&self, phone: &str) -> CoreResult<u64> {
        let version = {
            let mut inner = lock(&self.inner);
            let account = inner.entry(phone, Utc::now());
            account.account_version += 1;
            account.account_version
        };

        let Some(store) = self.store.clone() else {
            return Ok(version);
        };
        let owner = phone.to_string();
        tokio::task::spawn_blocking(move || store.save_account_version(&owner, version))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?
            .map_err(|e| {
                error!("Failed to persist account version {} for {}: {}", version, phone, e);
                CoreError::Internal("account version not persisted".into())
            })?;
        Ok(version)
    }

    /// Fails with `ACCOUNT_FROZEN` (carrying the reason) for frozen accounts.
    pub fn ensure_active(&self, phone: &str) -> CoreResult<Account> {
        let account = self.get(phone);
        if account.is_frozen() {
            return Err(PolicyViolation::AccountFrozen {
                reason: account.freeze_reason,
            }
            .into());
        }
        Ok(account)
    }

    pub fn freeze(&self, phone: &str, reason: &str) -> Account {
        let mut inner = lock(&self.inner);
        let account = inner.entry(phone, Utc::now());
        account.status = AccountStatus::Frozen;
        account.freeze_reason = Some(reason.to_string());
        account.clone()
    }

    pub fn unfreeze(&self, phone: &str) -> Account {
        let mut inner = lock(&self.inner);
        let account = inner.entry(phone, Utc::now());
        account.status = AccountStatus::Active;
        account.freeze_reason = None;
        account.clone()
    }

    pub fn set_premium(&self, phone: &str, active: bool) -> Account {
        self.set_premium_at(phone, active, Utc::now())
    }

    pub fn set_premium_at(&self, phone: &str, active: bool, now: DateTime<Utc>) -> Account {
        let mut inner = lock(&self.inner);
        let account = inner.entry(phone, now);
        account.premium = active;
        account.premium_until = active.then(|| now + Duration::days(PREMIUM_DAYS));
        account.clone()
    }

    /// Subtract `amount` stars if the balance covers it. Returns the new balance.
    pub fn debit(&self, phone: &str, amount: i64) -> CoreResult<i64> {
        let mut inner = lock(&self.inner);
        let account = inner.entry(phone, Utc::now());
        if account.stars_balance < amount {
            return Err(PolicyViolation::InsufficientStars.into());
        }
        account.stars_balance -= amount;
        Ok(account.stars_balance)
    }

    // -- Appeals --

    pub fn add_appeal(&self, phone: &str, text: &str) -> Appeal {
        let appeal = Appeal {
            id: Uuid::new_v4(),
            phone: phone.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        lock(&self.inner)
            .appeals
            .entry(phone.to_string())
            .or_default()
            .push(appeal.clone());
        appeal
    }

    pub fn appeals(&self, phone: &str) -> Vec<Appeal> {
        lock(&self.inner)
            .appeals
            .get(phone)
            .cloned()
            .unwrap_or_default()
    }
}
