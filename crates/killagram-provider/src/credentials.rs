use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::port::{MessagingProvider, ProviderConnection, ProviderError, ProviderResult};

/// Provider session blob for one user. Opaque to everything but the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub session: String,
}

/// Per-user credential persistence. Blocking; async callers go through
/// `spawn_blocking`.
///
/// Each user's record also carries the account version that API and
/// realtime tokens are bound to. Saving or deleting the session leaves the
/// version untouched, and a stored version never decreases.
pub trait CredentialStore: Send + Sync {
    fn load(&self, user: &str) -> Result<Option<Credential>>;
    fn save(&self, user: &str, credential: &Credential) -> Result<()>;
    fn delete(&self, user: &str) -> Result<()>;

    /// Every user whose version moved past the initial one.
    fn account_versions(&self) -> Result<Vec<(String, u64)>>;
    fn save_account_version(&self, user: &str, version: u64) -> Result<()>;
}

/// Open a provider connection with the session stored for `user`.
///
/// A user without a stored session is `Unauthorized`; a failing store reads
/// as the provider being unavailable.
pub async fn connect_user(
    provider: &dyn MessagingProvider,
    credentials: &Arc<dyn CredentialStore>,
    user: &str,
) -> ProviderResult<Box<dyn ProviderConnection>> {
    let store = credentials.clone();
    let owner = user.to_string();
    let credential = tokio::task::spawn_blocking(move || store.load(&owner))
        .await
        .map_err(|e| ProviderError::Unavailable(format!("credential lookup aborted: {e}")))?
        .map_err(|e| ProviderError::Unavailable(format!("credential lookup failed: {e}")))?
        .ok_or(ProviderError::Unauthorized)?;

    provider.connect(&credential).await
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Credential>>,
    versions: Mutex<HashMap<String, u64>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, user: &str) -> Result<Option<Credential>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Credential lock poisoned: {}", e))?;
        Ok(entries.get(user).cloned())
    }

    fn save(&self, user: &str, credential: &Credential) -> Result<()> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Credential lock poisoned: {}", e))?
            .insert(user.to_string(), credential.clone());
        Ok(())
    }

    fn delete(&self, user: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Credential lock poisoned: {}", e))?
            .remove(user);
        Ok(())
    }

    fn account_versions(&self) -> Result<Vec<(String, u64)>> {
        let versions = self
            .versions
            .lock()
            .map_err(|e| anyhow::anyhow!("Credential lock poisoned: {}", e))?;
        Ok(versions.iter().map(|(user, v)| (user.clone(), *v)).collect())
    }

    fn save_account_version(&self, user: &str, version: u64) -> Result<()> {
        let mut versions = self
            .versions
            .lock()
            .map_err(|e| anyhow::anyhow!("Credential lock poisoned: {}", e))?;
        let stored = versions.entry(user.to_string()).or_insert(version);
        *stored = (*stored).max(version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{LOGIN_CODE, MemoryProvider};

    #[test]
    fn save_load_delete() {
        let store = MemoryCredentialStore::new();
        let credential = Credential {
            session: "blob".into(),
        };
        assert_eq!(store.load("+1").unwrap(), None);
        store.save("+1", &credential).unwrap();
        assert_eq!(store.load("+1").unwrap(), Some(credential));
        store.delete("+1").unwrap();
        assert_eq!(store.load("+1").unwrap(), None);
    }

    #[test]
    fn account_version_outlives_session_and_never_decreases() {
        let store = MemoryCredentialStore::new();
        store.save_account_version("+1", 3).unwrap();
        store.save_account_version("+1", 2).unwrap();
        store
            .save("+1", &Credential { session: "blob".into() })
            .unwrap();
        store.delete("+1").unwrap();

        assert_eq!(store.account_versions().unwrap(), vec![("+1".to_string(), 3)]);
    }

    #[tokio::test]
    async fn connect_user_needs_a_stored_session() {
        let provider = MemoryProvider::new();
        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());

        assert_eq!(
            connect_user(&provider, &credentials, "+1").await.err(),
            Some(ProviderError::Unauthorized)
        );

        let credential = provider.sign_in("+1", LOGIN_CODE, None).await.unwrap();
        credentials.save("+1", &credential).unwrap();
        let conn = connect_user(&provider, &credentials, "+1").await.unwrap();
        conn.disconnect().await;
    }
}
