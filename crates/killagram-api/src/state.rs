use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use killagram_gateway::Gateway;
use killagram_provider::{CredentialStore, MessagingProvider, ProviderConnection, connect_user};
use killagram_state::State;
use killagram_types::events::RealtimeEvent;
use killagram_types::models::Account;

use crate::error::ApiResult;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub state: Arc<State>,
    pub provider: Arc<dyn MessagingProvider>,
    pub credentials: Arc<dyn CredentialStore>,
    pub gateway: Gateway,
    /// Shared secret for the freeze/unfreeze routes. Unset disables them.
    pub admin_key: Option<String>,
}

impl AppStateInner {
    pub fn new(
        state: Arc<State>,
        provider: Arc<dyn MessagingProvider>,
        credentials: Arc<dyn CredentialStore>,
        tick_interval: Duration,
        admin_key: Option<String>,
    ) -> Self {
        let gateway = Gateway::new(
            state.clone(),
            provider.clone(),
            credentials.clone(),
            tick_interval,
        );
        Self {
            state,
            provider,
            credentials,
            gateway,
            admin_key,
        }
    }

    /// Provider connection for `user`. The caller disconnects it.
    pub async fn connect(&self, user: &str) -> ApiResult<Box<dyn ProviderConnection>> {
        connect_user(self.provider.as_ref(), &self.credentials, user)
            .await
            .map_err(|e| {
                warn!("Provider connection for {} failed: {}", user, e);
                e.into()
            })
    }

    /// The account, unless it is frozen.
    pub fn active(&self, user: &str) -> ApiResult<Account> {
        Ok(self.state.accounts.ensure_active(user)?)
    }

    pub fn push(&self, user: &str, event: RealtimeEvent) {
        self.state.outbox.push(user, event);
    }
}
