pub mod connection;
pub mod registry;
pub mod sync_loop;

use std::sync::Arc;
use std::time::Duration;

use killagram_provider::{CredentialStore, MessagingProvider};
use killagram_state::State;

use registry::Registry;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Everything a realtime channel needs, shared by all connections.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    state: Arc<State>,
    provider: Arc<dyn MessagingProvider>,
    credentials: Arc<dyn CredentialStore>,
    registry: Registry,
    tick_interval: Duration,
}

impl Gateway {
    pub fn new(
        state: Arc<State>,
        provider: Arc<dyn MessagingProvider>,
        credentials: Arc<dyn CredentialStore>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                state,
                provider,
                credentials,
                registry: Registry::new(),
                tick_interval,
            }),
        }
    }

    pub fn state(&self) -> &Arc<State> {
        &self.inner.state
    }

    pub fn provider(&self) -> &dyn MessagingProvider {
        self.inner.provider.as_ref()
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.credentials
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn tick_interval(&self) -> Duration {
        self.inner.tick_interval
    }
}
