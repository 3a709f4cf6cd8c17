//! Boundary to the external messaging provider and to credential storage.
//!
//! The core never speaks the provider protocol. It talks to a
//! [`MessagingProvider`] and the [`ProviderConnection`]s it hands out, and
//! keeps each user's opaque session blob in a [`CredentialStore`].

pub mod credentials;
pub mod memory;
pub mod port;

pub use credentials::{Credential, CredentialStore, MemoryCredentialStore, connect_user};
pub use memory::MemoryProvider;
pub use port::{MessageQuery, MessagingProvider, ProviderConnection, ProviderError, ProviderResult};
