use async_trait::async_trait;
use thiserror::Error;

use killagram_types::CoreError;
use killagram_types::error::{NotFound, PolicyViolation};
use killagram_types::models::{ConversationId, ConversationSummary, ProviderMessage};

use crate::credentials::Credential;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider rejected the session")]
    Unauthorized,

    #[error("two-factor password required")]
    PasswordRequired,

    #[error("no such conversation or message")]
    NotFound,

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for CoreError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unauthorized => CoreError::AuthFailure,
            ProviderError::PasswordRequired => PolicyViolation::PasswordRequired.into(),
            ProviderError::NotFound => NotFound::Message.into(),
            ProviderError::Unavailable(msg) => CoreError::Provider(msg),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Which messages of a conversation to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageQuery {
    /// The most recent `n`, newest first.
    Recent(usize),
    /// These ids, in the given order. Missing ids are skipped.
    Ids(Vec<i64>),
}

/// Entry point of the provider: sign-in and connection setup.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn request_code(&self, phone: &str) -> ProviderResult<()>;

    /// Complete sign-in. Returns the session blob to persist.
    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        password: Option<&str>,
    ) -> ProviderResult<Credential>;

    async fn connect(&self, credential: &Credential) -> ProviderResult<Box<dyn ProviderConnection>>;
}

/// A live provider session. Callers must `disconnect` when done.
#[async_trait]
pub trait ProviderConnection: Send + Sync {
    async fn list_conversations(&self, limit: usize) -> ProviderResult<Vec<ConversationSummary>>;

    async fn list_messages(
        &self,
        chat: ConversationId,
        query: MessageQuery,
    ) -> ProviderResult<Vec<ProviderMessage>>;

    async fn send_message(
        &self,
        chat: ConversationId,
        body: &str,
        reply_to: Option<i64>,
    ) -> ProviderResult<ProviderMessage>;

    async fn edit_message(
        &self,
        chat: ConversationId,
        message_id: i64,
        text: &str,
    ) -> ProviderResult<ProviderMessage>;

    async fn delete_messages(&self, chat: ConversationId, ids: &[i64]) -> ProviderResult<()>;

    async fn disconnect(&self);

    /// Single message lookup.
    async fn message(
        &self,
        chat: ConversationId,
        message_id: i64,
    ) -> ProviderResult<Option<ProviderMessage>> {
        let found = self
            .list_messages(chat, MessageQuery::Ids(vec![message_id]))
            .await?;
        Ok(found.into_iter().next())
    }
}
