use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use killagram_types::models::{ConversationId, ConversationSummary, ProviderMessage};

use crate::credentials::Credential;
use crate::port::{
    MessageQuery, MessagingProvider, ProviderConnection, ProviderError, ProviderResult,
};

/// Sign-in code accepted for every phone.
pub const LOGIN_CODE: &str = "12345";

/// In-process provider. Keeps one mailbox per phone and hands out
/// connections that read and write it directly.
///
/// Used by the dev binary and by tests, which seed conversations and inject
/// failures through the inherent methods.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    world: Arc<Mutex<World>>,
}

#[derive(Default)]
struct World {
    mailboxes: HashMap<String, Mailbox>,
    sessions: HashMap<String, String>,
    passwords: HashMap<String, String>,
    unavailable: bool,
    failing_sends: usize,
    open_connections: usize,
}

#[derive(Default)]
struct Mailbox {
    conversations: Vec<ConversationSummary>,
    messages: HashMap<ConversationId, Vec<ProviderMessage>>,
    last_id: i64,
}

impl Mailbox {
    fn knows(&self, chat: ConversationId) -> bool {
        chat.is_saved() || self.conversations.iter().any(|c| c.id == chat)
    }

    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

fn lock(world: &Mutex<World>) -> MutexGuard<'_, World> {
    world.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Numeric user id derived from the phone digits.
fn sender_id(phone: &str) -> i64 {
    phone
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a two-factor password for `phone`.
    pub fn set_password(&self, phone: &str, password: &str) {
        lock(&self.world)
            .passwords
            .insert(phone.to_string(), password.to_string());
    }

    pub fn add_conversation(&self, phone: &str, conversation: ConversationSummary) {
        lock(&self.world)
            .mailboxes
            .entry(phone.to_string())
            .or_default()
            .conversations
            .push(conversation);
    }

    /// Append an incoming message to `chat`, stamped now.
    pub fn deliver(&self, phone: &str, chat: ConversationId, sender: i64, text: &str) -> ProviderMessage {
        let mut world = lock(&self.world);
        let mailbox = world.mailboxes.entry(phone.to_string()).or_default();
        let message = ProviderMessage {
            id: mailbox.next_id(),
            conversation: chat,
            sender_id: Some(sender),
            text: text.to_string(),
            date: Some(Utc::now()),
            outgoing: false,
            reply_to: None,
            media: None,
            action: None,
            forwarded_from: None,
        };
        mailbox.messages.entry(chat).or_default().push(message.clone());
        message
    }

    /// Store `message` as is. Its id must be unique within the mailbox.
    pub fn insert_message(&self, phone: &str, message: ProviderMessage) {
        let mut world = lock(&self.world);
        let mailbox = world.mailboxes.entry(phone.to_string()).or_default();
        mailbox.last_id = mailbox.last_id.max(message.id);
        mailbox
            .messages
            .entry(message.conversation)
            .or_default()
            .push(message);
    }

    pub fn messages(&self, phone: &str, chat: ConversationId) -> Vec<ProviderMessage> {
        lock(&self.world)
            .mailboxes
            .get(phone)
            .and_then(|mailbox| mailbox.messages.get(&chat).cloned())
            .unwrap_or_default()
    }

    /// While set, every connection call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.world).unavailable = unavailable;
    }

    /// Fail the next `count` sends with `Unavailable`.
    pub fn fail_next_sends(&self, count: usize) {
        lock(&self.world).failing_sends = count;
    }

    /// Connections handed out and not yet disconnected.
    pub fn open_connections(&self) -> usize {
        lock(&self.world).open_connections
    }
}

#[async_trait]
impl MessagingProvider for MemoryProvider {
    async fn request_code(&self, phone: &str) -> ProviderResult<()> {
        debug!("Login code for {} is {}", phone, LOGIN_CODE);
        Ok(())
    }

    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        password: Option<&str>,
    ) -> ProviderResult<Credential> {
        if code != LOGIN_CODE {
            return Err(ProviderError::Unauthorized);
        }

        let mut world = lock(&self.world);
        if let Some(expected) = world.passwords.get(phone) {
            match password {
                None => return Err(ProviderError::PasswordRequired),
                Some(given) if given != expected => return Err(ProviderError::Unauthorized),
                Some(_) => {}
            }
        }

        let session = format!("mem:{}", Uuid::new_v4());
        world.sessions.insert(session.clone(), phone.to_string());
        world.mailboxes.entry(phone.to_string()).or_default();
        Ok(Credential { session })
    }

    async fn connect(&self, credential: &Credential) -> ProviderResult<Box<dyn ProviderConnection>> {
        let mut world = lock(&self.world);
        if world.unavailable {
            return Err(ProviderError::Unavailable("provider offline".into()));
        }
        let phone = world
            .sessions
            .get(&credential.session)
            .cloned()
            .ok_or(ProviderError::Unauthorized)?;
        world.open_connections += 1;

        Ok(Box::new(MemoryConnection {
            world: self.world.clone(),
            phone,
            open: Mutex::new(true),
        }))
    }
}

struct MemoryConnection {
    world: Arc<Mutex<World>>,
    phone: String,
    open: Mutex<bool>,
}

impl MemoryConnection {
    /// Runs `f` against this user's mailbox, failing when the provider is
    /// offline.
    fn with_mailbox<T>(&self, f: impl FnOnce(&mut Mailbox) -> ProviderResult<T>) -> ProviderResult<T> {
        let mut world = lock(&self.world);
        if world.unavailable {
            return Err(ProviderError::Unavailable("provider offline".into()));
        }
        f(world.mailboxes.entry(self.phone.clone()).or_default())
    }
}

#[async_trait]
impl ProviderConnection for MemoryConnection {
    async fn list_conversations(&self, limit: usize) -> ProviderResult<Vec<ConversationSummary>> {
        self.with_mailbox(|mailbox| Ok(mailbox.conversations.iter().take(limit).cloned().collect()))
    }

    async fn list_messages(
        &self,
        chat: ConversationId,
        query: MessageQuery,
    ) -> ProviderResult<Vec<ProviderMessage>> {
        self.with_mailbox(|mailbox| {
            if !mailbox.knows(chat) {
                return Err(ProviderError::NotFound);
            }
            let messages = mailbox.messages.get(&chat).map(Vec::as_slice).unwrap_or_default();
            Ok(match query {
                MessageQuery::Recent(limit) => messages.iter().rev().take(limit).cloned().collect(),
                MessageQuery::Ids(ids) => ids
                    .iter()
                    .filter_map(|id| messages.iter().find(|m| m.id == *id).cloned())
                    .collect(),
            })
        })
    }

    async fn send_message(
        &self,
        chat: ConversationId,
        body: &str,
        reply_to: Option<i64>,
    ) -> ProviderResult<ProviderMessage> {
        {
            let mut world = lock(&self.world);
            if world.failing_sends > 0 {
                world.failing_sends -= 1;
                return Err(ProviderError::Unavailable("send failed".into()));
            }
        }

        let sender = sender_id(&self.phone);
        self.with_mailbox(|mailbox| {
            if !mailbox.knows(chat) {
                return Err(ProviderError::NotFound);
            }
            let message = ProviderMessage {
                id: mailbox.next_id(),
                conversation: chat,
                sender_id: Some(sender),
                text: body.to_string(),
                date: Some(Utc::now()),
                outgoing: true,
                reply_to,
                media: None,
                action: None,
                forwarded_from: None,
            };
            mailbox.messages.entry(chat).or_default().push(message.clone());
            if let Some(conversation) = mailbox.conversations.iter_mut().find(|c| c.id == chat) {
                conversation.last_message = Some(body.to_string());
            }
            Ok(message)
        })
    }

    async fn edit_message(
        &self,
        chat: ConversationId,
        message_id: i64,
        text: &str,
    ) -> ProviderResult<ProviderMessage> {
        self.with_mailbox(|mailbox| {
            let message = mailbox
                .messages
                .get_mut(&chat)
                .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
                .ok_or(ProviderError::NotFound)?;
            message.text = text.to_string();
            Ok(message.clone())
        })
    }

    async fn delete_messages(&self, chat: ConversationId, ids: &[i64]) -> ProviderResult<()> {
        self.with_mailbox(|mailbox| {
            if let Some(messages) = mailbox.messages.get_mut(&chat) {
                messages.retain(|m| !ids.contains(&m.id));
            }
            Ok(())
        })
    }

    async fn disconnect(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            *open = false;
            lock(&self.world).open_connections -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use killagram_types::models::ConversationKind;

    fn conversation(id: i64) -> ConversationSummary {
        ConversationSummary {
            id: ConversationId(id),
            title: format!("chat {id}"),
            unread_count: 0,
            last_message: None,
            kind: ConversationKind::Private,
        }
    }

    #[tokio::test]
    async fn sign_in_checks_code_and_password() {
        let provider = MemoryProvider::new();
        provider.set_password("+2", "hunter2");

        assert_eq!(
            provider.sign_in("+1", "00000", None).await.unwrap_err(),
            ProviderError::Unauthorized
        );
        assert!(provider.sign_in("+1", LOGIN_CODE, None).await.is_ok());
        assert_eq!(
            provider.sign_in("+2", LOGIN_CODE, None).await.unwrap_err(),
            ProviderError::PasswordRequired
        );
        assert_eq!(
            provider.sign_in("+2", LOGIN_CODE, Some("nope")).await.unwrap_err(),
            ProviderError::Unauthorized
        );
        assert!(provider.sign_in("+2", LOGIN_CODE, Some("hunter2")).await.is_ok());
    }

    #[tokio::test]
    async fn connection_round_trip() {
        let provider = MemoryProvider::new();
        provider.add_conversation("+1", conversation(5));
        let credential = provider.sign_in("+1", LOGIN_CODE, None).await.unwrap();
        let conn = provider.connect(&credential).await.unwrap();
        assert_eq!(provider.open_connections(), 1);

        let first = conn.send_message(ConversationId(5), "one", None).await.unwrap();
        let second = conn.send_message(ConversationId(5), "two", Some(first.id)).await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(second.reply_to, Some(first.id));

        let recent = conn.list_messages(ConversationId(5), MessageQuery::Recent(10)).await.unwrap();
        assert_eq!(recent.iter().map(|m| m.id).collect::<Vec<_>>(), [second.id, first.id]);

        let edited = conn.edit_message(ConversationId(5), first.id, "uno").await.unwrap();
        assert_eq!(edited.text, "uno");

        conn.delete_messages(ConversationId(5), &[first.id]).await.unwrap();
        assert!(conn.message(ConversationId(5), first.id).await.unwrap().is_none());

        assert_eq!(
            conn.send_message(ConversationId(99), "x", None).await.unwrap_err(),
            ProviderError::NotFound
        );
        assert!(conn.send_message(ConversationId::SAVED, "note", None).await.is_ok());

        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(provider.open_connections(), 0);
    }

    #[tokio::test]
    async fn injected_failures() {
        let provider = MemoryProvider::new();
        let credential = provider.sign_in("+1", LOGIN_CODE, None).await.unwrap();
        let conn = provider.connect(&credential).await.unwrap();

        provider.fail_next_sends(1);
        assert!(matches!(
            conn.send_message(ConversationId::SAVED, "x", None).await,
            Err(ProviderError::Unavailable(_))
        ));
        assert!(conn.send_message(ConversationId::SAVED, "x", None).await.is_ok());

        provider.set_unavailable(true);
        assert!(conn.list_conversations(10).await.is_err());
        assert!(provider.connect(&credential).await.is_err());
    }

    #[tokio::test]
    async fn unknown_session_is_unauthorized() {
        let provider = MemoryProvider::new();
        let stale = Credential {
            session: "mem:gone".into(),
        };
        assert_eq!(
            provider.connect(&stale).await.err(),
            Some(ProviderError::Unauthorized)
        );
    }
}
