use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use killagram_crypto::token::TokenKind;
use killagram_provider::{MessageQuery, ProviderConnection, ProviderError, connect_user};
use killagram_state::State;
use killagram_types::events::{EventEnvelope, MessageScope, RealtimeEvent};
use killagram_types::models::{ConversationId, MessageView, ProviderMessage, ScheduledSend};

use crate::Gateway;

/// Messages fetched per poll of the watched conversation.
pub const POLL_LIMIT: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Connecting,
    Authenticating,
    Streaming,
    Closed,
}

/// Why a realtime channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Unauthorized,
    ProviderFailure,
    Superseded,
    Revoked,
    ClientClosed,
    SendFailed,
}

impl CloseReason {
    /// WebSocket close code sent to the client.
    pub fn code(&self) -> u16 {
        match self {
            Self::Unauthorized => 4401,
            Self::ProviderFailure => 1011,
            Self::Superseded => 4409,
            Self::Revoked => 4403,
            Self::ClientClosed | Self::SendFailed => 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::ProviderFailure => "provider unavailable",
            Self::Superseded => "superseded by a newer connection",
            Self::Revoked => "session revoked",
            Self::ClientClosed => "closed by client",
            Self::SendFailed => "send failed",
        }
    }

    /// A close frame is pointless once the socket is gone.
    pub fn notifies_client(&self) -> bool {
        !matches!(self, Self::ClientClosed | Self::SendFailed)
    }
}

/// Events produced by one tick. `close` is set when the session must end
/// after these events are sent.
#[derive(Debug, Default)]
pub struct Tick {
    pub events: Vec<EventEnvelope>,
    pub close: Option<CloseReason>,
}

/// Per-connection sync state: the provider connection, the watched
/// conversation and the ids already delivered from it.
///
/// A session starts `Connecting`, is `Authenticating` while the token is
/// checked and the provider connection acquired, and is `Streaming` from
/// then until `close`.
pub struct SyncSession {
    user: String,
    state: Arc<State>,
    connection: Option<Box<dyn ProviderConnection>>,
    watched: Option<ConversationId>,
    seen: HashSet<i64>,
    phase: SyncState,
}

impl SyncSession {
    /// A session for a channel that has just been accepted.
    pub fn new(gateway: &Gateway, user: &str, watched: Option<ConversationId>) -> Self {
        Self {
            user: user.to_string(),
            state: gateway.state().clone(),
            connection: None,
            watched,
            seen: HashSet::new(),
            phase: SyncState::Connecting,
        }
    }

    /// Check the realtime token, then acquire the provider connection.
    /// A failure leaves the session closed.
    pub async fn authenticate(&mut self, gateway: &Gateway, token: &str) -> Result<(), CloseReason> {
        self.phase = SyncState::Authenticating;
        debug!("Realtime session for {} authenticating", self.user);

        if self.user.is_empty() || !self.state.tokens.verify(token, &self.user, TokenKind::Realtime) {
            warn!("Realtime token rejected for {}", self.user);
            self.phase = SyncState::Closed;
            return Err(CloseReason::Unauthorized);
        }

        match connect_user(gateway.provider(), gateway.credentials(), &self.user).await {
            Ok(connection) => self.connection = Some(connection),
            Err(e) => {
                warn!("Realtime session for {} could not reach the provider: {}", self.user, e);
                self.phase = SyncState::Closed;
                return Err(CloseReason::ProviderFailure);
            }
        }

        self.phase = SyncState::Streaming;
        info!("Realtime session for {} streaming (watching {:?})", self.user, self.watched);
        Ok(())
    }

    /// `new` followed by `authenticate`.
    pub async fn open(
        gateway: &Gateway,
        user: &str,
        token: &str,
        watched: Option<ConversationId>,
    ) -> Result<Self, CloseReason> {
        let mut session = Self::new(gateway, user, watched);
        session.authenticate(gateway, token).await?;
        Ok(session)
    }

    pub fn phase(&self) -> SyncState {
        self.phase
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// One sync round: deliver due scheduled sends, drain the outbox, then
    /// poll the watched conversation.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Tick {
        let mut tick = Tick::default();
        if self.phase != SyncState::Streaming || self.connection.is_none() {
            tick.close = Some(CloseReason::Revoked);
            return tick;
        }

        tick.close = self.deliver_scheduled(now).await;
        tick.events = self.state.outbox.drain(&self.user);

        if tick.close.is_none() {
            match self.poll_watched().await {
                Ok(observed) => tick.events.extend(observed),
                Err(reason) => tick.close = Some(reason),
            }
        }
        if !tick.events.is_empty() {
            debug!("Tick for {}: {} events", self.user, tick.events.len());
        }
        tick
    }

    /// Sends every due entry through the provider and pushes the resulting
    /// `message_created` events to the outbox. A missing conversation drops
    /// the entry; any other failure puts the failed entry and the rest of the
    /// batch back and ends the session.
    async fn deliver_scheduled(&mut self, now: DateTime<Utc>) -> Option<CloseReason> {
        let connection = self.connection.as_ref()?;
        let mut due = self.state.scheduled.pop_due(&self.user, now).into_iter();

        while let Some(entry) = due.next() {
            let sent = connection
                .send_message(
                    entry.conversation,
                    &entry.payload.body(),
                    entry.payload.reply_to_id,
                )
                .await;

            match sent {
                Ok(message) => {
                    let view = self.scheduled_view(&entry, &message);
                    self.state.summaries.invalidate(&self.user, entry.conversation);
                    self.state.outbox.push(
                        &self.user,
                        RealtimeEvent::MessageCreated {
                            chat_id: entry.conversation,
                            scope: MessageScope::Scheduled,
                            message: view,
                        },
                    );
                }
                Err(ProviderError::NotFound) => {
                    error!(
                        "Dropping scheduled send {} for {}: conversation {} does not exist",
                        entry.id, self.user, entry.conversation
                    );
                }
                Err(e) => {
                    warn!("Scheduled send {} for {} failed: {}", entry.id, self.user, e);
                    let mut remaining = vec![entry];
                    remaining.extend(due);
                    self.state.scheduled.requeue(&self.user, remaining);
                    return Some(CloseReason::ProviderFailure);
                }
            }
        }
        None
    }

    fn scheduled_view(&self, entry: &ScheduledSend, message: &ProviderMessage) -> MessageView {
        let mut view = self.state.message_view(&self.user, message);
        view.scheduled_at = Some(entry.due_at);
        view.reply_to_id = entry.payload.reply_to_id;
        view.voice_duration = entry.payload.voice_duration;
        view.content_type = entry.payload.content_type.into();
        view
    }

    /// Newly observed messages of the watched conversation, oldest first.
    async fn poll_watched(&mut self) -> Result<Vec<EventEnvelope>, CloseReason> {
        let Some(chat) = self.watched else {
            return Ok(Vec::new());
        };

        let Some(connection) = self.connection.as_ref() else {
            return Ok(Vec::new());
        };
        let recent = match connection
            .list_messages(chat, MessageQuery::Recent(POLL_LIMIT))
            .await
        {
            Ok(recent) => recent,
            Err(ProviderError::NotFound) => {
                warn!("{} watches unknown conversation {}, polling stopped", self.user, chat);
                self.watched = None;
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!("Polling {} for {} failed: {}", chat, self.user, e);
                return Err(CloseReason::ProviderFailure);
            }
        };

        let mut observed = Vec::new();
        for message in recent.iter().rev() {
            if !self.seen.insert(message.id) {
                continue;
            }
            let view = self.state.message_view(&self.user, message);
            observed.push(EventEnvelope::observed_message(chat, view));
        }
        Ok(observed)
    }

    /// Release the provider connection. Idempotent.
    pub async fn close(&mut self) {
        if self.phase == SyncState::Closed {
            return;
        }
        self.phase = SyncState::Closed;
        if let Some(connection) = self.connection.take() {
            connection.disconnect().await;
        }
        info!("Realtime session for {} closed", self.user);
    }
}
