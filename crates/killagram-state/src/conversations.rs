use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use killagram_types::models::{
    ConversationId, DraftState, EditVersion, PinState, ReactionState, ReadReceipt, TypingState,
};

use crate::lock;

type ConversationKey = (String, ConversationId);
type MessageKey = (String, ConversationId, i64);

#[derive(Default)]
struct ConversationEntry {
    draft: Option<String>,
    pinned: Option<i64>,
    last_read: i64,
    typing: bool,
}

#[derive(Default)]
struct MessageEntry {
    counters: BTreeMap<String, u32>,
    mine: BTreeSet<String>,
    edits: Vec<EditVersion>,
}

impl MessageEntry {
    fn reactions(&self) -> ReactionState {
        ReactionState {
            counters: self.counters.clone(),
            mine: self.mine.iter().cloned().collect(),
        }
    }
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<ConversationKey, ConversationEntry>,
    messages: HashMap<MessageKey, MessageEntry>,
}

/// Per-user conversation state: drafts, pins, read receipts, typing flags,
/// reactions and edit history. A key that was never written reads as the
/// default state.
#[derive(Default)]
pub struct ConversationStateStore {
    inner: Mutex<Inner>,
}

fn conv_key(user: &str, chat: ConversationId) -> ConversationKey {
    (user.to_string(), chat)
}

fn msg_key(user: &str, chat: ConversationId, message_id: i64) -> MessageKey {
    (user.to_string(), chat, message_id)
}

impl ConversationStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Drafts --

    /// Empty text clears the draft.
    pub fn set_draft(&self, user: &str, chat: ConversationId, text: &str) -> DraftState {
        let mut inner = lock(&self.inner);
        let entry = inner.conversations.entry(conv_key(user, chat)).or_default();
        entry.draft = (!text.is_empty()).then(|| text.to_string());
        DraftState {
            chat_id: chat,
            text: text.to_string(),
        }
    }

    pub fn draft(&self, user: &str, chat: ConversationId) -> String {
        lock(&self.inner)
            .conversations
            .get(&conv_key(user, chat))
            .and_then(|entry| entry.draft.clone())
            .unwrap_or_default()
    }

    // -- Pins --

    pub fn set_pinned(&self, user: &str, chat: ConversationId, message_id: i64) -> PinState {
        let mut inner = lock(&self.inner);
        inner
            .conversations
            .entry(conv_key(user, chat))
            .or_default()
            .pinned = Some(message_id);
        PinState {
            chat_id: chat,
            message_id: Some(message_id),
            is_pinned: true,
        }
    }

    /// Unpin. With `message_id` given, only unpins if that message is the one
    /// pinned; otherwise nothing changes and the current pin is reported.
    pub fn clear_pinned(
        &self,
        user: &str,
        chat: ConversationId,
        message_id: Option<i64>,
    ) -> PinState {
        let mut inner = lock(&self.inner);
        let entry = inner.conversations.entry(conv_key(user, chat)).or_default();

        if let Some(requested) = message_id {
            if entry.pinned != Some(requested) {
                return PinState {
                    chat_id: chat,
                    message_id: entry.pinned,
                    is_pinned: entry.pinned.is_some(),
                };
            }
        }

        entry.pinned = None;
        PinState {
            chat_id: chat,
            message_id,
            is_pinned: false,
        }
    }

    pub fn pinned(&self, user: &str, chat: ConversationId) -> Option<i64> {
        lock(&self.inner)
            .conversations
            .get(&conv_key(user, chat))
            .and_then(|entry| entry.pinned)
    }

    // -- Read receipts --

    /// Stores the value as given; callers decide whether to enforce monotonicity.
    pub fn set_last_read(&self, user: &str, chat: ConversationId, message_id: i64) -> ReadReceipt {
        lock(&self.inner)
            .conversations
            .entry(conv_key(user, chat))
            .or_default()
            .last_read = message_id;
        ReadReceipt {
            chat_id: chat,
            last_message_id: message_id,
        }
    }

    pub fn last_read(&self, user: &str, chat: ConversationId) -> i64 {
        lock(&self.inner)
            .conversations
            .get(&conv_key(user, chat))
            .map_or(0, |entry| entry.last_read)
    }

    // -- Typing --

    pub fn set_typing(&self, user: &str, chat: ConversationId, is_typing: bool) -> TypingState {
        lock(&self.inner)
            .conversations
            .entry(conv_key(user, chat))
            .or_default()
            .typing = is_typing;
        TypingState {
            chat_id: chat,
            is_typing,
        }
    }

    pub fn typing(&self, user: &str, chat: ConversationId) -> bool {
        lock(&self.inner)
            .conversations
            .get(&conv_key(user, chat))
            .is_some_and(|entry| entry.typing)
    }

    // -- Reactions --

    /// Re-adding an emoji the user already applied changes nothing.
    pub fn add_reaction(
        &self,
        user: &str,
        chat: ConversationId,
        message_id: i64,
        emoji: &str,
    ) -> ReactionState {
        let mut inner = lock(&self.inner);
        let entry = inner.messages.entry(msg_key(user, chat, message_id)).or_default();
        if entry.mine.insert(emoji.to_string()) {
            *entry.counters.entry(emoji.to_string()).or_insert(0) += 1;
        }
        entry.reactions()
    }

    /// Removing an emoji the user never applied changes nothing.
    pub fn remove_reaction(
        &self,
        user: &str,
        chat: ConversationId,
        message_id: i64,
        emoji: &str,
    ) -> ReactionState {
        let mut inner = lock(&self.inner);
        let entry = inner.messages.entry(msg_key(user, chat, message_id)).or_default();
        if entry.mine.remove(emoji) {
            match entry.counters.get_mut(emoji) {
                Some(count) if *count > 1 => *count -= 1,
                _ => {
                    entry.counters.remove(emoji);
                }
            }
        }
        entry.reactions()
    }

    pub fn reaction_state(&self, user: &str, chat: ConversationId, message_id: i64) -> ReactionState {
        lock(&self.inner)
            .messages
            .get(&msg_key(user, chat, message_id))
            .map(MessageEntry::reactions)
            .unwrap_or_default()
    }

    // -- Edit history --

    pub fn append_edit_version(
        &self,
        user: &str,
        chat: ConversationId,
        message_id: i64,
        text: &str,
        date: Option<DateTime<Utc>>,
    ) {
        lock(&self.inner)
            .messages
            .entry(msg_key(user, chat, message_id))
            .or_default()
            .edits
            .push(EditVersion {
                text: text.to_string(),
                date,
            });
    }

    /// Newest first.
    pub fn edit_history(&self, user: &str, chat: ConversationId, message_id: i64) -> Vec<EditVersion> {
        lock(&self.inner)
            .messages
            .get(&msg_key(user, chat, message_id))
            .map(|entry| entry.edits.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn edit_version_count(&self, user: &str, chat: ConversationId, message_id: i64) -> usize {
        lock(&self.inner)
            .messages
            .get(&msg_key(user, chat, message_id))
            .map_or(0, |entry| entry.edits.len())
    }
}
