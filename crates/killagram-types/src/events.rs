use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AccountStatus, ConversationId, DraftState, Folder, MessageView, PinState, ReadReceipt,
    Transaction, TypingState,
};

/// Where a `message_created` event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageScope {
    /// Sent by the user through the API.
    User,
    /// Delivered by the scheduler.
    Scheduled,
    /// Produced by a forward.
    Forward,
    /// Observed while polling the watched conversation.
    Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FolderChange {
    Created { folder: Folder },
    Updated { folder: Folder },
    Deleted { folder_id: String },
}

/// Events delivered over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum RealtimeEvent {
    MessageCreated {
        chat_id: ConversationId,
        scope: MessageScope,
        message: MessageView,
    },

    MessageEdited {
        chat_id: ConversationId,
        message: MessageView,
    },

    MessageDeleted {
        chat_id: ConversationId,
        message_id: i64,
    },

    PinUpdated(PinState),

    DraftUpdated(DraftState),

    ReadReceiptUpdated(ReadReceipt),

    TypingUpdated(TypingState),

    ReactionUpdated {
        chat_id: ConversationId,
        message_id: i64,
        reactions: BTreeMap<String, u32>,
        mine: Vec<String>,
    },

    FolderUpdated(FolderChange),

    AccountStatusUpdated {
        status: AccountStatus,
        freeze_reason: Option<String>,
    },

    GiftReceived { gift_id: String, from: String },

    MarketPurchase(Transaction),
}

impl RealtimeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message_created",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::PinUpdated(_) => "pin_updated",
            Self::DraftUpdated(_) => "draft_updated",
            Self::ReadReceiptUpdated(_) => "read_receipt_updated",
            Self::TypingUpdated(_) => "typing_updated",
            Self::ReactionUpdated { .. } => "reaction_updated",
            Self::FolderUpdated(_) => "folder_updated",
            Self::AccountStatusUpdated { .. } => "account_status_updated",
            Self::GiftReceived { .. } => "gift_received",
            Self::MarketPurchase(_) => "market_purchase",
        }
    }

    /// Returns the conversation this event is scoped to, if any.
    pub fn chat_id(&self) -> Option<ConversationId> {
        match self {
            Self::MessageCreated { chat_id, .. }
            | Self::MessageEdited { chat_id, .. }
            | Self::MessageDeleted { chat_id, .. }
            | Self::ReactionUpdated { chat_id, .. } => Some(*chat_id),
            Self::PinUpdated(pin) => Some(pin.chat_id),
            Self::DraftUpdated(draft) => Some(draft.chat_id),
            Self::ReadReceiptUpdated(receipt) => Some(receipt.chat_id),
            Self::TypingUpdated(typing) => Some(typing.chat_id),
            // Folder, account, gift and market events are account-wide
            _ => None,
        }
    }
}

/// `{event_id, event_type, payload}` record as written to the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    #[serde(flatten)]
    pub event: RealtimeEvent,
}

impl EventEnvelope {
    /// Wrap an event under a fresh unique id.
    pub fn new(event: RealtimeEvent) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event,
        }
    }

    /// Envelope for a message observed on the provider. The id is derived
    /// from the message id so the client can recognise repeats.
    pub fn observed_message(chat_id: ConversationId, message: MessageView) -> Self {
        Self {
            event_id: format!("msg_{}", message.id),
            event: RealtimeEvent::MessageCreated {
                chat_id,
                scope: MessageScope::Poll,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_flattens_tag_and_payload() {
        let envelope = EventEnvelope::new(RealtimeEvent::TypingUpdated(TypingState {
            chat_id: ConversationId(7),
            is_typing: true,
        }));
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["event_type"], "typing_updated");
        assert_eq!(json["payload"]["chat_id"], "7");
        assert_eq!(json["payload"]["is_typing"], true);
        assert_eq!(json["event_id"].as_str().unwrap().len(), 36);
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let event = RealtimeEvent::MessageDeleted {
            chat_id: ConversationId::SAVED,
            message_id: 3,
        };
        let json = serde_json::to_value(EventEnvelope::new(event.clone())).unwrap();
        assert_eq!(json["event_type"], event.event_type());
        assert_eq!(json["payload"]["chat_id"], "saved");
        assert_eq!(event.chat_id(), Some(ConversationId::SAVED));
    }

    #[test]
    fn folder_change_carries_action() {
        let event = RealtimeEvent::FolderUpdated(FolderChange::Deleted {
            folder_id: "f1".into(),
        });
        let json = serde_json::to_value(EventEnvelope::new(event)).unwrap();
        assert_eq!(json["payload"]["action"], "deleted");
        assert_eq!(json["payload"]["folder_id"], "f1");
    }
}
