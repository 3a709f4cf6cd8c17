use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Stars every account starts with.
pub const INITIAL_STARS_BALANCE: i64 = 100;

/// AI summary requests per conversation per minute.
pub const AI_SUMMARY_LIMIT: usize = 8;
pub const AI_SUMMARY_LIMIT_PREMIUM: usize = 24;

// -- Conversations --

/// Provider conversation id. `-1` addresses the user's Saved Messages.
///
/// On the wire (event payloads, state keys) the id is rendered as a string:
/// `"saved"` for Saved Messages, the decimal id otherwise. Deserialization
/// accepts both that form and a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub i64);

impl ConversationId {
    pub const SAVED: ConversationId = ConversationId(-1);

    pub fn is_saved(self) -> bool {
        self == Self::SAVED
    }

    pub fn key(self) -> String {
        self.to_string()
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_saved() {
            f.write_str("saved")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Serialize for ConversationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(id) => Ok(Self(id)),
            Raw::Str(s) if s == "saved" => Ok(Self::SAVED),
            Raw::Str(s) => s
                .parse::<i64>()
                .map(Self)
                .map_err(|_| serde::de::Error::custom(format!("invalid conversation id '{s}'"))),
        }
    }
}

/// Conversation category, used by folder filters and search scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Private,
    Groups,
    Channels,
    Bots,
}

/// A conversation as listed by the messaging provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub unread_count: u32,
    pub last_message: Option<String>,
    pub kind: ConversationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    #[default]
    Unverified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationProvider {
    Telegram,
    ThirdParty,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Verification {
    pub status: VerificationStatus,
    pub provider: VerificationProvider,
    pub provider_name: Option<String>,
    pub badge_icon_url: Option<String>,
}

/// Chat list entry returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: i64,
    pub title: String,
    pub unread_count: u32,
    pub last_message: Option<String>,
    #[serde(default)]
    pub verification: Verification,
}

impl ChatSummary {
    pub fn saved_messages() -> Self {
        Self {
            id: ConversationId::SAVED.0,
            title: "Saved Messages".into(),
            unread_count: 0,
            last_message: Some(String::new()),
            verification: Verification::default(),
        }
    }
}

// -- Accounts --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Frozen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub phone: String,
    pub status: AccountStatus,
    pub freeze_reason: Option<String>,
    pub premium: bool,
    pub premium_until: Option<DateTime<Utc>>,
    pub stars_balance: i64,
    /// Revocation epoch for issued tokens. Starts at 1, only ever grows.
    pub account_version: u64,
}

impl Account {
    pub fn new(phone: &str) -> Self {
        Self {
            phone: phone.to_string(),
            status: AccountStatus::Active,
            freeze_reason: None,
            premium: false,
            premium_until: None,
            stars_balance: INITIAL_STARS_BALANCE,
            account_version: 1,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.status == AccountStatus::Frozen
    }

    pub fn ai_summary_limit(&self) -> usize {
        if self.premium {
            AI_SUMMARY_LIMIT_PREMIUM
        } else {
            AI_SUMMARY_LIMIT
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appeal {
    pub id: Uuid,
    pub phone: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// -- Messages --

/// Attachment shape reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Media {
    Photo,
    Document { voice: bool, duration: Option<u32> },
    WebPage,
    Video,
}

/// A message as returned by the messaging provider, before any per-user
/// state is layered on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub id: i64,
    pub conversation: ConversationId,
    pub sender_id: Option<i64>,
    pub text: String,
    pub date: Option<DateTime<Utc>>,
    pub outgoing: bool,
    pub reply_to: Option<i64>,
    pub media: Option<Media>,
    /// Service action name for system messages (member joined, call, ...).
    pub action: Option<String>,
    pub forwarded_from: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Photo,
    Video,
    Voice,
    File,
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutgoingKind {
    #[default]
    Text,
    Voice,
}

impl From<OutgoingKind> for ContentType {
    fn from(kind: OutgoingKind) -> Self {
        match kind {
            OutgoingKind::Text => ContentType::Text,
            OutgoingKind::Voice => ContentType::Voice,
        }
    }
}

/// Client send request. Also the payload kept for scheduled sends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(default)]
    pub text: String,
    pub client_message_id: Option<String>,
    pub reply_to_id: Option<i64>,
    pub send_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content_type: OutgoingKind,
    pub voice_duration: Option<u32>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl OutgoingMessage {
    /// Text handed to the provider. Voice notes travel as a marker.
    pub fn body(&self) -> String {
        match self.content_type {
            OutgoingKind::Text => self.text.clone(),
            OutgoingKind::Voice => format!("[voice:{}]", self.voice_duration.unwrap_or(0)),
        }
    }
}

/// A provider message enriched with the caller's conversation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub sender: String,
    pub text: String,
    pub date: Option<DateTime<Utc>>,
    pub is_outgoing: bool,
    pub reactions: BTreeMap<String, u32>,
    pub my_reactions: Vec<String>,
    pub can_edit: bool,
    pub is_read: bool,
    pub is_pinned: bool,
    pub is_system: bool,
    pub system_event_type: Option<String>,
    pub system_payload: BTreeMap<String, String>,
    pub content_type: ContentType,
    pub has_downloadable_file: bool,
    pub reply_to_id: Option<i64>,
    pub reply_preview: Option<String>,
    pub forwarded_from: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub voice_duration: Option<u32>,
    pub mentions: Vec<String>,
    pub hashtags: Vec<String>,
    pub edit_versions_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditVersion {
    pub text: String,
    pub date: Option<DateTime<Utc>>,
}

// -- Conversation state --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactionState {
    pub counters: BTreeMap<String, u32>,
    /// Emojis applied by the current user, sorted.
    pub mine: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinState {
    pub chat_id: ConversationId,
    pub message_id: Option<i64>,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftState {
    pub chat_id: ConversationId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub chat_id: ConversationId,
    pub last_message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingState {
    pub chat_id: ConversationId,
    pub is_typing: bool,
}

// -- Scheduling --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSend {
    pub id: Uuid,
    pub conversation: ConversationId,
    pub payload: OutgoingMessage,
    pub due_at: DateTime<Utc>,
}

// -- Folders --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub include_types: Vec<ConversationKind>,
    #[serde(default)]
    pub chat_ids: Vec<String>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub is_system: bool,
    pub emoji_id: Option<String>,
    pub emoji_fallback: Option<String>,
}

// -- Gifts & market --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gift {
    pub id: String,
    pub title: String,
    pub rarity: String,
    pub image: String,
    pub premium_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGift {
    pub owner: String,
    pub gift_id: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketItemType {
    Premium,
    Gift,
    Plugin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketItem {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub item_type: MarketItemType,
    pub price_stars: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub phone: String,
    pub item_id: String,
    pub quantity: u32,
    pub amount_stars: i64,
    pub created_at: DateTime<Utc>,
}
