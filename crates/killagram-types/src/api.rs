use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Account, AccountStatus, ContentType, ConversationId, ConversationKind, MessageView, UserGift,
};

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestCodeRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfirmCodeRequest {
    pub phone: String,
    pub code: String,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmCodeResponse {
    pub status: String,
    pub token: String,
    pub account_status: AccountStatus,
    pub freeze_reason: Option<String>,
}

/// Short-lived token that authorizes one realtime connection.
#[derive(Debug, Serialize, Deserialize)]
pub struct RealtimeTokenResponse {
    pub ws_token: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub id: String,
    pub phone: String,
    pub status: AccountStatus,
    pub freeze_reason: Option<String>,
    pub premium: bool,
    pub premium_until: Option<DateTime<Utc>>,
    pub stars_balance: i64,
}

impl From<&Account> for MeResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.phone.replace('+', ""),
            phone: account.phone.clone(),
            status: account.status,
            freeze_reason: account.freeze_reason.clone(),
            premium: account.premium,
            premium_until: account.premium_until,
            stars_balance: account.stars_balance,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FreezeRequest {
    pub phone: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnfreezeRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppealRequest {
    pub text: String,
}

// -- Premium --

#[derive(Debug, Serialize, Deserialize)]
pub struct PremiumFeatures {
    pub ai_summary_limit_per_minute: usize,
    pub smart_replies: bool,
    pub premium_gifts: bool,
    pub market_access: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PremiumStatusResponse {
    pub premium: bool,
    pub premium_until: Option<DateTime<Utc>>,
    pub features: PremiumFeatures,
}

impl From<&Account> for PremiumStatusResponse {
    fn from(account: &Account) -> Self {
        Self {
            premium: account.premium,
            premium_until: account.premium_until,
            features: PremiumFeatures {
                ai_summary_limit_per_minute: account.ai_summary_limit(),
                smart_replies: account.premium,
                premium_gifts: account.premium,
                market_access: account.premium,
            },
        }
    }
}

// -- Folders --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolderRequest {
    pub title: String,
    #[serde(default)]
    pub include_types: Vec<ConversationKind>,
    #[serde(default)]
    pub chat_ids: Vec<String>,
    #[serde(default)]
    pub order: i32,
    pub emoji_id: Option<String>,
    pub emoji_fallback: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FolderDeletedResponse {
    pub status: String,
    pub folder_id: String,
}

// -- Chat state --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DraftResponse {
    pub chat_id: i64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadReceiptRequest {
    pub last_message_id: i64,
}

// -- Messages --

/// Result of a send: delivered now, replayed from a previous identical send,
/// or deferred to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent {
        message: MessageView,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        idempotent: bool,
    },
    Scheduled {
        scheduled_id: Uuid,
        send_at: DateTime<Utc>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SavedMessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinRequest {
    pub chat_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionRequest {
    pub chat_id: i64,
    pub emoji: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReactionResponse {
    pub chat_id: ConversationId,
    pub message_id: i64,
    pub reactions: BTreeMap<String, u32>,
    pub mine: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardRequest {
    pub message_ids: Vec<i64>,
    pub target_chat_ids: Vec<i64>,
    /// Where the messages are taken from. Defaults to each target chat.
    pub from_chat_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForwardResponse {
    pub status: String,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditRequest {
    pub chat_id: i64,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EditResponse {
    pub status: String,
    pub message: MessageView,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteRequest {
    pub chat_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: String,
    pub chat_id: ConversationId,
    pub message_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteBatchRequest {
    pub chat_id: i64,
    pub message_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteBatchResponse {
    pub status: String,
    pub message_ids: Vec<i64>,
}

/// `?chat_id=` for history and thread lookups.
#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub chat_id: i64,
}

// -- AI --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummarizeRequest {
    pub chat_id: i64,
    #[serde(default = "default_range")]
    pub range: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    pub from_message_id: Option<i64>,
    pub to_message_id: Option<i64>,
    #[serde(default = "default_summary_limit")]
    pub limit: usize,
}

fn default_range() -> String {
    "recent".into()
}

fn default_mode() -> String {
    "short".into()
}

fn default_summary_limit() -> usize {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary: String,
    pub cached: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmartRepliesRequest {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SmartRepliesResponse {
    pub replies: Vec<String>,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// -- Gifts & market --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendGiftRequest {
    pub gift_id: String,
    pub chat_id: Option<i64>,
    pub to_user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendGiftResponse {
    pub status: String,
    pub gift: UserGift,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurchaseRequest {
    pub item_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponse {
    pub stars_balance: i64,
}

// -- Search --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchMessagesRequest {
    pub query: String,
    pub folder_id: Option<String>,
    pub chat_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub has_media: Option<bool>,
    #[serde(default)]
    pub saved_only: bool,
    #[serde(default)]
    pub chat_scope: Vec<ConversationKind>,
    #[serde(default)]
    pub content_types: Vec<ContentType>,
    pub has_downloadable_file: Option<bool>,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_search_limit() -> usize {
    20
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchMessageHit {
    pub message: MessageView,
    pub chat_title: String,
    pub chat_id: ConversationId,
    pub chat_type: ConversationKind,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchMessagesResponse {
    pub items: Vec<SearchMessageHit>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    #[default]
    Chats,
    Groups,
    Channels,
}

impl SearchScope {
    pub fn admits(self, kind: ConversationKind) -> bool {
        match self {
            Self::Chats => matches!(kind, ConversationKind::Private | ConversationKind::Bots),
            Self::Groups => kind == ConversationKind::Groups,
            Self::Channels => kind == ConversationKind::Channels,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub scope: SearchScope,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub scope: SearchScope,
    pub snippet: String,
}

// -- Realtime --

/// Connection parameters of the realtime channel. Missing credentials are
/// rejected by the channel itself, not by the upgrade.
#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub token: String,
    pub chat_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_outcome_tags_status() {
        let outcome = SendOutcome::Scheduled {
            scheduled_id: Uuid::nil(),
            send_at: DateTime::<Utc>::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "scheduled");
        assert!(json.get("idempotent").is_none());
    }

    #[test]
    fn request_defaults_apply() {
        let req: SummarizeRequest = serde_json::from_str(r#"{"chat_id": 5}"#).unwrap();
        assert_eq!(req.range, "recent");
        assert_eq!(req.mode, "short");
        assert_eq!(req.limit, 50);

        let req: PurchaseRequest = serde_json::from_str(r#"{"item_id": "gift_box"}"#).unwrap();
        assert_eq!(req.quantity, 1);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_str::<DraftRequest>(r#"{"text": "hi", "extra": 1}"#);
        assert!(parsed.is_err());
    }
}
