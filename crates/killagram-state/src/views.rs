use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use killagram_types::models::{
    ChatSummary, ContentType, ConversationKind, ConversationSummary, Media,
    MessageView, ProviderMessage, Verification, VerificationProvider, VerificationStatus,
};

use crate::conversations::ConversationStateStore;

/// Messages can be edited or deleted this long after they were sent.
pub const EDIT_WINDOW_HOURS: i64 = 48;

const REPLY_PREVIEW_CHARS: usize = 72;

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w])@([A-Za-z0-9_]{2,32})").expect("valid regex"));
static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w])#([A-Za-z0-9_]{2,64})").expect("valid regex"));

pub fn within_edit_window(date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    date.is_some_and(|sent| now - sent <= Duration::hours(EDIT_WINDOW_HOURS))
}

fn tags(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .map(|caps| caps[1].to_lowercase())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Lowercased, deduplicated and sorted `@mentions` and `#hashtags`.
pub fn mentions_and_hashtags(text: &str) -> (Vec<String>, Vec<String>) {
    (tags(&MENTION_RE, text), tags(&HASHTAG_RE, text))
}

/// Content type and whether the attachment is downloadable.
pub fn detect_content(message: &ProviderMessage) -> (ContentType, bool) {
    match &message.media {
        None if message.text.to_lowercase().contains("http") => (ContentType::Link, false),
        None => (ContentType::Text, false),
        Some(Media::Photo) => (ContentType::Photo, true),
        Some(Media::Document { voice: true, .. }) => (ContentType::Voice, true),
        Some(Media::Document { .. }) => (ContentType::File, true),
        Some(Media::WebPage) => (ContentType::Link, false),
        Some(Media::Video) => (ContentType::Video, true),
    }
}

/// Maps a service action to `(event type, payload)`.
pub fn system_event(action: &str) -> (String, BTreeMap<String, String>) {
    let name = action.to_lowercase();
    let kind = if name.contains("adduser") || name.contains("joined") {
        "member_joined"
    } else if name.contains("call") {
        "call_started"
    } else if name.contains("gift") {
        "gift_received"
    } else {
        "system_event"
    };
    (kind.to_string(), BTreeMap::from([("action".to_string(), name)]))
}

pub fn verification_for(conversation: &ConversationSummary) -> Verification {
    let title = conversation.title.to_lowercase();
    if title.contains("official") {
        Verification {
            status: VerificationStatus::Verified,
            provider: VerificationProvider::Telegram,
            provider_name: Some("Telegram".into()),
            badge_icon_url: None,
        }
    } else if title.contains("verified") || conversation.kind == ConversationKind::Channels {
        Verification {
            status: VerificationStatus::Verified,
            provider: VerificationProvider::ThirdParty,
            provider_name: Some("Trusted Partner".into()),
            badge_icon_url: None,
        }
    } else {
        Verification::default()
    }
}

pub fn chat_summary(conversation: &ConversationSummary) -> ChatSummary {
    ChatSummary {
        id: conversation.id.0,
        title: conversation.title.clone(),
        unread_count: conversation.unread_count,
        last_message: conversation.last_message.clone(),
        verification: verification_for(conversation),
    }
}

/// Preview of a replied-to message: its text, or `[content type]` when empty.
pub fn reply_preview(message: &ProviderMessage) -> String {
    let text = message.text.trim();
    if text.is_empty() {
        let (content_type, _) = detect_content(message);
        let label = match content_type {
            ContentType::Text => "text",
            ContentType::Photo => "photo",
            ContentType::Video => "video",
            ContentType::Voice => "voice",
            ContentType::File => "file",
            ContentType::Link => "link",
        };
        format!("[{label}]")
    } else {
        text.chars().take(REPLY_PREVIEW_CHARS).collect()
    }
}

/// Layer `user`'s conversation state over a provider message.
pub fn message_view(
    store: &ConversationStateStore,
    user: &str,
    message: &ProviderMessage,
    now: DateTime<Utc>,
) -> MessageView {
    let chat = message.conversation;
    let reactions = store.reaction_state(user, chat, message.id);
    let (content_type, has_downloadable_file) = detect_content(message);
    let (mentions, hashtags) = mentions_and_hashtags(&message.text);
    let (system_event_type, system_payload) = match message.action.as_deref() {
        Some(action) => {
            let (kind, payload) = system_event(action);
            (Some(kind), payload)
        }
        None => (None, BTreeMap::new()),
    };
    let voice_duration = match &message.media {
        Some(Media::Document {
            voice: true,
            duration,
        }) => *duration,
        _ => None,
    };

    MessageView {
        id: message.id,
        sender: message
            .sender_id
            .map_or_else(|| "unknown".to_string(), |id| id.to_string()),
        text: message.text.clone(),
        date: message.date,
        is_outgoing: message.outgoing,
        reactions: reactions.counters,
        my_reactions: reactions.mine,
        can_edit: within_edit_window(message.date, now),
        is_read: message.outgoing && message.id <= store.last_read(user, chat),
        is_pinned: store.pinned(user, chat) == Some(message.id),
        is_system: message.action.is_some(),
        system_event_type,
        system_payload,
        content_type,
        has_downloadable_file,
        reply_to_id: message.reply_to,
        reply_preview: message.reply_to.map(|_| "[reply]".to_string()),
        forwarded_from: message.forwarded_from.clone(),
        scheduled_at: None,
        voice_duration,
        mentions,
        hashtags,
        edit_versions_count: store.edit_version_count(user, chat, message.id),
    }
}

/// Ids of `root` and every message that transitively replies to it, ordered
/// by date. `None` if the root is not among `messages`.
pub fn thread(root: i64, messages: &[ProviderMessage]) -> Option<Vec<&ProviderMessage>> {
    let by_id: HashMap<i64, &ProviderMessage> = messages.iter().map(|m| (m.id, m)).collect();
    by_id.get(&root)?;

    let mut members = BTreeSet::from([root]);
    let mut changed = true;
    while changed {
        changed = false;
        for message in messages {
            if let Some(parent) = message.reply_to {
                if members.contains(&parent) && members.insert(message.id) {
                    changed = true;
                }
            }
        }
    }

    let mut ordered: Vec<&ProviderMessage> =
        members.iter().filter_map(|id| by_id.get(id).copied()).collect();
    ordered.sort_by_key(|m| m.date);
    Some(ordered)
}
