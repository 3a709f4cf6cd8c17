use std::collections::HashMap;
use std::sync::Mutex;

use killagram_types::api::SummarizeRequest;
use killagram_types::models::{ConversationId, ProviderMessage};

use crate::lock;

const SUMMARY_CHARS: usize = 300;
const EMPTY_SUMMARY: &str = "Нет данных для суммаризации.";

const REPLIES_RU: [&str; 4] = ["Ок, понял", "Спасибо!", "Сделаю сегодня", "Давайте уточним детали"];
const REPLIES_EN: [&str; 4] = ["Got it", "Thanks!", "I will do it today", "Let’s clarify details"];

/// Summaries per user and conversation, then by request parameters.
/// Conversation ids are only meaningful to their owner, so nothing is
/// shared between users.
#[derive(Default)]
pub struct SummaryCache {
    entries: Mutex<HashMap<(String, ConversationId), HashMap<String, String>>>,
}

/// `<range>:<mode>:<from>:<to>:<limit>`, the parameters that shape a
/// summary of one conversation.
pub fn cache_key(request: &SummarizeRequest) -> String {
    let bound = |id: Option<i64>| id.map(|id| id.to_string()).unwrap_or_default();
    format!(
        "{}:{}:{}:{}:{}",
        request.range,
        request.mode,
        bound(request.from_message_id),
        bound(request.to_message_id),
        request.limit
    )
}

impl SummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: &str, chat: ConversationId, key: &str) -> Option<String> {
        lock(&self.entries)
            .get(&(user.to_string(), chat))
            .and_then(|summaries| summaries.get(key))
            .cloned()
    }

    pub fn put(&self, user: &str, chat: ConversationId, key: &str, summary: &str) {
        lock(&self.entries)
            .entry((user.to_string(), chat))
            .or_default()
            .insert(key.to_string(), summary.to_string());
    }

    /// Forget every cached summary `user` has of `chat`.
    pub fn invalidate(&self, user: &str, chat: ConversationId) {
        lock(&self.entries).remove(&(user.to_string(), chat));
    }
}

/// Extractive summary over the messages inside the requested id bounds.
pub fn summarize(request: &SummarizeRequest, messages: &[ProviderMessage]) -> String {
    let texts: Vec<&str> = messages
        .iter()
        .filter(|m| request.from_message_id.is_none_or(|from| m.id >= from))
        .filter(|m| request.to_message_id.is_none_or(|to| m.id <= to))
        .map(|m| m.text.trim())
        .filter(|text| !text.is_empty())
        .collect();

    let joined = texts.join(" ");
    if joined.is_empty() {
        return EMPTY_SUMMARY.to_string();
    }
    if joined.chars().count() > SUMMARY_CHARS {
        let head: String = joined.chars().take(SUMMARY_CHARS).collect();
        return format!("{head}...");
    }
    joined
}

/// Canned quick replies in the conversation's language.
pub fn smart_replies(messages: &[ProviderMessage]) -> Vec<String> {
    let cyrillic = messages
        .iter()
        .flat_map(|m| m.text.chars())
        .flat_map(char::to_lowercase)
        .any(|c| ('а'..='я').contains(&c));

    let replies = if cyrillic { REPLIES_RU } else { REPLIES_EN };
    replies.iter().map(|r| r.to_string()).collect()
}
