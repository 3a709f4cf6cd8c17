use killagram_types::api::SearchMessagesRequest;
use killagram_types::error::{CoreResult, PolicyViolation};
use killagram_types::models::{ContentType, ConversationKind, ProviderMessage};

/// Relevance of `text` for `query`: exact 8, prefix 6, substring 4, all
/// terms present 2, otherwise 0.
pub fn score(text: &str, query: &str) -> u32 {
    let text = text.trim().to_lowercase();
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0;
    }

    if text == query {
        8
    } else if text.starts_with(&query) {
        6
    } else if text.contains(&query) {
        4
    } else if query.split_whitespace().all(|term| text.contains(term)) {
        2
    } else {
        0
    }
}

/// Saved Messages is a private chat, so `saved_only` cannot be combined
/// with any other scope.
pub fn validate(request: &SearchMessagesRequest) -> CoreResult<()> {
    if request.saved_only
        && request
            .chat_scope
            .iter()
            .any(|scope| *scope != ConversationKind::Private)
    {
        return Err(PolicyViolation::InvalidFilterCombination.into());
    }
    Ok(())
}

/// Applies the per-message filters. `content` is the detected content type
/// and downloadability of `message`.
pub fn admits(
    request: &SearchMessagesRequest,
    message: &ProviderMessage,
    content: (ContentType, bool),
    kind: ConversationKind,
) -> bool {
    let (content_type, downloadable) = content;

    if request
        .sender_id
        .is_some_and(|sender| message.sender_id.unwrap_or(0) != sender)
    {
        return false;
    }
    if request
        .has_media
        .is_some_and(|wanted| message.media.is_some() != wanted)
    {
        return false;
    }
    if request
        .has_downloadable_file
        .is_some_and(|wanted| downloadable != wanted)
    {
        return false;
    }
    if !request.content_types.is_empty() && !request.content_types.contains(&content_type) {
        return false;
    }
    request.chat_scope.is_empty() || request.chat_scope.contains(&kind)
}
