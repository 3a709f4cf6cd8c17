use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Query, State},
};

use killagram_provider::{MessageQuery, ProviderConnection, ProviderError};
use killagram_state::folders::filter_conversations;
use killagram_state::search::{admits, score, validate};
use killagram_state::views::detect_content;
use killagram_types::api::{
    SearchMessageHit, SearchMessagesRequest, SearchMessagesResponse, SearchQuery, SearchResult,
};
use killagram_types::models::{ConversationId, ConversationKind, ConversationSummary};

use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::state::{AppState, AppStateInner};

const CONVERSATION_SCAN_LIMIT: usize = 200;
const MESSAGES_PER_CHAT: usize = 100;
const CHAT_SEARCH_SCAN_LIMIT: usize = 100;
const CHAT_SEARCH_RESULTS: usize = 50;

/// Full-text search over recent messages, ranked by score then id.
pub async fn search_messages(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<SearchMessagesRequest>,
) -> ApiResult<Json<SearchMessagesResponse>> {
    validate(&req)?;

    let conn = app.connect(&user).await?;
    let hits = collect_hits(&app, &user, conn.as_ref(), &req).await;
    conn.disconnect().await;
    let mut hits = hits?;

    hits.sort_by(|(a, a_hit), (b, b_hit)| (b, b_hit.message.id).cmp(&(a, a_hit.message.id)));
    let total_count = hits.len();
    let items = hits
        .into_iter()
        .skip(req.offset)
        .take(req.limit)
        .map(|(_, hit)| hit)
        .collect();

    Ok(Json(SearchMessagesResponse { items, total_count }))
}

async fn collect_hits(
    app: &AppStateInner,
    user: &str,
    conn: &dyn ProviderConnection,
    req: &SearchMessagesRequest,
) -> ApiResult<Vec<(u32, SearchMessageHit)>> {
    let conversations = conn.list_conversations(CONVERSATION_SCAN_LIMIT).await?;
    let by_id: HashMap<ConversationId, &ConversationSummary> =
        conversations.iter().map(|c| (c.id, c)).collect();

    let targets: Vec<ConversationId> = if req.saved_only {
        vec![ConversationId::SAVED]
    } else if let Some(chat_id) = req.chat_id {
        vec![ConversationId(chat_id)]
    } else if let Some(folder_id) = &req.folder_id {
        let folder = app.state.folders.get(user, folder_id)?;
        filter_conversations(&folder, &conversations)
            .into_iter()
            .map(|chat| ConversationId(chat.id))
            .collect()
    } else {
        std::iter::once(ConversationId::SAVED)
            .chain(conversations.iter().map(|c| c.id))
            .collect()
    };

    let mut hits = Vec::new();
    for chat in targets {
        let messages = match conn
            .list_messages(chat, MessageQuery::Recent(MESSAGES_PER_CHAT))
            .await
        {
            Ok(messages) => messages,
            Err(ProviderError::NotFound) => continue,
            Err(e) => return Err(e.into()),
        };

        let conversation = by_id.get(&chat);
        let kind = match conversation {
            Some(c) if !chat.is_saved() => c.kind,
            _ => ConversationKind::Private,
        };
        let title = if chat.is_saved() {
            "Saved Messages".to_string()
        } else {
            conversation.map(|c| c.title.clone()).unwrap_or_default()
        };

        for message in &messages {
            let relevance = score(&message.text, &req.query);
            if relevance == 0 {
                continue;
            }
            let content = detect_content(message);
            if !admits(req, message, content, kind) {
                continue;
            }
            hits.push((
                relevance,
                SearchMessageHit {
                    message: app.state.message_view(user, message),
                    chat_title: title.clone(),
                    chat_id: chat,
                    chat_type: kind,
                },
            ));
        }
    }
    Ok(hits)
}

/// Conversations whose title contains `q`, restricted to one scope.
pub async fn search_chats(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    let conn = app.connect(&user).await?;
    let conversations = conn.list_conversations(CHAT_SEARCH_SCAN_LIMIT).await;
    conn.disconnect().await;

    let needle = query.q.trim().to_lowercase();
    let results = conversations?
        .into_iter()
        .filter(|c| !c.title.trim().is_empty())
        .filter(|c| needle.is_empty() || c.title.to_lowercase().contains(&needle))
        .filter(|c| query.scope.admits(c.kind))
        .take(CHAT_SEARCH_RESULTS)
        .map(|c| SearchResult {
            id: c.id.to_string(),
            title: c.title.trim().to_string(),
            scope: query.scope,
            snippet: c.last_message.unwrap_or_default(),
        })
        .collect();
    Ok(Json(results))
}
