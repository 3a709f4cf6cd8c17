use axum::{Extension, Json, extract::State};
use tracing::debug;

use killagram_provider::MessageQuery;
use killagram_state::summary::{cache_key, smart_replies, summarize};
use killagram_types::api::{
    SmartRepliesRequest, SmartRepliesResponse, SummarizeRequest, SummaryResponse,
};
use killagram_types::error::RateLimit;
use killagram_types::models::ConversationId;

use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Messages read for reply suggestions.
const SMART_REPLY_CONTEXT: usize = 15;

/// Rate limited per user and conversation; premium accounts get a higher
/// limit.
pub async fn summarize_chat(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<SummarizeRequest>,
) -> ApiResult<Json<SummaryResponse>> {
    let account = app.state.accounts.get(&user);
    if !app
        .state
        .ai_limiter
        .check_with_limit(&format!("{user}:{}", req.chat_id), account.ai_summary_limit())
    {
        return Err(RateLimit::AiSummary.into());
    }

    let chat = ConversationId(req.chat_id);
    let key = cache_key(&req);
    if let Some(summary) = app.state.summaries.get(&user, chat, &key) {
        debug!("Summary cache hit {}", key);
        return Ok(Json(SummaryResponse {
            summary,
            cached: true,
        }));
    }

    let conn = app.connect(&user).await?;
    let messages = conn
        .list_messages(chat, MessageQuery::Recent(req.limit))
        .await;
    conn.disconnect().await;
    let mut messages = messages?;
    messages.reverse();

    let summary = summarize(&req, &messages);
    app.state.summaries.put(&user, chat, &key, &summary);
    Ok(Json(SummaryResponse {
        summary,
        cached: false,
    }))
}

pub async fn smart_replies_for(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<SmartRepliesRequest>,
) -> ApiResult<Json<SmartRepliesResponse>> {
    if !app.state.accounts.get(&user).premium {
        return Ok(Json(SmartRepliesResponse {
            replies: Vec::new(),
            available: false,
            reason: Some("PREMIUM_REQUIRED".into()),
        }));
    }

    let conn = app.connect(&user).await?;
    let messages = conn
        .list_messages(
            ConversationId(req.chat_id),
            MessageQuery::Recent(SMART_REPLY_CONTEXT),
        )
        .await;
    conn.disconnect().await;

    Ok(Json(SmartRepliesResponse {
        replies: smart_replies(&messages?),
        available: true,
        reason: None,
    }))
}
