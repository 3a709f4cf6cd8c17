use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use tracing::{info, warn};

use killagram_provider::{MessageQuery, ProviderConnection};
use killagram_state::views::{thread, within_edit_window};
use killagram_types::api::{
    ChatQuery, DeleteBatchRequest, DeleteBatchResponse, DeleteRequest, DeleteResponse,
    EditRequest, EditResponse, ForwardRequest, ForwardResponse, PinRequest, ReactionRequest,
    ReactionResponse,
};
use killagram_types::error::{NotFound, PolicyViolation};
use killagram_types::events::{MessageScope, RealtimeEvent};
use killagram_types::models::{
    ConversationId, EditVersion, MessageView, PinState, ProviderMessage, ReactionState,
};

use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::state::{AppState, AppStateInner};

/// Messages scanned when assembling a reply thread.
const THREAD_SCAN_LIMIT: usize = 300;

async fn require_message(
    conn: &dyn ProviderConnection,
    chat: ConversationId,
    message_id: i64,
) -> ApiResult<ProviderMessage> {
    Ok(conn
        .message(chat, message_id)
        .await?
        .ok_or(NotFound::Message)?)
}

// -- Pins --

pub async fn pin(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(message_id): Path<i64>,
    Json(req): Json<PinRequest>,
) -> ApiResult<Json<PinState>> {
    app.active(&user)?;
    let chat = ConversationId(req.chat_id);

    let conn = app.connect(&user).await?;
    let found = require_message(conn.as_ref(), chat, message_id).await;
    conn.disconnect().await;
    found?;

    let pin = app.state.conversations.set_pinned(&user, chat, message_id);
    app.push(&user, RealtimeEvent::PinUpdated(pin.clone()));
    Ok(Json(pin))
}

/// Only unpins when `message_id` is the pinned message.
pub async fn unpin(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(message_id): Path<i64>,
    Json(req): Json<PinRequest>,
) -> ApiResult<Json<PinState>> {
    app.active(&user)?;
    let pin = app.state.conversations.clear_pinned(
        &user,
        ConversationId(req.chat_id),
        Some(message_id),
    );
    app.push(&user, RealtimeEvent::PinUpdated(pin.clone()));
    Ok(Json(pin))
}

// -- Reactions --

pub async fn add_reaction(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(message_id): Path<i64>,
    Json(req): Json<ReactionRequest>,
) -> Json<ReactionResponse> {
    let chat = ConversationId(req.chat_id);
    let state = app
        .state
        .conversations
        .add_reaction(&user, chat, message_id, &req.emoji);
    Json(reaction_changed(&app, &user, chat, message_id, state))
}

pub async fn remove_reaction(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(message_id): Path<i64>,
    Json(req): Json<ReactionRequest>,
) -> Json<ReactionResponse> {
    let chat = ConversationId(req.chat_id);
    let state = app
        .state
        .conversations
        .remove_reaction(&user, chat, message_id, &req.emoji);
    Json(reaction_changed(&app, &user, chat, message_id, state))
}

fn reaction_changed(
    app: &AppStateInner,
    user: &str,
    chat: ConversationId,
    message_id: i64,
    state: ReactionState,
) -> ReactionResponse {
    app.push(
        user,
        RealtimeEvent::ReactionUpdated {
            chat_id: chat,
            message_id,
            reactions: state.counters.clone(),
            mine: state.mine.clone(),
        },
    );
    ReactionResponse {
        chat_id: chat,
        message_id,
        reactions: state.counters,
        mine: state.mine,
    }
}

// -- Forwarding --

pub async fn forward(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<ForwardRequest>,
) -> ApiResult<Json<ForwardResponse>> {
    app.active(&user)?;
    let conn = app.connect(&user).await?;
    let forwarded = forward_all(&app, &user, conn.as_ref(), &req).await;
    conn.disconnect().await;

    Ok(Json(ForwardResponse {
        status: "forwarded".into(),
        count: forwarded?,
    }))
}

/// Copies each message into each target. Messages the source chat does
/// not have are skipped.
async fn forward_all(
    app: &AppStateInner,
    user: &str,
    conn: &dyn ProviderConnection,
    req: &ForwardRequest,
) -> ApiResult<usize> {
    let mut count = 0;
    for &target in &req.target_chat_ids {
        let target = ConversationId(target);
        let source = req.from_chat_id.map_or(target, ConversationId);

        for &message_id in &req.message_ids {
            let Some(original) = conn.message(source, message_id).await? else {
                warn!("Forward of {} from {} skipped: not found", message_id, source);
                continue;
            };
            let body = match original.text.trim() {
                "" => "[forwarded]",
                text => text,
            };
            let sent = conn.send_message(target, body, None).await?;

            let mut view = app.state.message_view(user, &sent);
            view.forwarded_from = Some(
                original
                    .sender_id
                    .map_or_else(|| source.to_string(), |id| id.to_string()),
            );
            app.push(
                user,
                RealtimeEvent::MessageCreated {
                    chat_id: target,
                    scope: MessageScope::Forward,
                    message: view,
                },
            );
            count += 1;
        }
        app.state.summaries.invalidate(user, target);
    }
    Ok(count)
}

// -- Edit & delete --

/// Edits within the edit window. The replaced text goes to the edit history.
pub async fn edit(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(message_id): Path<i64>,
    Json(req): Json<EditRequest>,
) -> ApiResult<Json<EditResponse>> {
    app.active(&user)?;
    let chat = ConversationId(req.chat_id);

    let conn = app.connect(&user).await?;
    let edited = edit_message(conn.as_ref(), chat, message_id, &req.text).await;
    conn.disconnect().await;
    let (previous, edited) = edited?;

    app.state
        .conversations
        .append_edit_version(&user, chat, message_id, &previous.text, previous.date);
    app.state.summaries.invalidate(&user, chat);

    let view = app.state.message_view(&user, &edited);
    app.push(
        &user,
        RealtimeEvent::MessageEdited {
            chat_id: chat,
            message: view.clone(),
        },
    );
    Ok(Json(EditResponse {
        status: "edited".into(),
        message: view,
    }))
}

async fn edit_message(
    conn: &dyn ProviderConnection,
    chat: ConversationId,
    message_id: i64,
    text: &str,
) -> ApiResult<(ProviderMessage, ProviderMessage)> {
    let previous = require_message(conn, chat, message_id).await?;
    if !within_edit_window(previous.date, Utc::now()) {
        return Err(PolicyViolation::EditWindowExpired.into());
    }
    let edited = conn.edit_message(chat, message_id, text).await?;
    Ok((previous, edited))
}

pub async fn delete(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(message_id): Path<i64>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<Json<DeleteResponse>> {
    app.active(&user)?;
    let chat = ConversationId(req.chat_id);

    let conn = app.connect(&user).await?;
    let deleted = delete_message(conn.as_ref(), chat, message_id).await;
    conn.disconnect().await;
    deleted?;

    message_removed(&app, &user, chat, message_id);
    Ok(Json(DeleteResponse {
        status: "deleted".into(),
        chat_id: chat,
        message_id,
    }))
}

async fn delete_message(
    conn: &dyn ProviderConnection,
    chat: ConversationId,
    message_id: i64,
) -> ApiResult<()> {
    let message = require_message(conn, chat, message_id).await?;
    if !within_edit_window(message.date, Utc::now()) {
        return Err(PolicyViolation::DeleteWindowExpired.into());
    }
    conn.delete_messages(chat, &[message_id]).await?;
    Ok(())
}

/// Deletes what it can; missing or expired messages are left out of the
/// response.
pub async fn delete_batch(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<DeleteBatchRequest>,
) -> ApiResult<Json<DeleteBatchResponse>> {
    app.active(&user)?;
    let chat = ConversationId(req.chat_id);

    let conn = app.connect(&user).await?;
    let deleted = delete_each(conn.as_ref(), chat, &req.message_ids).await;
    conn.disconnect().await;
    let deleted = deleted?;

    for &message_id in &deleted {
        message_removed(&app, &user, chat, message_id);
    }
    info!("{} deleted {} messages in {}", user, deleted.len(), chat);
    Ok(Json(DeleteBatchResponse {
        status: "deleted".into(),
        message_ids: deleted,
    }))
}

async fn delete_each(
    conn: &dyn ProviderConnection,
    chat: ConversationId,
    message_ids: &[i64],
) -> ApiResult<Vec<i64>> {
    let now = Utc::now();
    let mut deletable = Vec::new();
    for &message_id in message_ids {
        match conn.message(chat, message_id).await? {
            Some(message) if within_edit_window(message.date, now) => deletable.push(message_id),
            _ => {}
        }
    }
    if !deletable.is_empty() {
        conn.delete_messages(chat, &deletable).await?;
    }
    Ok(deletable)
}

/// A deleted message that was pinned takes the pin with it.
fn message_removed(app: &AppStateInner, user: &str, chat: ConversationId, message_id: i64) {
    app.state.summaries.invalidate(user, chat);
    app.push(
        user,
        RealtimeEvent::MessageDeleted {
            chat_id: chat,
            message_id,
        },
    );
    if app.state.conversations.pinned(user, chat) == Some(message_id) {
        let pin = app
            .state
            .conversations
            .clear_pinned(user, chat, Some(message_id));
        app.push(user, RealtimeEvent::PinUpdated(pin));
    }
}

// -- History & threads --

pub async fn history(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(message_id): Path<i64>,
    Query(query): Query<ChatQuery>,
) -> Json<Vec<EditVersion>> {
    Json(
        app.state
            .conversations
            .edit_history(&user, ConversationId(query.chat_id), message_id),
    )
}

/// The message and every reply below it, oldest first.
pub async fn thread_messages(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(message_id): Path<i64>,
    Query(query): Query<ChatQuery>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let conn = app.connect(&user).await?;
    let messages = conn
        .list_messages(
            ConversationId(query.chat_id),
            MessageQuery::Recent(THREAD_SCAN_LIMIT),
        )
        .await;
    conn.disconnect().await;
    let messages = messages?;

    let members = thread(message_id, &messages).ok_or(NotFound::Message)?;
    Ok(Json(
        members
            .into_iter()
            .map(|message| app.state.message_view(&user, message))
            .collect(),
    ))
}
