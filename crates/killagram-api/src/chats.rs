use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::Utc;
use tracing::{debug, info};

use killagram_provider::MessageQuery;
use killagram_state::views::{chat_summary, reply_preview};
use killagram_types::api::{
    DraftRequest, DraftResponse, ReadReceiptRequest, SavedMessageRequest, SendOutcome,
};
use killagram_types::events::{MessageScope, RealtimeEvent};
use killagram_types::models::{
    ChatSummary, ConversationId, MessageView, OutgoingMessage, ReadReceipt, TypingState,
};

use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::state::AppState;

const CHAT_LIST_LIMIT: usize = 50;
const MESSAGE_PAGE_LIMIT: usize = 50;

// -- Listing --

/// Saved Messages first, then the provider's conversations.
pub async fn list_chats(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ChatSummary>>> {
    let conn = app.connect(&user).await?;
    let conversations = conn.list_conversations(CHAT_LIST_LIMIT).await;
    conn.disconnect().await;

    let mut chats = vec![ChatSummary::saved_messages()];
    chats.extend(conversations?.iter().map(chat_summary));
    Ok(Json(chats))
}

pub async fn saved_chat() -> Json<ChatSummary> {
    Json(ChatSummary::saved_messages())
}

pub async fn list_messages(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(chat_id): Path<i64>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let conn = app.connect(&user).await?;
    let messages = conn
        .list_messages(ConversationId(chat_id), MessageQuery::Recent(MESSAGE_PAGE_LIMIT))
        .await;
    conn.disconnect().await;

    let views = messages?
        .iter()
        .map(|message| app.state.message_view(&user, message))
        .collect();
    Ok(Json(views))
}

// -- Sending --

pub async fn send_message(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(chat_id): Path<i64>,
    Json(msg): Json<OutgoingMessage>,
) -> ApiResult<Json<SendOutcome>> {
    app.active(&user)?;
    Ok(Json(deliver(&app, &user, ConversationId(chat_id), msg).await?))
}

/// Send to the caller's Saved Messages.
pub async fn send_saved(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<SavedMessageRequest>,
) -> ApiResult<Json<SendOutcome>> {
    app.active(&user)?;
    let msg = OutgoingMessage {
        text: req.text,
        ..OutgoingMessage::default()
    };
    Ok(Json(deliver(&app, &user, ConversationId::SAVED, msg).await?))
}

/// Schedules a send with a future `send_at`, otherwise sends now.
///
/// A repeated `client_message_id` for the same conversation returns the
/// first send's message without contacting the provider again.
async fn deliver(
    app: &AppState,
    user: &str,
    chat: ConversationId,
    msg: OutgoingMessage,
) -> ApiResult<SendOutcome> {
    if let Some(send_at) = msg.send_at.filter(|at| *at > Utc::now()) {
        let entry = app.state.scheduled.enqueue(user, chat, msg, send_at);
        info!("Scheduled {} for {} in {} at {}", entry.id, user, chat, send_at);
        return Ok(SendOutcome::Scheduled {
            scheduled_id: entry.id,
            send_at,
        });
    }

    let Some(client_id) = msg.client_message_id.clone() else {
        let message = send_now(app, user, chat, &msg).await?;
        return Ok(SendOutcome::Sent {
            message,
            idempotent: false,
        });
    };

    let _guard = app
        .state
        .idempotency
        .lock(&format!("send:{user}:{chat}:{client_id}"))
        .await;
    if let Some(message) = app.state.idempotency.sent_message(user, chat, &client_id) {
        debug!("Client message {} already sent by {}", client_id, user);
        return Ok(SendOutcome::Sent {
            message,
            idempotent: true,
        });
    }

    let message = send_now(app, user, chat, &msg).await?;
    app.state
        .idempotency
        .record_sent_message(user, chat, &client_id, message.clone());
    Ok(SendOutcome::Sent {
        message,
        idempotent: false,
    })
}

async fn send_now(
    app: &AppState,
    user: &str,
    chat: ConversationId,
    msg: &OutgoingMessage,
) -> ApiResult<MessageView> {
    let conn = app.connect(user).await?;
    let sent = conn.send_message(chat, &msg.body(), msg.reply_to_id).await;
    let replied = match (&sent, msg.reply_to_id) {
        (Ok(_), Some(id)) => conn.message(chat, id).await.ok().flatten(),
        _ => None,
    };
    conn.disconnect().await;
    let sent = sent?;

    let mut view = app.state.message_view(user, &sent);
    view.content_type = msg.content_type.into();
    view.voice_duration = msg.voice_duration;
    if let Some(replied) = &replied {
        view.reply_preview = Some(reply_preview(replied));
    }
    if !msg.mentions.is_empty() {
        view.mentions = msg.mentions.clone();
    }
    if !msg.hashtags.is_empty() {
        view.hashtags = msg.hashtags.clone();
    }

    app.state.summaries.invalidate(user, chat);
    app.push(
        user,
        RealtimeEvent::MessageCreated {
            chat_id: chat,
            scope: MessageScope::User,
            message: view.clone(),
        },
    );
    Ok(view)
}

// -- Drafts --

pub async fn get_draft(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(chat_id): Path<i64>,
) -> Json<DraftResponse> {
    let text = app.state.conversations.draft(&user, ConversationId(chat_id));
    Json(DraftResponse { chat_id, text })
}

pub async fn set_draft(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(chat_id): Path<i64>,
    Json(req): Json<DraftRequest>,
) -> Json<DraftResponse> {
    let draft = app
        .state
        .conversations
        .set_draft(&user, ConversationId(chat_id), &req.text);
    app.push(&user, RealtimeEvent::DraftUpdated(draft));
    Json(DraftResponse {
        chat_id,
        text: req.text,
    })
}

// -- Read receipts & typing --

pub async fn mark_read(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(chat_id): Path<i64>,
    Json(req): Json<ReadReceiptRequest>,
) -> Json<ReadReceipt> {
    let receipt = app
        .state
        .conversations
        .set_last_read(&user, ConversationId(chat_id), req.last_message_id);
    app.push(&user, RealtimeEvent::ReadReceiptUpdated(receipt.clone()));
    Json(receipt)
}

pub async fn typing_start(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(chat_id): Path<i64>,
) -> Json<TypingState> {
    Json(set_typing(&app, &user, chat_id, true))
}

pub async fn typing_stop(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(chat_id): Path<i64>,
) -> Json<TypingState> {
    Json(set_typing(&app, &user, chat_id, false))
}

fn set_typing(app: &AppState, user: &str, chat_id: i64, is_typing: bool) -> TypingState {
    let typing = app
        .state
        .conversations
        .set_typing(user, ConversationId(chat_id), is_typing);
    app.push(user, RealtimeEvent::TypingUpdated(typing.clone()));
    typing
}
