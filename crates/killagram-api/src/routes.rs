use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};

use crate::middleware::{idempotency, rate_limit, require_auth};
use crate::state::AppState;
use crate::{ai, auth, chats, folders, market, messages, premium, realtime, search};

/// Every HTTP and realtime route. Tracing and CORS layers are added by the
/// binary.
pub fn router(app: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/request-code", post(auth::request_code))
        .route("/auth/confirm", post(auth::confirm))
        .route("/auth/freeze", post(auth::freeze))
        .route("/auth/unfreeze", post(auth::unfreeze))
        .layer(from_fn_with_state(app.clone(), idempotency));

    let protected_routes = Router::new()
        // -- Account --
        .route("/auth/ws-token", post(auth::realtime_token))
        .route("/auth/appeal-freeze", post(auth::create_appeal))
        .route("/auth/appeals/me", get(auth::list_appeals))
        .route("/me", get(auth::me))
        .route("/premium/status", get(premium::status))
        .route("/premium/activate", post(premium::activate))
        .route("/premium/cancel", post(premium::cancel))
        // -- Folders --
        .route("/folders", get(folders::list).post(folders::create))
        .route(
            "/folders/{folder_id}",
            put(folders::update).delete(folders::delete),
        )
        .route("/folders/{folder_id}/chats", get(folders::chats))
        // -- Chats --
        .route("/chats", get(chats::list_chats))
        .route("/chats/saved", get(chats::saved_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(chats::list_messages).post(chats::send_message),
        )
        .route(
            "/chats/{chat_id}/draft",
            get(chats::get_draft).post(chats::set_draft),
        )
        .route("/chats/{chat_id}/read", post(chats::mark_read))
        .route("/chats/{chat_id}/typing/start", post(chats::typing_start))
        .route("/chats/{chat_id}/typing/stop", post(chats::typing_stop))
        // -- Messages --
        .route("/messages/send", post(chats::send_saved))
        .route("/messages/forward", post(messages::forward))
        .route("/messages/delete-batch", post(messages::delete_batch))
        .route("/messages/{message_id}/pin", post(messages::pin))
        .route("/messages/{message_id}/unpin", post(messages::unpin))
        .route("/messages/{message_id}/reactions/add", post(messages::add_reaction))
        .route(
            "/messages/{message_id}/reactions/remove",
            post(messages::remove_reaction),
        )
        .route("/messages/{message_id}/edit", post(messages::edit))
        .route("/messages/{message_id}/delete", post(messages::delete))
        .route("/messages/{message_id}/history", get(messages::history))
        .route("/messages/{message_id}/thread", get(messages::thread_messages))
        // -- AI --
        .route("/ai/summarize", post(ai::summarize_chat))
        .route("/ai/smart-replies", post(ai::smart_replies_for))
        // -- Gifts & market --
        .route("/gifts", get(market::gifts))
        .route("/gifts/send", post(market::send_gift))
        .route("/gifts/my", get(market::my_gifts))
        .route("/users/{user_id}/gifts", get(market::user_gifts))
        .route("/wallet/balance", get(market::balance))
        .route("/wallet/transactions", get(market::transactions))
        .route("/market/items", get(market::items))
        .route("/market/purchase", post(market::purchase))
        // -- Search --
        .route("/search/messages", post(search::search_messages))
        .route("/search", get(search::search_chats))
        .layer(from_fn_with_state(app.clone(), idempotency))
        .layer(from_fn_with_state(app.clone(), require_auth));

    let ws_route = Router::new().route("/ws/events", get(realtime::ws_events));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(from_fn_with_state(app.clone(), rate_limit))
        .with_state(app)
}
