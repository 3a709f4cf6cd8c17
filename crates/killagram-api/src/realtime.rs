use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};

use killagram_gateway::connection;
use killagram_types::api::RealtimeQuery;

use crate::state::AppState;

/// `GET /ws/events?phone=&token=&chat_id=`. The realtime token is checked
/// after the upgrade so rejections carry a close code.
pub async fn ws_events(
    State(app): State<AppState>,
    Query(query): Query<RealtimeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let gateway = app.gateway.clone();
    ws.on_upgrade(move |socket| connection::serve(socket, gateway, query))
}
