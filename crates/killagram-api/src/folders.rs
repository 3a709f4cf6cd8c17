use axum::{
    Extension, Json,
    extract::{Path, State},
};

use killagram_state::folders::filter_conversations;
use killagram_types::api::{FolderDeletedResponse, FolderRequest};
use killagram_types::events::{FolderChange, RealtimeEvent};
use killagram_types::models::{ChatSummary, Folder};

use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Conversations fetched when resolving a folder.
const FOLDER_SCAN_LIMIT: usize = 200;

pub async fn list(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<Vec<Folder>> {
    Json(app.state.folders.list(&user))
}

pub async fn create(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<FolderRequest>,
) -> ApiResult<Json<Folder>> {
    let account = app.active(&user)?;
    let folder = app.state.folders.create(&user, req, account.premium)?;
    app.push(
        &user,
        RealtimeEvent::FolderUpdated(FolderChange::Created {
            folder: folder.clone(),
        }),
    );
    Ok(Json(folder))
}

pub async fn update(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(folder_id): Path<String>,
    Json(req): Json<FolderRequest>,
) -> ApiResult<Json<Folder>> {
    let account = app.active(&user)?;
    let folder = app
        .state
        .folders
        .update(&user, &folder_id, req, account.premium)?;
    app.push(
        &user,
        RealtimeEvent::FolderUpdated(FolderChange::Updated {
            folder: folder.clone(),
        }),
    );
    Ok(Json(folder))
}

pub async fn delete(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(folder_id): Path<String>,
) -> ApiResult<Json<FolderDeletedResponse>> {
    app.active(&user)?;
    app.state.folders.delete(&user, &folder_id)?;
    app.push(
        &user,
        RealtimeEvent::FolderUpdated(FolderChange::Deleted {
            folder_id: folder_id.clone(),
        }),
    );
    Ok(Json(FolderDeletedResponse {
        status: "deleted".into(),
        folder_id,
    }))
}

pub async fn chats(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(folder_id): Path<String>,
) -> ApiResult<Json<Vec<ChatSummary>>> {
    let folder = app.state.folders.get(&user, &folder_id)?;
    let conn = app.connect(&user).await?;
    let conversations = conn.list_conversations(FOLDER_SCAN_LIMIT).await;
    conn.disconnect().await;
    Ok(Json(filter_conversations(&folder, &conversations?)))
}
