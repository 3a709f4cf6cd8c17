use axum::{
    Extension, Json,
    extract::State,
    http::HeaderMap,
};
use serde_json::{Value, json};
use tracing::info;

use killagram_crypto::signature::secrets_match;
use killagram_crypto::token::TokenKind;
use killagram_gateway::sync_loop::CloseReason;
use killagram_provider::Credential;
use killagram_types::CoreError;
use killagram_types::api::{
    AppealRequest, ConfirmCodeRequest, ConfirmCodeResponse, FreezeRequest, MeResponse,
    RealtimeTokenResponse, RequestCodeRequest, UnfreezeRequest,
};
use killagram_types::events::RealtimeEvent;
use killagram_types::models::{Account, Appeal};

use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::state::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

// -- Login --

pub async fn request_code(
    State(app): State<AppState>,
    Json(req): Json<RequestCodeRequest>,
) -> ApiResult<Json<Value>> {
    app.provider.request_code(&req.phone).await?;
    info!("Login code requested for {}", req.phone);
    Ok(Json(json!({ "status": "code_sent" })))
}

/// Completes the provider login, stores the provider session and issues an
/// API token. Frozen accounts still log in so they can read their status
/// and file appeals.
pub async fn confirm(
    State(app): State<AppState>,
    Json(req): Json<ConfirmCodeRequest>,
) -> ApiResult<Json<ConfirmCodeResponse>> {
    let credential = app
        .provider
        .sign_in(&req.phone, &req.code, req.password.as_deref())
        .await?;
    save_credential(&app, &req.phone, credential).await?;

    let token = app.state.tokens.issue(&req.phone)?;
    let account = app.state.accounts.get(&req.phone);
    info!("{} signed in", req.phone);

    Ok(Json(ConfirmCodeResponse {
        status: "authorized".into(),
        token,
        account_status: account.status,
        freeze_reason: account.freeze_reason,
    }))
}

async fn save_credential(app: &AppState, phone: &str, credential: Credential) -> ApiResult<()> {
    let store = app.credentials.clone();
    let phone = phone.to_string();
    tokio::task::spawn_blocking(move || store.save(&phone, &credential))
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?
        .map_err(|e| CoreError::Internal(e.to_string()))?;
    Ok(())
}

pub async fn realtime_token(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> ApiResult<Json<RealtimeTokenResponse>> {
    Ok(Json(RealtimeTokenResponse {
        ws_token: app.state.tokens.issue_realtime(&user)?,
        expires_in_seconds: TokenKind::Realtime.ttl_secs().unsigned_abs(),
    }))
}

pub async fn me(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<MeResponse> {
    Json(MeResponse::from(&app.state.accounts.get(&user)))
}

// -- Freeze --

fn require_admin(app: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let given = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
    match (&app.admin_key, given) {
        (Some(expected), Some(given)) if secrets_match(expected.as_bytes(), given.as_bytes()) => Ok(()),
        _ => Err(CoreError::AuthFailure.into()),
    }
}

/// Freezing revokes every token and ends the realtime channel.
pub async fn freeze(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FreezeRequest>,
) -> ApiResult<Json<Value>> {
    require_admin(&app, &headers)?;
    let account = app.state.accounts.freeze(&req.phone, &req.reason);
    status_changed(&app, &account).await?;
    info!("Froze {}: {}", req.phone, req.reason);
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn unfreeze(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UnfreezeRequest>,
) -> ApiResult<Json<Value>> {
    require_admin(&app, &headers)?;
    let account = app.state.accounts.unfreeze(&req.phone);
    status_changed(&app, &account).await?;
    info!("Unfroze {}", req.phone);
    Ok(Json(json!({ "status": "ok" })))
}

/// Runs in full even when the new version could not be persisted. That
/// failure is reported afterwards.
async fn status_changed(app: &AppState, account: &Account) -> ApiResult<()> {
    let bumped = app.state.tokens.bump_version(&account.phone).await;
    app.push(
        &account.phone,
        RealtimeEvent::AccountStatusUpdated {
            status: account.status,
            freeze_reason: account.freeze_reason.clone(),
        },
    );
    app.gateway
        .registry()
        .close_user(&account.phone, CloseReason::Revoked)
        .await;
    bumped?;
    Ok(())
}

// -- Appeals --

pub async fn create_appeal(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<AppealRequest>,
) -> Json<Appeal> {
    Json(app.state.accounts.add_appeal(&user, &req.text))
}

pub async fn list_appeals(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<Vec<Appeal>> {
    Json(app.state.accounts.appeals(&user))
}
