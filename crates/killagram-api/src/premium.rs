use axum::{Extension, Json, extract::State};
use tracing::info;

use killagram_types::api::PremiumStatusResponse;

use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::state::AppState;

pub async fn status(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<PremiumStatusResponse> {
    Json(PremiumStatusResponse::from(&app.state.accounts.get(&user)))
}

pub async fn activate(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> ApiResult<Json<PremiumStatusResponse>> {
    app.active(&user)?;
    let account = app.state.accounts.set_premium(&user, true);
    info!("Premium activated for {}", user);
    Ok(Json(PremiumStatusResponse::from(&account)))
}

pub async fn cancel(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> ApiResult<Json<PremiumStatusResponse>> {
    app.active(&user)?;
    let account = app.state.accounts.set_premium(&user, false);
    info!("Premium cancelled for {}", user);
    Ok(Json(PremiumStatusResponse::from(&account)))
}
