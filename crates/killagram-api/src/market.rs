use axum::{
    Extension, Json,
    extract::{Path, State},
    http::HeaderMap,
};
use tracing::info;

use killagram_types::api::{PurchaseRequest, SendGiftRequest, SendGiftResponse, WalletResponse};
use killagram_types::events::RealtimeEvent;
use killagram_types::models::{Gift, MarketItem, Transaction, UserGift};

use crate::error::ApiResult;
use crate::middleware::{AuthUser, idempotency_header};
use crate::state::AppState;

// -- Gifts --

pub async fn gifts(State(app): State<AppState>) -> Json<Vec<Gift>> {
    Json(app.state.market.gifts().to_vec())
}

/// Gives a gift to `to_user_id`, or to the sender when none is named.
/// Premium-only gifts need a premium sender.
pub async fn send_gift(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<SendGiftRequest>,
) -> ApiResult<Json<SendGiftResponse>> {
    let account = app.active(&user)?;
    let owner = req.to_user_id.clone().unwrap_or_else(|| user.clone());
    let gift = app
        .state
        .market
        .give_gift(&req.gift_id, &owner, account.premium)?;

    app.push(
        &owner,
        RealtimeEvent::GiftReceived {
            gift_id: gift.gift_id.clone(),
            from: user.clone(),
        },
    );
    info!("{} sent gift {} to {}", user, req.gift_id, owner);
    Ok(Json(SendGiftResponse {
        status: "sent".into(),
        gift,
    }))
}

pub async fn my_gifts(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<Vec<UserGift>> {
    Json(app.state.market.user_gifts(&user))
}

pub async fn user_gifts(
    State(app): State<AppState>,
    Path(owner): Path<String>,
) -> Json<Vec<UserGift>> {
    Json(app.state.market.user_gifts(&owner))
}

// -- Wallet --

pub async fn balance(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<WalletResponse> {
    Json(WalletResponse {
        stars_balance: app.state.accounts.get(&user).stars_balance,
    })
}

pub async fn transactions(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<Vec<Transaction>> {
    Json(app.state.market.transactions(&user))
}

// -- Market --

pub async fn items(State(app): State<AppState>) -> Json<Vec<MarketItem>> {
    Json(app.state.market.items().to_vec())
}

/// A repeated `X-Idempotency-Key` returns the first transaction without
/// charging again or announcing it twice.
pub async fn purchase(
    State(app): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    headers: HeaderMap,
    Json(req): Json<PurchaseRequest>,
) -> ApiResult<Json<Transaction>> {
    app.active(&user)?;
    let purchase = app
        .state
        .purchase(&user, &req.item_id, req.quantity, idempotency_header(&headers))
        .await?;

    if !purchase.replayed {
        app.push(&user, RealtimeEvent::MarketPurchase(purchase.transaction.clone()));
    }
    Ok(Json(purchase.transaction))
}
