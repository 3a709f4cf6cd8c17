use std::net::SocketAddr;

use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use http_body_util::LengthLimitError;
use tracing::{debug, warn};

use killagram_crypto::token::TokenKind;
use killagram_state::idempotency::{CachedResponse, composite_key};
use killagram_types::CoreError;
use killagram_types::error::RateLimit;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const PHONE_HEADER: &str = "x-phone";
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

/// Largest request body the idempotency layer buffers for signing. Same as
/// axum's default extractor limit.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// The authenticated phone number, inserted by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

pub fn phone_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(PHONE_HEADER).and_then(|v| v.to_str().ok())
}

pub fn idempotency_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|key| !key.is_empty())
}

/// Check the bearer token against the `X-Phone` header.
pub async fn require_auth(
    State(app): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let TypedHeader(Authorization(bearer)) = bearer.map_err(|_| CoreError::AuthFailure)?;
    let phone = phone_header(req.headers())
        .ok_or(CoreError::AuthFailure)?
        .to_string();

    if !app.state.tokens.verify(bearer.token(), &phone, TokenKind::Api) {
        debug!("Rejected token for {}", phone);
        return Err(CoreError::AuthFailure.into());
    }

    req.extensions_mut().insert(AuthUser(phone));
    Ok(next.run(req).await)
}

/// Sliding-window limit per client address.
pub async fn rate_limit(State(app): State<AppState>, req: Request, next: Next) -> ApiResult<Response> {
    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.ip().to_string());

    if !app.state.api_limiter.check(&client) {
        warn!("Rate limit exceeded for {}", client);
        return Err(RateLimit::Api.into());
    }
    Ok(next.run(req).await)
}

/// Replays the stored response of a POST carrying `X-Idempotency-Key`.
///
/// The cache key combines the caller, the client key and a signature over
/// method, path and body, so reusing a key with a different body is a new
/// request. Concurrent duplicates wait on the key lock and then replay.
/// Only successful responses are kept.
pub async fn idempotency(State(app): State<AppState>, req: Request, next: Next) -> ApiResult<Response> {
    if req.method() != Method::POST {
        return Ok(next.run(req).await);
    }
    let Some(client_key) = idempotency_header(req.headers()).map(str::to_owned) else {
        return Ok(next.run(req).await);
    };

    let caller = match req.extensions().get::<AuthUser>() {
        Some(AuthUser(phone)) => phone.clone(),
        None => phone_header(req.headers()).unwrap_or_default().to_string(),
    };

    let (parts, body) = req.into_parts();
    let body = to_bytes(body, MAX_BODY_BYTES).await.map_err(request_body_error)?;
    let signature = app
        .state
        .tokens
        .sign_request(parts.method.as_str(), parts.uri.path(), &body)?;
    let key = composite_key(&format!("{caller}:{client_key}"), &signature);

    let _guard = app.state.idempotency.lock(&key).await;
    if let Some(cached) = app.state.idempotency.get(&key) {
        debug!("Replaying {} {} for {}", parts.method, parts.uri.path(), caller);
        return Ok(replay(cached));
    }

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;
    if response.status().as_u16() >= 400 {
        return Ok(response);
    }

    let (parts, body) = response.into_parts();
    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?;
    app.state.idempotency.put(
        &key,
        CachedResponse {
            status: parts.status.as_u16(),
            body: body.to_vec(),
        },
    );
    Ok(Response::from_parts(parts, Body::from(body)))
}

fn request_body_error(err: axum::Error) -> ApiError {
    let err = err.into_inner();
    if err.is::<LengthLimitError>() {
        ApiError::PayloadTooLarge(MAX_BODY_BYTES)
    } else {
        ApiError::BadRequest(err.to_string())
    }
}

fn replay(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        cached.body,
    )
        .into_response()
}
