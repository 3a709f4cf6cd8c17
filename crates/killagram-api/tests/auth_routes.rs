mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{ADMIN_KEY, Session, TestApp, test_state};
use killagram_crypto::token::TokenKind;
use killagram_provider::memory::LOGIN_CODE;

const PHONE: &str = "+15550100";

#[tokio::test]
async fn login_then_me() {
    let t = TestApp::new();
    let session = t.login(PHONE).await;

    let (status, me) = t.get(&session, "/me").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["phone"], PHONE);
    assert_eq!(me["status"], "active");
    assert_eq!(me["stars_balance"], 100);
}

#[tokio::test]
async fn bad_credentials_are_rejected() {
    let t = TestApp::new();
    let session = t.login(PHONE).await;

    let forged = Session {
        phone: PHONE.into(),
        token: "not-a-token".into(),
    };
    let (status, body) = t.get(&forged, "/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");

    // A valid token presented for another phone
    let other = Session {
        phone: "+15550199".into(),
        token: session.token.clone(),
    };
    assert_eq!(t.get(&other, "/me").await.0, StatusCode::UNAUTHORIZED);

    let (status, _) = t.send(Method::GET, "/me", None, &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_code_fails() {
    let t = TestApp::new();
    let (status, body) = t
        .send(
            Method::POST,
            "/auth/confirm",
            None,
            &[],
            Some(json!({ "phone": PHONE, "code": "00000" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn two_factor_needs_the_password() {
    let t = TestApp::new();
    t.provider.set_password(PHONE, "hunter2");

    let (status, body) = t
        .send(
            Method::POST,
            "/auth/confirm",
            None,
            &[],
            Some(json!({ "phone": PHONE, "code": LOGIN_CODE })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "PASSWORD_REQUIRED");

    let (status, body) = t
        .send(
            Method::POST,
            "/auth/confirm",
            None,
            &[],
            Some(json!({ "phone": PHONE, "code": LOGIN_CODE, "password": "hunter2" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "authorized");
}

#[tokio::test]
async fn realtime_token_is_separate_from_api_token() {
    let t = TestApp::new();
    let session = t.login(PHONE).await;

    let (status, body) = t.post(&session, "/auth/ws-token", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expires_in_seconds"], 60);

    let ws_token = body["ws_token"].as_str().unwrap();
    let tokens = &t.app.state.tokens;
    assert!(tokens.verify(ws_token, PHONE, TokenKind::Realtime));
    assert!(!tokens.verify(ws_token, PHONE, TokenKind::Api));

    let realtime_as_api = Session {
        phone: PHONE.into(),
        token: ws_token.into(),
    };
    assert_eq!(t.get(&realtime_as_api, "/me").await.0, StatusCode::UNAUTHORIZED);
}

async fn admin(t: &TestApp, path: &str, key: Option<&str>, body: serde_json::Value) -> StatusCode {
    let headers: Vec<(&str, &str)> = key.map(|k| ("x-admin-key", k)).into_iter().collect();
    t.send(Method::POST, path, None, &headers, Some(body)).await.0
}

#[tokio::test]
async fn freeze_needs_the_admin_key() {
    let t = TestApp::new();
    let body = json!({ "phone": PHONE, "reason": "spam" });
    assert_eq!(admin(&t, "/auth/freeze", None, body.clone()).await, StatusCode::UNAUTHORIZED);
    let prefix = &ADMIN_KEY[..ADMIN_KEY.len() - 1];
    let longer = format!("{ADMIN_KEY}x");
    for key in ["guess", "", prefix, longer.as_str()] {
        assert_eq!(
            admin(&t, "/auth/freeze", Some(key), body.clone()).await,
            StatusCode::UNAUTHORIZED,
            "{key:?}"
        );
    }
    assert!(!t.app.state.accounts.get(PHONE).is_frozen());
}

#[tokio::test]
async fn freeze_revokes_tokens_and_blocks_mutations() {
    let t = TestApp::new();
    let old = t.login(PHONE).await;
    t.drain(PHONE);

    let status = admin(
        &t,
        "/auth/freeze",
        Some(ADMIN_KEY),
        json!({ "phone": PHONE, "reason": "spam" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.event_types(PHONE), ["account_status_updated"]);
    assert_eq!(t.get(&old, "/me").await.0, StatusCode::UNAUTHORIZED);

    // Frozen accounts can still sign in, read and appeal
    let session = t.confirm(PHONE).await;
    let (_, me) = t.get(&session, "/me").await;
    assert_eq!(me["status"], "frozen");
    assert_eq!(me["freeze_reason"], "spam");

    let (status, body) = t.post(&session, "/premium/activate", json!({})).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["error"], "ACCOUNT_FROZEN");
    assert_eq!(body["reason"], "spam");

    let (status, _) = t
        .post(&session, "/auth/appeal-freeze", json!({ "text": "not spam" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, appeals) = t.get(&session, "/auth/appeals/me").await;
    assert_eq!(appeals.as_array().unwrap().len(), 1);
    assert_eq!(appeals[0]["text"], "not spam");

    let status = admin(&t, "/auth/unfreeze", Some(ADMIN_KEY), json!({ "phone": PHONE })).await;
    assert_eq!(status, StatusCode::OK);
    let session = t.confirm(PHONE).await;
    let (status, body) = t.post(&session, "/premium/activate", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["premium"], true);
    assert_eq!(body["features"]["ai_summary_limit_per_minute"], 24);
}

#[tokio::test]
async fn rate_limit_applies_per_address() {
    let t = TestApp::with_state(test_state(3));
    let session = t.login(PHONE).await;

    assert_eq!(t.get(&session, "/me").await.0, StatusCode::OK);
    assert_eq!(t.get(&session, "/me").await.0, StatusCode::OK);
    let (status, body) = t.get(&session, "/me").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RATE_LIMIT_EXCEEDED");
}
