#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use killagram_api::{AppState, AppStateInner, router};
use killagram_provider::{CredentialStore, MemoryCredentialStore, MemoryProvider, memory::LOGIN_CODE};
use killagram_state::{State, StateConfig};
use killagram_types::events::EventEnvelope;
use killagram_types::models::{ConversationId, ConversationKind, ConversationSummary};

pub const ADMIN_KEY: &str = "test-admin-key";
pub const ALICE_CHAT: i64 = 10;
pub const NEWS_CHAT: i64 = 11;

pub struct TestApp {
    pub router: Router,
    pub app: AppState,
    pub provider: MemoryProvider,
}

/// A signed-in user.
pub struct Session {
    pub phone: String,
    pub token: String,
}

pub fn test_state(rate_limit_per_minute: usize) -> State {
    State::new(StateConfig {
        session_secret: b"api-test-secret".to_vec(),
        rate_limit_per_minute,
    })
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_state(test_state(10_000))
    }

    pub fn with_state(state: State) -> Self {
        let provider = MemoryProvider::new();
        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let app: AppState = Arc::new(AppStateInner::new(
            Arc::new(state),
            Arc::new(provider.clone()),
            credentials,
            Duration::from_millis(10),
            Some(ADMIN_KEY.to_string()),
        ));
        Self {
            router: router(app.clone()),
            app,
            provider,
        }
    }

    /// Signs `phone` in with two conversations: a private chat and a channel.
    pub async fn login(&self, phone: &str) -> Session {
        self.provider.add_conversation(
            phone,
            ConversationSummary {
                id: ConversationId(ALICE_CHAT),
                title: "Alice".into(),
                unread_count: 0,
                last_message: Some("hi there".into()),
                kind: ConversationKind::Private,
            },
        );
        self.provider.add_conversation(
            phone,
            ConversationSummary {
                id: ConversationId(NEWS_CHAT),
                title: "News".into(),
                unread_count: 3,
                last_message: None,
                kind: ConversationKind::Channels,
            },
        );
        self.confirm(phone).await
    }

    pub async fn confirm(&self, phone: &str) -> Session {
        let (status, body) = self
            .send(
                Method::POST,
                "/auth/confirm",
                None,
                &[],
                Some(serde_json::json!({ "phone": phone, "code": LOGIN_CODE })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        Session {
            phone: phone.to_string(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn get(&self, session: &Session, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(session), &[], None).await
    }

    pub async fn post(&self, session: &Session, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(session), &[], Some(body))
            .await
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        session: Option<&Session>,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(session) = session {
            builder = builder
                .header(header::AUTHORIZATION, format!("Bearer {}", session.token))
                .header("x-phone", &session.phone);
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Events waiting in `phone`'s outbox, consumed.
    pub fn drain(&self, phone: &str) -> Vec<EventEnvelope> {
        self.app.state.outbox.drain(phone)
    }

    pub fn event_types(&self, phone: &str) -> Vec<&'static str> {
        self.drain(phone)
            .iter()
            .map(|envelope| envelope.event.event_type())
            .collect()
    }
}
