//! Shared harness: router over the in-memory store with a recording mailer.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use serde_json::Value;
use tower::ServiceExt;

use emporium_api::AppState;
use emporium_api::config::ApiConfig;
use emporium_core::auth::jwt::JwtConfig;
use emporium_core::auth::password;
use emporium_core::mailer::{Email, MailError, Mailer};
use emporium_core::models::{NewUser, Role, User};
use emporium_core::store::memory::MemoryStore;
use emporium_core::store::{Store, UserStore};

pub const PASSWORD: &str = "pa55word-long";

/// Captures outgoing mail instead of delivering it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<RecordingMailer>,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let mut config = ApiConfig::new(
            "127.0.0.1:0",
            JwtConfig {
                access_secret: "test-access-secret".into(),
                refresh_secret: "test-refresh-secret".into(),
            },
        );
        config.environment = "testing".into();
        config.password_cost = 4;

        let dyn_store: Arc<dyn Store> = store.clone();
        let dyn_mailer: Arc<dyn Mailer> = mailer.clone();
        let state = AppState::new(dyn_store, dyn_mailer, config).expect("state");
        let router = emporium_api::router(state.clone());
        Self {
            state,
            store,
            mailer,
            router,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response {
        self.router.clone().oneshot(req).await.expect("request")
    }

    /// JSON request; returns the status and the parsed body (`Null` when empty).
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let resp = self.send(request(method, uri, token, body)).await;
        let status = resp.status();
        (status, json_body(resp).await)
    }

    /// An activated account created straight through the store.
    pub async fn create_user(&self, email: &str, role: Role) -> User {
        let hash = password::hash_password(PASSWORD, 4).expect("hash");
        let code = format!("code-{email}");
        self.store
            .register_user(
                &NewUser {
                    username: email.split('@').next().unwrap_or(email).to_string(),
                    email: email.to_string(),
                    password_hash: hash,
                    name: "Test".into(),
                    surname: "User".into(),
                    ..Default::default()
                },
                &code,
            )
            .await
            .expect("register");
        let mut user = self.store.activate(&code).await.expect("activate");
        if role != Role::User {
            user.role = role;
            user = self.store.update_user(&user).await.expect("set role");
        }
        user
    }

    /// Authenticate and return `(access, refresh)`.
    pub async fn login(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .call(
                Method::POST,
                "/v1/auth/authenticate",
                None,
                Some(serde_json::json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        (
            body["accessToken"].as_str().expect("access").to_string(),
            body["refreshToken"].as_str().expect("refresh").to_string(),
        )
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_bytes(resp: Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

pub async fn json_body(resp: Response) -> Value {
    let bytes = body_bytes(resp).await;
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse JSON")
    }
}
