//! Local stand-ins for the Gmail API, the OAuth token endpoint and a
//! Slack webhook, served by one Axum app on a random port.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use mail_router::config::MailboxConfig;
use mail_router::mailbox::Credential;
use mail_router::mailbox::credential::GMAIL_MODIFY_SCOPE;

pub const INITIAL_TOKEN: &str = "valid-token";

pub struct MockMessage {
    pub id: String,
    pub rfc822: String,
    pub snippet: String,
    pub labels: Vec<String>,
}

#[derive(Default)]
pub struct MockState {
    pub messages: Mutex<Vec<MockMessage>>,
    pub labels: Mutex<Vec<(String, String)>>,
    pub valid_token: Mutex<String>,
    pub refreshes: AtomicUsize,
    pub modify_calls: AtomicUsize,
    pub label_creates: AtomicUsize,
    /// Ids whose `messages.get` fails with 500.
    pub broken_ids: Mutex<Vec<String>>,
    /// Answer the next API call with 401.
    pub reject_next: AtomicBool,
    /// Answer refresh grants with `invalid_grant`.
    pub reject_refresh: AtomicBool,
    pub slack_payloads: Mutex<Vec<Value>>,
    /// Answer webhook posts with 500 without recording them.
    pub reject_slack: AtomicBool,
    pub slack_rejections: AtomicUsize,
}

pub struct MockServer {
    pub base: String,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        *state.valid_token.lock().unwrap() = INITIAL_TOKEN.to_string();

        let app = Router::new()
            .route("/gmail/v1/users/me/messages", get(list_messages))
            .route("/gmail/v1/users/me/messages/{id}", get(get_message))
            .route("/gmail/v1/users/me/messages/{id}/modify", post(modify_message))
            .route("/gmail/v1/users/me/labels", get(list_labels).post(create_label))
            .route("/token", post(token))
            .route("/slack", post(slack))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            base: format!("http://{addr}"),
            state,
        }
    }

    pub fn api_base(&self) -> String {
        format!("{}/gmail/v1/users/me", self.base)
    }

    pub fn token_uri(&self) -> String {
        format!("{}/token", self.base)
    }

    pub fn webhook_url(&self) -> String {
        format!("{}/slack", self.base)
    }

    pub fn mailbox_config(&self, dir: &tempfile::TempDir) -> MailboxConfig {
        MailboxConfig {
            token_path: dir.path().join("token.json"),
            client_secrets_path: dir.path().join("credentials.json"),
            api_base: self.api_base(),
            processed_label: None,
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Credential accepted by the mock, expiring in `expires_in_secs`.
    pub fn credential(&self, expires_in_secs: i64, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: INITIAL_TOKEN.into(),
            refresh_token: refresh.map(str::to_string),
            token_uri: self.token_uri(),
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            scopes: vec![GMAIL_MODIFY_SCOPE.into()],
            expires_at: Some(Utc::now() + chrono::Duration::seconds(expires_in_secs)),
        }
    }

    pub fn add_message(&self, id: &str, rfc822: &str, unread: bool) {
        let mut labels = vec!["INBOX".to_string()];
        if unread {
            labels.push("UNREAD".into());
        }
        self.state.messages.lock().unwrap().push(MockMessage {
            id: id.into(),
            rfc822: rfc822.into(),
            snippet: rfc822.lines().last().unwrap_or_default().trim().into(),
            labels,
        });
    }

    pub fn labels_of(&self, id: &str) -> Vec<String> {
        self.state
            .messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.labels.clone())
            .unwrap_or_default()
    }

    pub fn is_unread(&self, id: &str) -> bool {
        self.labels_of(id).iter().any(|l| l == "UNREAD")
    }

    pub fn current_token(&self) -> String {
        self.state.valid_token.lock().unwrap().clone()
    }

    pub fn slack_payloads(&self) -> Vec<Value> {
        self.state.slack_payloads.lock().unwrap().clone()
    }
}

/// Minimal RFC 822 text message.
pub fn rfc822(from: &str, subject: &str, body: &str) -> String {
    format!(
        "From: {from}\r\nSubject: {subject}\r\nDate: Tue, 1 Jul 2025 10:52:37 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    )
}

fn authorized(state: &MockState, headers: &HeaderMap) -> bool {
    if state.reject_next.swap(false, Ordering::SeqCst) {
        return false;
    }
    let expected = format!("Bearer {}", state.valid_token.lock().unwrap());
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some(expected.as_str())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"code": 401, "message": "Invalid Credentials"}})),
    )
        .into_response()
}

async fn list_messages(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }

    let wanted: Vec<&str> = params
        .iter()
        .filter(|(k, _)| k == "labelIds")
        .map(|(_, v)| v.as_str())
        .collect();
    if !(wanted.contains(&"INBOX") && wanted.contains(&"UNREAD")) {
        return (StatusCode::BAD_REQUEST, "expected INBOX and UNREAD filters").into_response();
    }
    let max: usize = params
        .iter()
        .find(|(k, _)| k == "maxResults")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(100);

    let messages = state.messages.lock().unwrap();
    let listed: Vec<Value> = messages
        .iter()
        .filter(|m| wanted.iter().all(|w| m.labels.iter().any(|l| l == w)))
        .take(max)
        .map(|m| json!({"id": m.id, "threadId": m.id}))
        .collect();

    // Gmail omits `messages` entirely for an empty result
    if listed.is_empty() {
        Json(json!({"resultSizeEstimate": 0})).into_response()
    } else {
        Json(json!({"messages": listed, "resultSizeEstimate": listed.len()})).into_response()
    }
}

async fn get_message(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    if params.get("format").map(String::as_str) != Some("raw") {
        return (StatusCode::BAD_REQUEST, "expected format=raw").into_response();
    }
    if state.broken_ids.lock().unwrap().contains(&id) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "backend error").into_response();
    }

    let messages = state.messages.lock().unwrap();
    match messages.iter().find(|m| m.id == id) {
        Some(m) => Json(json!({
            "id": m.id,
            "snippet": m.snippet,
            "labelIds": m.labels,
            "raw": URL_SAFE_NO_PAD.encode(m.rfc822.as_bytes()),
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn modify_message(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    state.modify_calls.fetch_add(1, Ordering::SeqCst);

    let ids = |key: &str| -> Vec<String> {
        body[key]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };
    let (add, remove) = (ids("addLabelIds"), ids("removeLabelIds"));

    let mut messages = state.messages.lock().unwrap();
    let Some(message) = messages.iter_mut().find(|m| m.id == id) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };
    message.labels.retain(|l| !remove.contains(l));
    for label in add {
        if !message.labels.contains(&label) {
            message.labels.push(label);
        }
    }
    Json(json!({"id": message.id, "labelIds": message.labels})).into_response()
}

async fn list_labels(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let mut labels = vec![
        json!({"id": "INBOX", "name": "INBOX", "type": "system"}),
        json!({"id": "UNREAD", "name": "UNREAD", "type": "system"}),
    ];
    for (id, name) in state.labels.lock().unwrap().iter() {
        labels.push(json!({"id": id, "name": name, "type": "user"}));
    }
    Json(json!({"labels": labels})).into_response()
}

async fn create_label(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let n = state.label_creates.fetch_add(1, Ordering::SeqCst) + 1;
    let id = format!("Label_{n}");
    let name = body["name"].as_str().unwrap_or_default().to_string();
    state.labels.lock().unwrap().push((id.clone(), name.clone()));
    Json(json!({"id": id, "name": name, "type": "user"})).into_response()
}

async fn token(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let valid_grant = form.get("grant_type").map(String::as_str) == Some("refresh_token")
        && form.get("refresh_token").is_some_and(|t| !t.is_empty());
    if !valid_grant || state.reject_refresh.load(Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })),
        )
            .into_response();
    }

    let n = state.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("refreshed-token-{n}");
    *state.valid_token.lock().unwrap() = token.clone();
    Json(json!({
        "access_token": token,
        "expires_in": 3599,
        "token_type": "Bearer",
        "scope": GMAIL_MODIFY_SCOPE,
    }))
    .into_response()
}

async fn slack(State(state): State<Arc<MockState>>, Json(payload): Json<Value>) -> StatusCode {
    if state.reject_slack.load(Ordering::SeqCst) {
        state.slack_rejections.fetch_add(1, Ordering::SeqCst);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.slack_payloads.lock().unwrap().push(payload);
    StatusCode::OK
}
