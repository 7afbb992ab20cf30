//! Mailbox OAuth credential: persisted store, refresh, and acquisition.
//!
//! The on-disk shape is Google's "authorized user" JSON, so a token file
//! written by other Google tooling loads unchanged.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::config::MailboxConfig;
use crate::error::AuthError;

/// Scope needed to list messages and remove the UNREAD label.
pub const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// A token is treated as expired this long before its real expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// How long the interactive flow waits for the browser redirect.
const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Mailbox authorization state.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// `None` means unknown and is treated as expired.
    #[serde(rename = "expiry", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl Credential {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() >= exp - chrono::Duration::seconds(EXPIRY_MARGIN_SECS),
            None => true,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Force the next use to refresh (e.g. after an HTTP 401).
    pub fn mark_expired(&mut self) {
        self.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
    }
}

/// Show the first 4 characters of a token, mask the rest.
pub fn mask_token(token: &str) -> String {
    match token.char_indices().nth(4) {
        Some((idx, _)) => format!("{}***", &token[..idx]),
        None => "***".to_string(),
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &mask_token(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask_token))
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Credential file on disk.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file does not exist.
    pub fn load(&self) -> Result<Option<Credential>, AuthError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.store_error(e)),
        };
        let credential: Credential = serde_json::from_str(&content).map_err(|e| self.store_error(e))?;
        debug!(
            path = %self.path.display(),
            expires_at = ?credential.expires_at,
            "Loaded mailbox credential"
        );
        Ok(Some(credential))
    }

    /// Write the credential with owner-only permissions.
    pub fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.store_error(e))?;
        }
        let content = serde_json::to_string_pretty(credential).map_err(|e| self.store_error(e))?;
        std::fs::write(&self.path, content).map_err(|e| self.store_error(e))?;
        restrict_permissions(&self.path).map_err(|e| self.store_error(e))?;
        debug!(path = %self.path.display(), "Saved mailbox credential");
        Ok(())
    }

    fn store_error(&self, reason: impl fmt::Display) -> AuthError {
        AuthError::Store {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// ── Refresh ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// HTTP client for provider and token calls, bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AuthError::TokenRequest(format!("failed to build HTTP client: {e}")))
}

/// POST a grant to the token endpoint and decode the response.
async fn request_token(
    client: &reqwest::Client,
    token_uri: &str,
    params: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let response = client
        .post(token_uri)
        .form(params)
        .send()
        .await
        .map_err(|e| AuthError::TokenRequest(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<TokenErrorResponse>(&body)
            .ok()
            .and_then(|e| e.error_description.or(e.error))
            .unwrap_or(body);
        return Err(AuthError::TokenRejected {
            status: status.as_u16(),
            reason,
        });
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::TokenRequest(format!("invalid token response: {e}")))
}

fn expiry_from(expires_in: Option<i64>) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(expires_in.unwrap_or(3600))
}

/// Refresh an expired credential in place.
///
/// The provider may rotate the refresh token; the old one is kept otherwise.
pub async fn refresh_credential(
    client: &reqwest::Client,
    credential: &mut Credential,
) -> Result<(), AuthError> {
    let refresh_token = credential
        .refresh_token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Unrefreshable)?;

    debug!("Refreshing mailbox access token");
    let token = request_token(
        client,
        &credential.token_uri,
        &[
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ],
    )
    .await?;

    credential.access_token = token.access_token;
    credential.expires_at = Some(expiry_from(token.expires_in));
    if let Some(rotated) = token.refresh_token.filter(|t| !t.is_empty()) {
        credential.refresh_token = Some(rotated);
    }
    Ok(())
}

// ── Acquisition ─────────────────────────────────────────────────────

/// Source of a brand-new credential when the store has nothing usable.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn obtain(&self) -> Result<Credential, AuthError>;
}

/// Hands out a fixed credential. For headless runs and tests.
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn obtain(&self) -> Result<Credential, AuthError> {
        Ok(self.credential.clone())
    }
}

/// OAuth client registration as downloaded from the Google console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::NoCredentialSource {
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(AuthError::InvalidClientSecrets(e.to_string())),
        };
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, AuthError> {
        let file: ClientSecretsFile = serde_json::from_str(content)
            .map_err(|e| AuthError::InvalidClientSecrets(e.to_string()))?;
        file.installed.or(file.web).ok_or_else(|| {
            AuthError::InvalidClientSecrets("expected an \"installed\" or \"web\" section".into())
        })
    }
}

#[derive(Debug, Deserialize)]
struct ConsentRedirect {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

type RedirectSlot = std::sync::Arc<Mutex<Option<oneshot::Sender<ConsentRedirect>>>>;

/// Interactive installed-app flow: the operator approves access in a
/// browser and Google redirects to a loopback listener.
pub struct InstalledAppFlow {
    client_secrets_path: PathBuf,
    scopes: Vec<String>,
    client: reqwest::Client,
}

impl InstalledAppFlow {
    pub fn new(client_secrets_path: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            client_secrets_path: client_secrets_path.into(),
            scopes: vec![GMAIL_MODIFY_SCOPE.to_string()],
            client,
        }
    }

    /// Flow reading the configured client secrets; the code exchange is
    /// bounded by the mailbox request timeout.
    pub fn from_config(config: &MailboxConfig) -> Result<Self, AuthError> {
        Ok(Self::new(
            &config.client_secrets_path,
            http_client(config.request_timeout)?,
        ))
    }

    /// Consent URL the operator opens in a browser.
    pub fn consent_url(
        secrets: &ClientSecrets,
        scopes: &[String],
        redirect_uri: &str,
        state: &str,
    ) -> Result<reqwest::Url, AuthError> {
        let scope = scopes.join(" ");
        reqwest::Url::parse_with_params(
            &secrets.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
                ("state", state),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| AuthError::InvalidClientSecrets(format!("bad auth_uri: {e}")))
    }

    async fn wait_for_redirect(
        listener: tokio::net::TcpListener,
    ) -> Result<ConsentRedirect, AuthError> {
        let (tx, rx) = oneshot::channel::<ConsentRedirect>();
        let slot: RedirectSlot = std::sync::Arc::new(Mutex::new(Some(tx)));

        let app = Router::new()
            .route("/", get(receive_redirect))
            .with_state(slot);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let redirect = tokio::time::timeout(CONSENT_TIMEOUT, rx).await;
        let _ = stop_tx.send(());
        let _ = server.await;

        match redirect {
            Ok(Ok(redirect)) => Ok(redirect),
            Ok(Err(_)) => Err(AuthError::Flow("redirect listener closed".into())),
            Err(_) => Err(AuthError::Flow(format!(
                "no authorization received within {}s",
                CONSENT_TIMEOUT.as_secs()
            ))),
        }
    }
}

async fn receive_redirect(
    State(slot): State<RedirectSlot>,
    Query(redirect): Query<ConsentRedirect>,
) -> Html<&'static str> {
    if let Some(tx) = slot.lock().await.take() {
        let _ = tx.send(redirect);
    }
    Html("<p>The authentication flow has completed. You may close this window.</p>")
}

#[async_trait]
impl CredentialProvider for InstalledAppFlow {
    async fn obtain(&self) -> Result<Credential, AuthError> {
        let secrets = ClientSecrets::from_file(&self.client_secrets_path)?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| AuthError::Flow(format!("cannot bind redirect listener: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::Flow(e.to_string()))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let state = uuid::Uuid::new_v4().simple().to_string();

        let url = Self::consent_url(&secrets, &self.scopes, &redirect_uri, &state)?;
        info!("Waiting for mailbox authorization on {redirect_uri}");
        eprintln!("Please visit this URL to authorize this application:\n{url}\n");

        let redirect = Self::wait_for_redirect(listener).await?;
        if let Some(error) = redirect.error {
            return Err(AuthError::Flow(format!("authorization denied: {error}")));
        }
        if redirect.state.as_deref() != Some(state.as_str()) {
            warn!("Authorization redirect carried an unexpected state parameter");
            return Err(AuthError::Flow("state mismatch in authorization redirect".into()));
        }
        let code = redirect
            .code
            .ok_or_else(|| AuthError::Flow("authorization redirect had no code".into()))?;

        let token = request_token(
            &self.client,
            &secrets.token_uri,
            &[
                ("code", code.as_str()),
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ],
        )
        .await?;

        let scopes = token
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| self.scopes.clone());

        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_uri: secrets.token_uri,
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            scopes,
            expires_at: Some(expiry_from(token.expires_in)),
        })
    }
}
