//! Gmail REST API mailbox client.
//!
//! Uses Gmail API v1:
//! - `messages.list` with `INBOX` + `UNREAD` label filters
//! - `messages.get?format=raw` for the RFC 822 source
//! - `messages.modify` to drop `UNREAD` (and add the processed label)
//! - `labels.list` / `labels.create` to resolve the processed label

use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, warn};

use super::credential::{
    Credential, CredentialProvider, CredentialStore, http_client, refresh_credential,
};
use super::message::MailMessage;
use super::Mailbox;
use crate::config::MailboxConfig;
use crate::error::{AuthError, MailboxError};

/// Gmail emits URL-safe base64, with or without padding.
const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const UNREAD_LABEL: &str = "UNREAD";
const INBOX_LABEL: &str = "INBOX";

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    raw: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    add_label_ids: Vec<String>,
    remove_label_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LabelListResponse {
    #[serde(default)]
    labels: Vec<GmailLabel>,
}

#[derive(Debug, Deserialize)]
struct GmailLabel {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLabelRequest<'a> {
    name: &'a str,
    label_list_visibility: &'a str,
    message_list_visibility: &'a str,
}

/// Authenticated Gmail mailbox. Owns the credential exclusively.
pub struct GmailMailbox {
    config: MailboxConfig,
    client: reqwest::Client,
    store: CredentialStore,
    credential: Mutex<Credential>,
    processed_label_id: OnceCell<String>,
}

impl GmailMailbox {
    /// Load, refresh or acquire a credential and persist it.
    ///
    /// Any failure here is fatal for the client: the pipeline must not run
    /// unauthenticated.
    pub async fn authenticate(
        config: MailboxConfig,
        provider: &dyn CredentialProvider,
    ) -> Result<Self, AuthError> {
        let client = http_client(config.request_timeout)?;
        let store = CredentialStore::new(&config.token_path);

        let credential = resolve_credential(&client, &store, provider).await?;
        store.save(&credential)?;
        info!(
            token_path = %store.path().display(),
            expires_at = ?credential.expires_at,
            "Mailbox authenticated"
        );

        Ok(Self {
            config,
            client,
            store,
            credential: Mutex::new(credential),
            processed_label_id: OnceCell::new(),
        })
    }

    /// Listing that reports failures instead of absorbing them.
    ///
    /// A failing listing call is an error; a single item that cannot be
    /// fetched or decoded is skipped.
    pub async fn try_list_unread(&self, max_results: u32) -> Result<Vec<MailMessage>, MailboxError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let max = max_results.to_string();
        let listing: MessageListResponse = self
            .get_json(
                "/messages",
                &[
                    ("labelIds", INBOX_LABEL),
                    ("labelIds", UNREAD_LABEL),
                    ("maxResults", max.as_str()),
                ],
            )
            .await?;

        let mut messages = Vec::with_capacity(listing.messages.len());
        for message_ref in listing.messages.into_iter().take(max_results as usize) {
            match self.fetch_message(&message_ref.id).await {
                Ok(message) => messages.push(message),
                Err(e) => warn!(id = %message_ref.id, error = %e, "Skipping unreadable message"),
            }
        }

        debug!(count = messages.len(), "Fetched unread messages");
        Ok(messages)
    }

    /// Mark that reports failures instead of absorbing them.
    pub async fn try_mark_processed(&self, id: &str) -> Result<(), MailboxError> {
        let mut add_label_ids = Vec::new();
        if let Some(label_id) = self.processed_label().await {
            add_label_ids.push(label_id);
        }

        let body = ModifyRequest {
            add_label_ids,
            remove_label_ids: vec![UNREAD_LABEL.to_string()],
        };
        let _: serde_json::Value = self
            .post_json(&format!("/messages/{id}/modify"), &body)
            .await?;
        Ok(())
    }

    async fn fetch_message(&self, id: &str) -> Result<MailMessage, MailboxError> {
        let message: RawMessage = self
            .get_json(&format!("/messages/{id}"), &[("format", "raw")])
            .await?;

        let raw = message.raw.as_deref().ok_or_else(|| MailboxError::Decode {
            id: message.id.clone(),
            reason: "response has no raw payload".into(),
        })?;
        let bytes = RAW_ENGINE
            .decode(raw.trim())
            .map_err(|e| MailboxError::Decode {
                id: message.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(MailMessage::from_rfc822(message.id, &bytes, message.snippet))
    }

    /// Id of the configured processed label, created on first use.
    ///
    /// Failures are logged and retried on the next call; they never block
    /// the UNREAD removal.
    async fn processed_label(&self) -> Option<String> {
        let name = self.config.processed_label.as_deref()?;
        match self
            .processed_label_id
            .get_or_try_init(|| self.resolve_label(name))
            .await
        {
            Ok(id) => Some(id.clone()),
            Err(e) => {
                warn!(label = %name, error = %e, "Could not resolve processed label");
                None
            }
        }
    }

    async fn resolve_label(&self, name: &str) -> Result<String, MailboxError> {
        let existing: LabelListResponse = self.get_json("/labels", &[]).await?;
        if let Some(label) = existing.labels.into_iter().find(|l| l.name == name) {
            return Ok(label.id);
        }

        let created: GmailLabel = self
            .post_json(
                "/labels",
                &CreateLabelRequest {
                    name,
                    label_list_visibility: "labelShow",
                    message_list_visibility: "show",
                },
            )
            .await?;
        info!(label = %created.name, id = %created.id, "Created processed label");
        Ok(created.id)
    }

    /// A valid access token, refreshing (and persisting) when expired.
    async fn access_token(&self) -> Result<String, MailboxError> {
        let mut credential = self.credential.lock().await;
        if credential.is_expired() {
            if !credential.can_refresh() {
                return Err(AuthError::Unrefreshable.into());
            }
            refresh_credential(&self.client, &mut credential).await?;
            if let Err(e) = self.store.save(&credential) {
                warn!(error = %e, "Refreshed token could not be persisted");
            }
            info!(expires_at = ?credential.expires_at, "Refreshed mailbox access token");
        }
        Ok(credential.access_token.clone())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.api_base, endpoint)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MailboxError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.url(endpoint))
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.handle_response(response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, MailboxError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(self.url(endpoint))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.handle_response(response).await
    }

    fn transport_error(&self, e: reqwest::Error) -> MailboxError {
        if e.is_timeout() {
            MailboxError::Timeout(self.config.request_timeout)
        } else {
            MailboxError::from(e)
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, MailboxError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| MailboxError::Request(format!("invalid response body: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 => {
                self.credential.lock().await.mark_expired();
                Err(MailboxError::Unauthorized(body))
            }
            429 => Err(MailboxError::RateLimited),
            code => Err(MailboxError::Api { status: code, body }),
        }
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn list_unread(&self, max_results: u32) -> Vec<MailMessage> {
        match self.try_list_unread(max_results).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Listing unread messages failed, nothing to do this cycle");
                Vec::new()
            }
        }
    }

    async fn mark_processed(&self, id: &str) {
        match self.try_mark_processed(id).await {
            Ok(()) => debug!(id = %id, "Marked message as processed"),
            Err(e) => warn!(id = %id, error = %e, "Failed to mark message as processed"),
        }
    }
}

/// Stored credential if still usable, else refreshed, else freshly obtained.
async fn resolve_credential(
    client: &reqwest::Client,
    store: &CredentialStore,
    provider: &dyn CredentialProvider,
) -> Result<Credential, AuthError> {
    let stored = match store.load() {
        Ok(stored) => stored,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable credential file");
            None
        }
    };

    match stored {
        Some(credential) if !credential.is_expired() => return Ok(credential),
        Some(mut credential) if credential.can_refresh() => {
            match refresh_credential(client, &mut credential).await {
                Ok(()) => {
                    info!("Refreshed stored mailbox credential");
                    return Ok(credential);
                }
                Err(e) => warn!(error = %e, "Credential refresh failed, re-authorizing"),
            }
        }
        Some(_) => info!("Stored credential expired without a refresh token, re-authorizing"),
        None => info!("No stored mailbox credential, authorizing"),
    }

    let mut credential = provider.obtain().await?;
    if credential.is_expired() {
        refresh_credential(client, &mut credential).await?;
    }
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::mailbox::credential::{GMAIL_MODIFY_SCOPE, InstalledAppFlow, StaticCredentialProvider};

    struct CountingProvider {
        credential: Credential,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        async fn obtain(&self) -> Result<Credential, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.credential.clone())
        }
    }

    fn credential(token: &str, expires_in_secs: i64, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: token.into(),
            refresh_token: refresh.map(str::to_string),
            token_uri: "http://127.0.0.1:1/token".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            scopes: vec![GMAIL_MODIFY_SCOPE.into()],
            expires_at: Some(Utc::now() + chrono::Duration::seconds(expires_in_secs)),
        }
    }

    fn config(dir: &tempfile::TempDir) -> MailboxConfig {
        MailboxConfig {
            token_path: dir.path().join("token.json"),
            client_secrets_path: dir.path().join("credentials.json"),
            api_base: "http://127.0.0.1:1".into(),
            processed_label: None,
            request_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn valid_stored_credential_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        CredentialStore::new(&cfg.token_path)
            .save(&credential("stored", 3600, None))
            .unwrap();

        let provider = CountingProvider {
            credential: credential("fresh", 3600, None),
            calls: AtomicUsize::new(0),
        };
        let mailbox = GmailMailbox::authenticate(cfg, &provider).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(mailbox.credential.lock().await.access_token, "stored");
    }

    #[tokio::test]
    async fn missing_credential_is_obtained_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let token_path = cfg.token_path.clone();

        let provider = StaticCredentialProvider::new(credential("fresh", 3600, Some("r")));
        GmailMailbox::authenticate(cfg, &provider).await.unwrap();

        let saved = CredentialStore::new(token_path).load().unwrap().unwrap();
        assert_eq!(saved.access_token, "fresh");
    }

    #[tokio::test]
    async fn expired_credential_without_refresh_goes_to_provider() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        CredentialStore::new(&cfg.token_path)
            .save(&credential("old", -600, None))
            .unwrap();

        let provider = CountingProvider {
            credential: credential("new", 3600, None),
            calls: AtomicUsize::new(0),
        };
        let mailbox = GmailMailbox::authenticate(cfg, &provider).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mailbox.credential.lock().await.access_token, "new");
    }

    #[tokio::test]
    async fn corrupt_store_falls_back_to_provider() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        std::fs::write(&cfg.token_path, "{broken").unwrap();

        let provider = StaticCredentialProvider::new(credential("new", 3600, None));
        let mailbox = GmailMailbox::authenticate(cfg, &provider).await.unwrap();
        assert_eq!(mailbox.credential.lock().await.access_token, "new");
    }

    #[tokio::test]
    async fn no_credential_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let flow = InstalledAppFlow::new(cfg.client_secrets_path.clone(), reqwest::Client::new());

        let err = GmailMailbox::authenticate(cfg, &flow).await.err().unwrap();
        assert!(matches!(err, AuthError::NoCredentialSource { .. }));
    }

    #[tokio::test]
    async fn zero_max_results_is_empty_without_calls() {
        let dir = tempfile::tempdir().unwrap();
        let provider = StaticCredentialProvider::new(credential("t", 3600, None));
        let mailbox = GmailMailbox::authenticate(config(&dir), &provider).await.unwrap();

        assert!(mailbox.try_list_unread(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_provider_yields_empty_listing() {
        let dir = tempfile::tempdir().unwrap();
        let provider = StaticCredentialProvider::new(credential("t", 3600, None));
        let mailbox = GmailMailbox::authenticate(config(&dir), &provider).await.unwrap();

        assert!(mailbox.try_list_unread(5).await.is_err());
        assert!(mailbox.list_unread(5).await.is_empty());
        // Absorbed, not raised.
        mailbox.mark_processed("abc").await;
    }

    #[test]
    fn raw_engine_accepts_padded_and_unpadded() {
        assert_eq!(RAW_ENGINE.decode("aGk").unwrap(), b"hi");
        assert_eq!(RAW_ENGINE.decode("aGk=").unwrap(), b"hi");
        assert_eq!(RAW_ENGINE.decode("-_8").unwrap(), vec![0xfb, 0xff]);
    }
}
