//! Slack incoming-webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{NotificationContext, Notifier};
use crate::config::NotifierConfig;
use crate::error::NotifyError;

const SNIPPET_CHARS: usize = 100;

/// Posts Block Kit messages to one webhook. Disabled without a URL.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client for Slack: {e}");
                reqwest::Client::new()
            });
        Self {
            client,
            webhook_url: webhook_url.filter(|u| !u.trim().is_empty()),
        }
    }

    pub fn from_config(config: &NotifierConfig) -> Self {
        Self::new(config.webhook_url.clone(), config.timeout)
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, payload: &Value) -> Result<(), NotifyError> {
        let url = self.webhook_url.as_deref().ok_or(NotifyError::NotConfigured)?;

        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str, context: Option<&NotificationContext>) -> bool {
        let payload = build_payload(message, context);
        match self.send(&payload).await {
            Ok(()) => {
                tracing::debug!("Slack notification delivered");
                true
            }
            Err(NotifyError::NotConfigured) => {
                tracing::debug!("Slack webhook not configured, skipping notification");
                false
            }
            Err(e) => {
                tracing::warn!("Failed to send Slack notification: {e}");
                false
            }
        }
    }
}

/// Plain `text` payload, or Block Kit sections when item details are known.
pub fn build_payload(message: &str, context: Option<&NotificationContext>) -> Value {
    let Some(ctx) = context else {
        return json!({ "text": message });
    };

    json!({
        "text": message,
        "blocks": [
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("📩 *Email Processed*\n{message}") }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*From:*\n{}", ctx.sender) },
                    { "type": "mrkdwn", "text": format!("*Subject:*\n{}", ctx.subject) }
                ]
            },
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*Snippet:*\n{}", truncate_snippet(&ctx.snippet, SNIPPET_CHARS))
                }
            }
        ]
    })
}

/// First `max_chars` characters, with `...` only when something was cut.
pub fn truncate_snippet(snippet: &str, max_chars: usize) -> String {
    match snippet.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &snippet[..cut]),
        None => snippet.to_string(),
    }
}
