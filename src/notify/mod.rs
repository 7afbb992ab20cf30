//! Outbound notifications about processed mail.

pub mod slack;

pub use slack::SlackNotifier;

use async_trait::async_trait;

use crate::mailbox::MailMessage;

/// Item details attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContext {
    pub sender: String,
    pub subject: String,
    pub snippet: String,
}

impl From<&MailMessage> for NotificationContext {
    fn from(message: &MailMessage) -> Self {
        Self {
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            snippet: message.snippet.clone(),
        }
    }
}

/// Best-effort delivery of a message to a human-facing channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the channel accepted the message. Never fails.
    async fn notify(&self, message: &str, context: Option<&NotificationContext>) -> bool;
}
