//! Mailbox access: the provider-facing side of the intake pipeline.

pub mod credential;
pub mod gmail;
pub mod message;

pub use credential::{
    Credential, CredentialProvider, CredentialStore, InstalledAppFlow, StaticCredentialProvider,
};
pub use gmail::GmailMailbox;
pub use message::{MailDate, MailMessage};

use async_trait::async_trait;

/// What the orchestrator needs from a mailbox.
///
/// Both operations absorb provider failures: a failed listing is an empty
/// batch and a failed mark leaves the item to be revisited next cycle.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Up to `max_results` unread inbox items, in provider order.
    async fn list_unread(&self, max_results: u32) -> Vec<MailMessage>;

    /// Remove the unread marker. Safe to repeat.
    async fn mark_processed(&self, id: &str);
}
