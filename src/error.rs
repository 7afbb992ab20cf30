//! Error types for the mail router.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Server error: {0}")]
    Server(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox credential errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No credential source available: client secrets file not found at {path}")]
    NoCredentialSource { path: String },

    #[error("Invalid client secrets file: {0}")]
    InvalidClientSecrets(String),

    #[error("Interactive authorization failed: {0}")]
    Flow(String),

    #[error("Token endpoint rejected the request ({status}): {reason}")]
    TokenRejected { status: u16, reason: String },

    #[error("Token request failed: {0}")]
    TokenRequest(String),

    #[error("Credential expired and cannot be refreshed")]
    Unrefreshable,

    #[error("Credential store error at {path}: {reason}")]
    Store { path: String, reason: String },
}

/// Mail provider errors. Transient from the pipeline's point of view.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Provider request failed: {0}")]
    Request(String),

    #[error("Provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Provider rate limited")]
    RateLimited,

    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to decode message {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("Credential error: {0}")]
    Auth(#[from] AuthError),
}

impl From<reqwest::Error> for MailboxError {
    fn from(e: reqwest::Error) -> Self {
        MailboxError::Request(e.to_string())
    }
}

/// Classification errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Email text cannot be empty.")]
    EmptyInput,

    #[error("Scoring backend {backend} failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error("Invalid response from scoring backend {backend}: {reason}")]
    InvalidResponse { backend: String, reason: String },
}

impl ClassifyError {
    /// Whether retrying the same input can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ClassifyError::EmptyInput)
    }
}

/// Notification delivery errors. Never escape the notifier.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification channel not configured")]
    NotConfigured,

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Channel responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Per-item pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Classification(#[from] ClassifyError),

    #[error("Classifier returned no labels")]
    NoLabels,

    #[error("Item processing panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    /// Whether the failed item should be marked processed anyway.
    pub fn is_permanent(&self) -> bool {
        match self {
            PipelineError::Classification(e) => e.is_permanent(),
            PipelineError::NoLabels | PipelineError::Panicked(_) => false,
        }
    }
}

/// Result type alias for the mail router.
pub type Result<T> = std::result::Result<T, Error>;
