//! Configuration types, built from environment variables.
//!
//! Every section has a `from_lookup` constructor taking a key → value
//! function, so tests can feed a map instead of touching the process
//! environment. `from_env` wires that to `std::env::var`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Routing categories used when `CLASSIFIER_LABELS` is not set.
pub const DEFAULT_LABELS: [&str; 5] = [
    "customer support",
    "sales inquiry",
    "billing issue",
    "complaint",
    "feedback",
];

/// Default zero-shot model for the inference backend.
pub const DEFAULT_MODEL: &str = "facebook/bart-large-mnli";

const DEFAULT_INFERENCE_ENDPOINT: &str = "https://api-inference.huggingface.co";
const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Whole-process settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub intake: IntakeConfig,
    pub mailbox: MailboxConfig,
    pub notifier: NotifierConfig,
    pub classifier: ClassifierConfig,
}

impl AppConfig {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            server: ServerConfig::from_lookup(&lookup)?,
            intake: IntakeConfig::from_lookup(&lookup)?,
            mailbox: MailboxConfig::from_lookup(&lookup)?,
            notifier: NotifierConfig::from_lookup(&lookup)?,
            classifier: ClassifierConfig::from_lookup(&lookup)?,
        })
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub app_name: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            app_name: string_or(lookup, "MAIL_ROUTER_APP_NAME", "AI Email Router API"),
            port: parse_or(lookup, "MAIL_ROUTER_PORT", 8000)?,
        })
    }
}

/// Intake pipeline settings.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Whether the background scan runs at all.
    pub enabled: bool,
    /// Time between scheduled scans.
    pub poll_interval: Duration,
    /// Maximum unread items fetched per scan.
    pub batch_size: u32,
    /// Pause between items inside one scan (provider rate limiting).
    pub item_delay: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(300), // 5 minutes
            batch_size: 5,
            item_delay: Duration::from_secs(1),
        }
    }
}

impl IntakeConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let batch_size: u32 = parse_or(lookup, "MAIL_ROUTER_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAIL_ROUTER_BATCH_SIZE".into(),
                message: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            enabled: parse_bool_or(lookup, "MAIL_ROUTER_POLLING", defaults.enabled)?,
            poll_interval: positive_secs_or(
                lookup,
                "MAIL_ROUTER_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?,
            batch_size,
            item_delay: Duration::from_millis(parse_or(
                lookup,
                "MAIL_ROUTER_ITEM_DELAY_MS",
                defaults.item_delay.as_millis() as u64,
            )?),
        })
    }
}

/// Mailbox (Gmail) settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    /// Persisted credential file (read and written).
    pub token_path: PathBuf,
    /// OAuth client secrets used by the interactive flow.
    pub client_secrets_path: PathBuf,
    pub api_base: String,
    /// Label added to processed items, if any.
    pub processed_label: Option<String>,
    pub request_timeout: Duration,
}

impl MailboxConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            token_path: PathBuf::from(string_or(lookup, "GMAIL_TOKEN_PATH", "token.json")),
            client_secrets_path: PathBuf::from(string_or(
                lookup,
                "GMAIL_CREDENTIALS_PATH",
                "credentials.json",
            )),
            api_base: string_or(lookup, "GMAIL_API_BASE", DEFAULT_GMAIL_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            processed_label: non_empty(lookup, "GMAIL_PROCESSED_LABEL"),
            request_timeout: positive_secs_or(lookup, "GMAIL_TIMEOUT_SECS", 30)?,
        })
    }
}

/// Notification channel settings.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Slack incoming webhook. `None` disables notifications.
    pub webhook_url: Option<String>,
    pub timeout: Duration,
}

impl NotifierConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            webhook_url: non_empty(lookup, "SLACK_WEBHOOK_URL"),
            timeout: positive_secs_or(lookup, "SLACK_TIMEOUT_SECS", 10)?,
        })
    }
}

/// Which scoring backend sits behind the classification gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierBackend {
    Lexical,
    Inference,
}

impl FromStr for ClassifierBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lexical" => Ok(Self::Lexical),
            "inference" => Ok(Self::Inference),
            other => Err(format!("unknown backend '{other}' (expected lexical or inference)")),
        }
    }
}

/// Classification settings.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Fixed, ordered candidate label set.
    pub labels: Vec<String>,
    pub backend: ClassifierBackend,
    pub endpoint: String,
    pub model: String,
    pub api_token: Option<SecretString>,
    pub timeout: Duration,
}

impl ClassifierConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let labels = match lookup("CLASSIFIER_LABELS") {
            Some(raw) => parse_labels(&raw),
            None => DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
        };
        if labels.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "CLASSIFIER_LABELS".into(),
                message: "at least one label is required".into(),
            });
        }

        let backend = match lookup("CLASSIFIER_BACKEND") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "CLASSIFIER_BACKEND".into(),
                message,
            })?,
            None => ClassifierBackend::Lexical,
        };

        Ok(Self {
            labels,
            backend,
            endpoint: string_or(lookup, "CLASSIFIER_ENDPOINT", DEFAULT_INFERENCE_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            model: string_or(lookup, "CLASSIFIER_MODEL", DEFAULT_MODEL),
            api_token: non_empty(lookup, "CLASSIFIER_API_TOKEN").map(SecretString::from),
            timeout: positive_secs_or(lookup, "CLASSIFIER_TIMEOUT_SECS", 30)?,
        })
    }
}

/// Split a comma-separated label list, dropping blanks and duplicates.
fn parse_labels(raw: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for label in raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
    }
    labels
}

fn string_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, key).unwrap_or_else(|| default.to_string())
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

/// Whole seconds; zero is rejected.
fn positive_secs_or<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{v}' is not a boolean"),
        }),
    }
}
