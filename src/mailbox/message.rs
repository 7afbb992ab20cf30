//! Canonical parsed mailbox item and MIME normalization.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use mail_parser::{HeaderName, MessageParser, MimeHeaders, PartType};
use serde::Serialize;

pub const NO_SUBJECT: &str = "No Subject";
pub const UNKNOWN_SENDER: &str = "Unknown Sender";
pub const UNKNOWN_DATE: &str = "Unknown Date";

/// Hard-wrap width used by the `Display` rendering.
const DISPLAY_LINE_LENGTH: usize = 100;

/// Characters of body text shown by [`MailMessage::text_summary`].
const SUMMARY_PREVIEW_CHARS: usize = 100;

/// Date header of a message: parsed when possible, otherwise the raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MailDate {
    Parsed(DateTime<FixedOffset>),
    Raw(String),
}

impl fmt::Display for MailDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailDate::Parsed(dt) => write!(f, "{}", dt.to_rfc2822()),
            MailDate::Raw(raw) => f.write_str(raw),
        }
    }
}

/// One normalized mailbox item. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: MailDate,
    /// Plain-text body; empty when nothing could be extracted.
    pub body: String,
    pub snippet: String,
}

impl MailMessage {
    /// Parse a raw RFC 822 message.
    ///
    /// Never fails: unparsable input yields a message with placeholders and
    /// an empty body. `id` and `snippet` come from the provider, not the MIME.
    pub fn from_rfc822(id: impl Into<String>, raw: &[u8], snippet: impl Into<String>) -> Self {
        let id = id.into();
        let snippet = snippet.into();

        let Some(parsed) = MessageParser::default().parse(raw) else {
            tracing::warn!(id = %id, "Unparsable MIME payload, using placeholders");
            return Self {
                id,
                subject: NO_SUBJECT.to_string(),
                sender: UNKNOWN_SENDER.to_string(),
                date: MailDate::Raw(UNKNOWN_DATE.to_string()),
                body: String::new(),
                snippet,
            };
        };

        Self {
            id,
            subject: extract_subject(&parsed),
            sender: extract_sender(&parsed),
            date: extract_date(&parsed),
            body: extract_body(&parsed),
            snippet,
        }
    }

    /// Body with blank lines dropped, lines trimmed and hard-wrapped.
    pub fn format_body(&self, max_line_length: usize) -> String {
        if self.body.trim().is_empty() {
            return "[No Text]".to_string();
        }
        let width = max_line_length.max(1);

        let mut wrapped: Vec<String> = Vec::new();
        for line in self.body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let chars: Vec<char> = line.chars().collect();
            for chunk in chars.chunks(width) {
                wrapped.push(chunk.iter().collect());
            }
        }
        wrapped.join("\n")
    }

    /// Short multi-line summary, logged at debug level per processed item.
    pub fn text_summary(&self) -> String {
        let preview = if self.body.is_empty() {
            "[No body]".to_string()
        } else {
            let head: String = self.body.chars().take(SUMMARY_PREVIEW_CHARS).collect();
            format!("{head}...")
        };
        format!(
            "Subject: {}\nFrom: {}\nPreview: {}",
            self.subject, self.sender, preview
        )
    }
}

impl fmt::Display for MailMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Subject: {}", self.subject)?;
        writeln!(f, "From: {}", self.sender)?;
        writeln!(f, "Text:")?;
        f.write_str(&self.format_body(DISPLAY_LINE_LENGTH))
    }
}

fn extract_subject(parsed: &mail_parser::Message) -> String {
    parsed
        .subject()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| NO_SUBJECT.to_string())
}

/// `Name <address>` when a display name exists, else the bare address.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return UNKNOWN_SENDER.to_string();
    };
    let name = addr.name().map(str::trim).filter(|n| !n.is_empty());
    let address = addr.address().map(str::trim).filter(|a| !a.is_empty());
    match (name, address) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => UNKNOWN_SENDER.to_string(),
    }
}

fn extract_date(parsed: &mail_parser::Message) -> MailDate {
    if let Some(date) = parsed.date()
        && let Ok(dt) = DateTime::parse_from_rfc3339(&date.to_rfc3339())
    {
        return MailDate::Parsed(dt);
    }
    match parsed.header_raw(HeaderName::Date).map(str::trim) {
        Some(raw) if !raw.is_empty() => MailDate::Raw(raw.to_string()),
        _ => MailDate::Raw(UNKNOWN_DATE.to_string()),
    }
}

/// Multi-part: first `text/plain` part in document order, descending into
/// attached messages, else empty.
/// Single-part: the decoded payload, whatever its type.
fn extract_body(parsed: &mail_parser::Message) -> String {
    let Some(root) = parsed.parts.first() else {
        return String::new();
    };

    if !matches!(root.body, PartType::Multipart(_)) {
        return decode_part(root);
    }

    first_plain_text(parsed).unwrap_or_default()
}

fn first_plain_text(parsed: &mail_parser::Message) -> Option<String> {
    for part in &parsed.parts {
        if is_plain_text(part) {
            return Some(decode_part(part));
        }
        if let PartType::Message(nested) = &part.body
            && let Some(text) = first_plain_text(nested)
        {
            return Some(text);
        }
    }
    None
}

fn is_plain_text(part: &mail_parser::MessagePart) -> bool {
    if !matches!(part.body, PartType::Text(_)) {
        return false;
    }
    match part.content_type() {
        None => true,
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().is_none_or(|s| s.eq_ignore_ascii_case("plain"))
        }
    }
}

fn decode_part(part: &mail_parser::MessagePart) -> String {
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.to_string(),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        PartType::Message(_) | PartType::Multipart(_) => String::new(),
    }
}
