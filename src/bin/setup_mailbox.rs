//! One-time mailbox authorization.
//!
//! Runs the interactive consent flow (if no usable token is stored), writes
//! the credential file, then lists one unread message as a smoke test.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use mail_router::config::MailboxConfig;
use mail_router::mailbox::{GmailMailbox, InstalledAppFlow};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let lookup = |key: &str| std::env::var(key).ok();
    let config = MailboxConfig::from_lookup(&lookup).context("invalid mailbox configuration")?;

    eprintln!("📬 Mailbox setup");
    eprintln!("   Client secrets: {}", config.client_secrets_path.display());
    eprintln!("   Token file:     {}", config.token_path.display());

    let flow = InstalledAppFlow::from_config(&config)?;
    let mailbox = GmailMailbox::authenticate(config.clone(), &flow)
        .await
        .context("mailbox authorization failed")?;

    eprintln!("✅ Credential saved to {}", config.token_path.display());

    let messages = mailbox
        .try_list_unread(1)
        .await
        .context("listing unread messages failed")?;

    println!("Found {} unread message(s).", messages.len());
    if let Some(message) = messages.first() {
        println!("\n{message}");
    }
    Ok(())
}
