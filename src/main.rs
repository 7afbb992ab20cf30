use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_router::api::{self, AppState};
use mail_router::classify::ClassificationGateway;
use mail_router::config::AppConfig;
use mail_router::mailbox::{GmailMailbox, InstalledAppFlow};
use mail_router::notify::SlackNotifier;
use mail_router::pipeline::{IntakeOrchestrator, spawn_intake_scheduler};
use mail_router::{Error, Result};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_tracing(std::env::var_os("MAIL_ROUTER_LOG_DIR").map(PathBuf::from));

    let config = AppConfig::from_env().context("invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        app = %config.server.app_name,
        labels = ?config.classifier.labels,
        "Starting mail router"
    );

    let gateway = Arc::new(ClassificationGateway::from_config(&config.classifier)?);
    let intake = start_intake(&config, Arc::clone(&gateway)).await?;

    let app = api::router(AppState {
        gateway,
        app_name: config.server.app_name.clone(),
    });
    let listener = bind(config.server.port).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Some((orchestrator, handle)) = intake {
        info!("Stopping intake scheduler");
        orchestrator.request_stop();
        if let Err(e) = handle.await {
            error!("Intake scheduler task failed: {e}");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer().with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-router.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

/// Authenticate the mailbox and spawn the recurring scan, if enabled.
///
/// Authentication failure is fatal: the service must not poll unauthenticated.
async fn start_intake(
    config: &AppConfig,
    gateway: Arc<ClassificationGateway>,
) -> Result<Option<(Arc<IntakeOrchestrator>, JoinHandle<()>)>> {
    if !config.intake.enabled {
        info!("Mailbox polling disabled");
        return Ok(None);
    }

    let flow = InstalledAppFlow::from_config(&config.mailbox)?;
    let mailbox = GmailMailbox::authenticate(config.mailbox.clone(), &flow).await?;

    let notifier = SlackNotifier::from_config(&config.notifier);
    if !notifier.is_configured() {
        warn!("SLACK_WEBHOOK_URL not set, notifications disabled");
    }

    let orchestrator = Arc::new(IntakeOrchestrator::new(
        Arc::new(mailbox),
        gateway,
        Arc::new(notifier),
        config.intake.clone(),
    ));
    let handle = spawn_intake_scheduler(Arc::clone(&orchestrator), config.intake.poll_interval);
    Ok(Some((orchestrator, handle)))
}

async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Server(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, "HTTP server listening");
    Ok(listener)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
