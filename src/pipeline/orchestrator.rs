//! Intake scan: unread mail → classify → mark processed → notify.
//!
//! One scan at a time. The [`ScanGate`] is a two-state flag released by
//! [`ScanPermit`]'s `Drop`, so every exit path (including unwinding)
//! returns it to `Idle`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::classify::ClassificationGateway;
use crate::config::IntakeConfig;
use crate::error::PipelineError;
use crate::mailbox::{MailMessage, Mailbox};
use crate::notify::{NotificationContext, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// In-process single-flight guard for scans.
#[derive(Debug, Default)]
pub struct ScanGate {
    scanning: AtomicBool,
}

impl ScanGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Idle → Scanning` if free; `None` when a scan is already running.
    pub fn try_acquire(&self) -> Option<ScanPermit<'_>> {
        self.scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ScanPermit { gate: self })
    }

    pub fn state(&self) -> ScanState {
        if self.scanning.load(Ordering::Acquire) {
            ScanState::Scanning
        } else {
            ScanState::Idle
        }
    }
}

/// Held for the duration of one scan.
#[derive(Debug)]
pub struct ScanPermit<'a> {
    gate: &'a ScanGate,
}

impl Drop for ScanPermit<'_> {
    fn drop(&mut self) {
        self.gate.scanning.store(false, Ordering::Release);
    }
}

/// Counts for one completed scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub fetched: usize,
    pub classified: usize,
    pub failed: usize,
    /// A stop request ended the scan before the batch was exhausted.
    pub stopped_early: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another scan held the gate, or shutdown was requested.
    Skipped,
    Completed(ScanReport),
}

/// Drives the mailbox → classifier → notifier pipeline.
pub struct IntakeOrchestrator {
    mailbox: Arc<dyn Mailbox>,
    classifier: Arc<ClassificationGateway>,
    notifier: Arc<dyn Notifier>,
    config: IntakeConfig,
    gate: ScanGate,
    stop_tx: watch::Sender<bool>,
}

impl IntakeOrchestrator {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        classifier: Arc<ClassificationGateway>,
        notifier: Arc<dyn Notifier>,
        config: IntakeConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            mailbox,
            classifier,
            notifier,
            config,
            gate: ScanGate::new(),
            stop_tx,
        }
    }

    pub fn state(&self) -> ScanState {
        self.gate.state()
    }

    /// Ask the current scan to stop after its item and refuse new scans.
    pub fn request_stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Process one batch of unread mail.
    ///
    /// Per-item failures (errors and panics) are contained: the item is
    /// logged, reported to the notifier, and the loop moves on.
    pub async fn scan(&self) -> ScanOutcome {
        let Some(_permit) = self.gate.try_acquire() else {
            debug!("Scan already in progress, ignoring trigger");
            return ScanOutcome::Skipped;
        };
        if self.is_stopping() {
            debug!("Shutdown requested, not starting scan");
            return ScanOutcome::Skipped;
        }

        let messages = self.mailbox.list_unread(self.config.batch_size).await;
        let mut report = ScanReport {
            fetched: messages.len(),
            ..ScanReport::default()
        };
        if messages.is_empty() {
            debug!("No unread emails");
            return ScanOutcome::Completed(report);
        }

        info!("Processing {} unread email(s)", messages.len());

        for (idx, message) in messages.iter().enumerate() {
            if idx > 0 && !self.pause_between_items().await {
                info!(remaining = messages.len() - idx, "Stopping scan for shutdown");
                report.stopped_early = true;
                break;
            }

            let outcome = AssertUnwindSafe(self.process_item(message))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PipelineError::Panicked(panic_message(&*panic))));

            match outcome {
                Ok(()) => report.classified += 1,
                Err(e) => {
                    report.failed += 1;
                    self.handle_failure(message, &e).await;
                }
            }
        }

        ScanOutcome::Completed(report)
    }

    async fn process_item(&self, message: &MailMessage) -> Result<(), PipelineError> {
        debug!(id = %message.id, "Processing email\n{}", message.text_summary());
        let result = self.classifier.classify(&message.body).await?;
        let (category, confidence) = result.primary().ok_or(PipelineError::NoLabels)?;

        self.mailbox.mark_processed(&message.id).await;

        let summary = format!(
            "Email from {} classified as *{}* with {:.2}% confidence",
            message.sender,
            category,
            confidence * 100.0
        );
        let context = NotificationContext::from(message);
        self.notifier.notify(&summary, Some(&context)).await;

        info!(
            id = %message.id,
            subject = %message.subject,
            category = %category,
            confidence,
            "Email classified"
        );
        Ok(())
    }

    async fn handle_failure(&self, message: &MailMessage, err: &PipelineError) {
        error!(
            id = %message.id,
            subject = %message.subject,
            error = %err,
            "Failed to process email"
        );

        // No text to classify will never change; anything else is retried next cycle.
        if err.is_permanent() {
            warn!(id = %message.id, "Marking unclassifiable email as processed");
            self.mailbox.mark_processed(&message.id).await;
        }

        let text = format!("❌ Error processing email '{}': {}", message.subject, err);
        self.notifier.notify(&text, None).await;
    }

    /// Sleep the inter-item delay. `false` if a stop was requested.
    async fn pause_between_items(&self) -> bool {
        let mut stop = self.subscribe_stop();
        tokio::select! {
            biased;
            _ = wait_for_stop(&mut stop) => false,
            _ = tokio::time::sleep(self.config.item_delay) => !self.is_stopping(),
        }
    }
}

/// Resolves once a stop is requested (or the orchestrator is gone).
pub(crate) async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
