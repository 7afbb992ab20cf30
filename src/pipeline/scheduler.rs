//! Recurring scan trigger.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::orchestrator::{IntakeOrchestrator, ScanOutcome, panic_message, wait_for_stop};

/// Spawn a background task that scans every `interval`, starting now.
///
/// The task exits once [`IntakeOrchestrator::request_stop`] is called; a
/// running scan finishes its current item first.
pub fn spawn_intake_scheduler(
    orchestrator: Arc<IntakeOrchestrator>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Intake scheduler started, scanning every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop = orchestrator.subscribe_stop();

        // First tick completes immediately
        loop {
            tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop) => break,
                _ = tick.tick() => {}
            }
            run_cycle(&orchestrator).await;
        }

        info!("Intake scheduler shutting down");
    })
}

/// One scan, with panics contained so the schedule keeps going.
async fn run_cycle(orchestrator: &IntakeOrchestrator) {
    match AssertUnwindSafe(orchestrator.scan()).catch_unwind().await {
        Ok(ScanOutcome::Completed(report)) if report.fetched > 0 => info!(
            fetched = report.fetched,
            classified = report.classified,
            failed = report.failed,
            stopped_early = report.stopped_early,
            "Scan finished"
        ),
        Ok(ScanOutcome::Completed(_)) => debug!("Scan finished, inbox empty"),
        Ok(ScanOutcome::Skipped) => debug!("Scan skipped"),
        Err(panic) => error!("Scan cycle panicked: {}", panic_message(&*panic)),
    }
}
