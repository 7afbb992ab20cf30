//! Intake pipeline: the scan orchestrator and its scheduler.

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{IntakeOrchestrator, ScanGate, ScanOutcome, ScanPermit, ScanReport, ScanState};
pub use scheduler::spawn_intake_scheduler;
