//! Structured observability hooks for the repair-loop lifecycle.
//!
//! Events are emitted at `info!` level; spans are run-scoped via the
//! [`RepairSpan`] RAII guard.

use tracing::info;

use crate::controller::RepairOutcome;
use crate::domain::{AttemptOutcome, ErrorKind, StrategyId};

/// RAII guard that enters a repair-run tracing span for the loop duration.
pub struct RepairSpan {
    _span: tracing::span::EnteredSpan,
}

impl RepairSpan {
    /// Create and enter a span tagged with the run id.
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("envfix.repair", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a creation attempt is starting.
pub fn emit_attempt_started(run_id: &str, attempt: u32, max_attempts: u32) {
    info!(
        event = "repair.attempt_started",
        run_id = %run_id,
        attempt = attempt,
        max_attempts = max_attempts,
    );
}

/// Emit event: the creation attempt failed with a classified error.
pub fn emit_attempt_failed(run_id: &str, attempt: u32, kind: ErrorKind, package: Option<&str>) {
    info!(
        event = "repair.attempt_failed",
        run_id = %run_id,
        attempt = attempt,
        kind = ?kind,
        package = package.unwrap_or("-"),
    );
}

/// Emit event: a fix decision was recorded.
pub fn emit_fix_applied(
    run_id: &str,
    attempt: u32,
    strategy: Option<StrategyId>,
    outcome: AttemptOutcome,
) {
    info!(
        event = "repair.fix_applied",
        run_id = %run_id,
        attempt = attempt,
        strategy = ?strategy,
        outcome = ?outcome,
    );
}

/// Emit event: the loop reached a terminal outcome.
pub fn emit_repair_finished(run_id: &str, outcome: RepairOutcome, attempts_used: u32) {
    info!(
        event = "repair.finished",
        run_id = %run_id,
        outcome = ?outcome,
        attempts_used = attempts_used,
    );
}
