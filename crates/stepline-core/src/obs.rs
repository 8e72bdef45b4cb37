//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via [`run_span`]
//! - Emission functions for key lifecycle events: run start, step start and
//!   finish, artifact resolution, run finish
//!
//! Events are emitted at `info!` level (failures at `warn!`), filtered by
//! `RUST_LOG`. JSON output is selected by the binary, see
//! [`crate::telemetry::init_tracing`].

use crate::pipeline::RunStatus;
use crate::runner::StepStatus;
use tracing::{info, warn};

/// Span tagged with the run id. Everything logged while a pipeline runs is
/// recorded inside it.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("stepline.run", run_id = %run_id)
}

/// Emit event: run started.
///
/// ```ignore
/// emit_run_started("9f1c...", "image", 3);
/// // logs: event=run.started run_id=9f1c... pipeline=image steps=3
/// ```
pub fn emit_run_started(run_id: &str, pipeline: &str, steps: usize) {
    info!(event = "run.started", run_id = %run_id, pipeline = %pipeline, steps = steps);
}

pub fn emit_step_started(step: &str, command: &str) {
    info!(event = "step.started", step = %step, command = %command);
}

/// Emit event: step process ended. Non-passing outcomes log at warn.
pub fn emit_step_finished(step: &str, status: &StepStatus, duration_ms: u64) {
    match status {
        StepStatus::Exited { code: 0 } => {
            info!(event = "step.finished", step = %step, exit_code = 0, duration_ms = duration_ms);
        }
        StepStatus::Exited { code } => {
            warn!(event = "step.failed", step = %step, exit_code = *code, duration_ms = duration_ms);
        }
        StepStatus::Terminated => {
            warn!(event = "step.failed", step = %step, signal = true, duration_ms = duration_ms);
        }
        StepStatus::TimedOut { timeout_secs } => {
            warn!(
                event = "step.timed_out",
                step = %step,
                timeout_secs = *timeout_secs,
                duration_ms = duration_ms,
            );
        }
    }
}

/// Emit event: step command could not be started.
pub fn emit_step_not_found(step: &str, program: &str, error: &dyn std::fmt::Display) {
    warn!(event = "step.not_found", step = %step, program = %program, error = %error);
}

/// Emit event: one artifact pattern resolved. Zero matches log at warn.
pub fn emit_artifacts_resolved(step: &str, pattern: &str, matched: usize) {
    if matched == 0 {
        warn!(event = "artifacts.empty", step = %step, pattern = %pattern);
    } else {
        info!(event = "artifacts.resolved", step = %step, pattern = %pattern, matched = matched);
    }
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, status: &RunStatus, steps_run: usize, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        steps_run = steps_run,
        duration_ms = duration_ms,
    );
}
