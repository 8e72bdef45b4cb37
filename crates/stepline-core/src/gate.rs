//! Gate evaluation over a run journal.

use crate::journal::{RunEvent, RunEventKind};
use crate::pipeline::RunStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Pass/fail rules over journaled events.
pub struct RunGate;

impl RunGate {
    /// Evaluate a run's events.
    ///
    /// Gate rule:
    /// - Every `step_started` must be followed by a terminal step event
    ///   (`step_finished`, `step_failed`, `step_timed_out`, `step_not_found`)
    /// - Any failed, timed-out or unstartable step is a violation
    /// - A started run must end with `run_finished` reporting `succeeded`
    pub fn evaluate(events: &[RunEvent]) -> GateVerdict {
        let mut violations = Vec::new();

        let mut started = BTreeSet::new();
        let mut completed = BTreeSet::new();
        let mut run_started = false;
        let mut final_status = None;

        for event in events {
            match &event.kind {
                RunEventKind::RunStarted { .. } => run_started = true,
                RunEventKind::StepStarted { step, .. } => {
                    started.insert(step.clone());
                }
                RunEventKind::StepFinished {
                    step, exit_code, ..
                } => {
                    completed.insert(step.clone());
                    if *exit_code != 0 {
                        violations.push(format!(
                            "Step '{}' finished with non-zero exit code: {}",
                            step, exit_code
                        ));
                    }
                }
                RunEventKind::StepFailed { step, error, .. } => {
                    completed.insert(step.clone());
                    violations.push(format!("Step '{}' failed: {}", step, error));
                }
                RunEventKind::StepTimedOut {
                    step, timeout_secs, ..
                } => {
                    completed.insert(step.clone());
                    violations.push(format!(
                        "Step '{}' timed out after {} seconds",
                        step, timeout_secs
                    ));
                }
                RunEventKind::StepNotFound { step, error } => {
                    completed.insert(step.clone());
                    violations.push(format!("Step '{}' could not be started: {}", step, error));
                }
                RunEventKind::ArtifactsResolved { .. } => {}
                RunEventKind::RunFinished { status, .. } => final_status = Some(status.clone()),
            }
        }

        for step in started.difference(&completed) {
            violations.push(format!("Step '{}' was started but never completed", step));
        }

        match final_status {
            Some(RunStatus::Succeeded) => {}
            Some(RunStatus::FailedAt { step }) => {
                if !violations.iter().any(|v| v.contains(&format!("'{}'", step))) {
                    violations.push(format!("Run failed at step '{}'", step));
                }
            }
            Some(RunStatus::Running) => {
                violations.push("Run finished while still marked running".to_string());
            }
            None if run_started => violations.push("Run never finished".to_string()),
            None => {}
        }

        let passed = violations.is_empty();
        let message = if passed {
            "All steps passed".to_string()
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}
