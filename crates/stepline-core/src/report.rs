//! Structured run report and process exit-code mapping.

use crate::pipeline::{PipelineRun, RunStatus};
use crate::runner::{FailureKind, StepResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Process exit codes.
pub mod exit_codes {
    /// Every step passed.
    pub const SUCCESS: u8 = 0;
    /// A step exited non-zero or was terminated.
    pub const STEP_FAILED: u8 = 1;
    /// The pipeline definition or configuration was invalid.
    pub const CONFIG_ERROR: u8 = 2;
    /// The runner itself failed after the definition was accepted.
    pub const RUNTIME_ERROR: u8 = 3;
    /// A step exceeded its time budget.
    pub const STEP_TIMEOUT: u8 = 124;
    /// A step's command could not be started.
    pub const STEP_NOT_FOUND: u8 = 127;
}

/// How the run ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    FailedAt { step: String, failure: FailureKind },
    StepNotFound { step: String, error: String },
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Succeeded => exit_codes::SUCCESS,
            Outcome::FailedAt {
                failure: FailureKind::StepExecutionFailure,
                ..
            } => exit_codes::STEP_FAILED,
            Outcome::FailedAt {
                failure: FailureKind::StepTimeout,
                ..
            } => exit_codes::STEP_TIMEOUT,
            Outcome::StepNotFound { .. } => exit_codes::STEP_NOT_FOUND,
        }
    }
}

/// Serializable summary of a pipeline run, handed to downstream tooling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub pipeline: String,

    /// Absent when the run aborted before producing a record.
    pub run_id: Option<String>,

    #[serde(flatten)]
    pub outcome: Outcome,

    pub exit_code: u8,

    pub pipeline_digest: Option<String>,
    pub context_digest: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Results of the steps that ran, in order.
    pub steps: Vec<StepResult>,

    /// Every matched artifact path, flattened.
    pub artifacts: Vec<PathBuf>,
}

impl RunReport {
    /// Report for a finalized run.
    pub fn from_run(pipeline: &str, run: &PipelineRun) -> Self {
        let outcome = match run.status() {
            RunStatus::FailedAt { step } => Outcome::FailedAt {
                step: step.clone(),
                failure: run
                    .failed_step()
                    .and_then(StepResult::failure_kind)
                    .unwrap_or(FailureKind::StepExecutionFailure),
            },
            // A run handed to a report is terminal.
            RunStatus::Succeeded | RunStatus::Running => Outcome::Succeeded,
        };

        Self {
            pipeline: pipeline.to_string(),
            run_id: Some(run.run_id().to_string()),
            exit_code: outcome.exit_code(),
            outcome,
            pipeline_digest: Some(run.pipeline_digest().to_string()),
            context_digest: Some(run.context_digest().to_string()),
            started_at: Some(run.started_at()),
            finished_at: run.finished_at(),
            steps: run.steps().to_vec(),
            artifacts: run.artifact_paths(),
        }
    }

    /// Report for a run aborted because `step` could not be started.
    pub fn from_not_found(
        pipeline: &str,
        step: &str,
        error: &dyn std::fmt::Display,
        completed: &[StepResult],
    ) -> Self {
        let outcome = Outcome::StepNotFound {
            step: step.to_string(),
            error: error.to_string(),
        };
        Self {
            pipeline: pipeline.to_string(),
            run_id: None,
            exit_code: outcome.exit_code(),
            outcome,
            pipeline_digest: None,
            context_digest: None,
            started_at: None,
            finished_at: None,
            steps: completed.to_vec(),
            artifacts: completed
                .iter()
                .flat_map(|s| s.artifact_paths().cloned())
                .collect(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactMatch;
    use crate::runner::{StepOutput, StepStatus};

    fn step(name: &str, status: StepStatus, artifacts: Vec<ArtifactMatch>) -> StepResult {
        StepResult::new(
            name,
            StepOutput {
                status,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 1,
            },
            artifacts,
        )
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Outcome::Succeeded.exit_code(), 0);
        assert_eq!(
            Outcome::FailedAt {
                step: "build".to_string(),
                failure: FailureKind::StepExecutionFailure
            }
            .exit_code(),
            1
        );
        assert_eq!(
            Outcome::FailedAt {
                step: "run".to_string(),
                failure: FailureKind::StepTimeout
            }
            .exit_code(),
            124
        );
        assert_eq!(
            Outcome::StepNotFound {
                step: "run".to_string(),
                error: "missing".to_string()
            }
            .exit_code(),
            127
        );
    }

    #[test]
    fn test_report_from_run_failure() {
        let mut run = PipelineRun::start("p".to_string(), "c".to_string());
        run.record(step("build", StepStatus::TimedOut { timeout_secs: 2 }, vec![]))
            .unwrap();

        let report = RunReport::from_run("image", &run);
        assert!(!report.is_success());
        assert_eq!(report.exit_code, exit_codes::STEP_TIMEOUT);
        assert_eq!(
            report.outcome,
            Outcome::FailedAt {
                step: "build".to_string(),
                failure: FailureKind::StepTimeout
            }
        );
        assert!(report.artifacts.is_empty());
    }

    #[test]
    fn test_report_from_not_found_keeps_completed() {
        let completed = vec![step(
            "build",
            StepStatus::Exited { code: 0 },
            vec![ArtifactMatch {
                pattern: "out/img.tar".to_string(),
                paths: vec![PathBuf::from("out/img.tar")],
            }],
        )];
        let report = RunReport::from_not_found("image", "run", &"No such file", &completed);
        assert_eq!(report.exit_code, exit_codes::STEP_NOT_FOUND);
        assert!(report.run_id.is_none());
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.artifacts, vec![PathBuf::from("out/img.tar")]);
    }

    #[test]
    fn test_report_json_shape() {
        let mut run = PipelineRun::start("p".to_string(), "c".to_string());
        run.record(step("build", StepStatus::Exited { code: 0 }, vec![]))
            .unwrap();
        run.finish().unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&RunReport::from_run("image", &run).to_json_pretty().unwrap())
                .unwrap();
        assert_eq!(json["outcome"], "succeeded");
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["steps"][0]["step_name"], "build");
        assert_eq!(json["steps"][0]["status"]["kind"], "exited");
    }
}
