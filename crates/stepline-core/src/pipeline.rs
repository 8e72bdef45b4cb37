//! Fail-fast pipeline orchestration and run recording.

use crate::artifacts;
use crate::context::ExecutionContext;
use crate::error::{PipelineError, Result};
use crate::journal::{NullJournal, RunEvent, RunEventKind, RunJournal};
use crate::obs;
use crate::runner::{StepResult, StepRunner, StepStatus};
use crate::step::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Lifecycle state of a pipeline run. Transitions only move forward:
/// `running` to `succeeded` or `failed_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    FailedAt { step: String },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::FailedAt { step } => write!(f, "failed_at({})", step),
        }
    }
}

/// Record of one pipeline execution.
///
/// `status` is `failed_at(s)` exactly when the last result is `s` and it did
/// not pass. Once terminal, the record no longer accepts results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineRun {
    run_id: Uuid,
    pipeline_digest: String,
    context_digest: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    steps: Vec<StepResult>,
    status: RunStatus,
}

impl PipelineRun {
    pub(crate) fn start(pipeline_digest: String, context_digest: String) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_digest,
            context_digest,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            status: RunStatus::Running,
        }
    }

    /// Append a finished step. A failing step finalizes the run as `failed_at`.
    pub(crate) fn record(&mut self, result: StepResult) -> Result<()> {
        if self.status.is_terminal() {
            return Err(PipelineError::InvalidStatusTransition {
                current: self.status.to_string(),
                requested: format!("record({})", result.step_name),
            });
        }
        if !result.passed() {
            self.status = RunStatus::FailedAt {
                step: result.step_name.clone(),
            };
            self.finished_at = Some(Utc::now());
        }
        self.steps.push(result);
        Ok(())
    }

    /// Finalize a run whose steps all passed.
    pub(crate) fn finish(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(PipelineError::InvalidStatusTransition {
                current: self.status.to_string(),
                requested: RunStatus::Succeeded.to_string(),
            });
        }
        self.status = RunStatus::Succeeded;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn into_steps(self) -> Vec<StepResult> {
        self.steps
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pipeline_digest(&self) -> &str {
        &self.pipeline_digest
    }

    pub fn context_digest(&self) -> &str {
        &self.context_digest
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// The step the run failed at, if any.
    pub fn failed_step(&self) -> Option<&StepResult> {
        match &self.status {
            RunStatus::FailedAt { .. } => self.steps.last(),
            _ => None,
        }
    }

    /// Number of steps that passed.
    pub fn passed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.passed()).count()
    }

    /// Every matched artifact path, in step then declaration order.
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        self.steps
            .iter()
            .flat_map(|s| s.artifact_paths().cloned())
            .collect()
    }

    /// Wall-clock duration, once finished.
    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

/// Ordered, validated list of steps executed fail-fast.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    steps: Vec<Step>,
    runner: StepRunner,
}

impl Pipeline {
    /// Build a pipeline. Steps must be non-empty and uniquely named.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Result<Self> {
        if steps.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name()) {
                return Err(PipelineError::DuplicateStep(step.name().to_string()));
            }
        }
        Ok(Self {
            name: name.into(),
            steps,
            runner: StepRunner::new(),
        })
    }

    pub fn with_runner(mut self, runner: StepRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn runner(&self) -> &StepRunner {
        &self.runner
    }

    /// Deterministic SHA-256 over ordered step names and commands.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for step in &self.steps {
            hasher.update(step.name().as_bytes());
            hasher.update(b"\0");
            for arg in step.command() {
                hasher.update(arg.as_bytes());
                hasher.update(b"\0");
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Execute every step in order, stopping at the first failure.
    ///
    /// Returns the finalized run for both `succeeded` and `failed_at`.
    /// A step whose command cannot be started aborts with
    /// [`PipelineError::StepNotFound`] carrying the results completed so far.
    pub async fn run(
        &self,
        ctx: &ExecutionContext,
        journal: &dyn RunJournal,
    ) -> Result<PipelineRun> {
        let run = PipelineRun::start(self.digest(), ctx.digest());
        let span = obs::run_span(&run.run_id().to_string());
        self.execute(run, ctx, journal).instrument(span).await
    }

    async fn execute(
        &self,
        mut run: PipelineRun,
        ctx: &ExecutionContext,
        journal: &dyn RunJournal,
    ) -> Result<PipelineRun> {
        let start = Instant::now();
        let run_id = run.run_id().to_string();
        let mut sink = EventSink::new(journal);

        obs::emit_run_started(&run_id, &self.name, self.steps.len());
        sink.emit(RunEventKind::RunStarted {
            run_id: run_id.clone(),
            steps: self.steps.iter().map(|s| s.name().to_string()).collect(),
        })
        .await?;

        for step in &self.steps {
            obs::emit_step_started(step.name(), &step.display_command());
            sink.emit(RunEventKind::StepStarted {
                step: step.name().to_string(),
                command: step.command().to_vec(),
                timeout_secs: self.runner.timeout_for(step),
            })
            .await?;

            let output = match self.runner.execute(step, ctx).await {
                Ok(output) => output,
                Err(source) => {
                    obs::emit_step_not_found(step.name(), step.program(), &source);
                    sink.emit(RunEventKind::StepNotFound {
                        step: step.name().to_string(),
                        error: source.to_string(),
                    })
                    .await?;
                    return Err(PipelineError::StepNotFound {
                        step: step.name().to_string(),
                        source,
                        completed: run.into_steps(),
                    });
                }
            };

            let duration_ms = output.duration_ms;
            let event = match &output.status {
                StepStatus::Exited { code: 0 } => RunEventKind::StepFinished {
                    step: step.name().to_string(),
                    exit_code: 0,
                    duration_ms,
                },
                StepStatus::Exited { code } => RunEventKind::StepFailed {
                    step: step.name().to_string(),
                    exit_code: Some(*code),
                    duration_ms,
                    error: format!("Step '{}' exited with code {}", step.name(), code),
                },
                StepStatus::Terminated => RunEventKind::StepFailed {
                    step: step.name().to_string(),
                    exit_code: None,
                    duration_ms,
                    error: format!("Step '{}' was terminated by a signal", step.name()),
                },
                StepStatus::TimedOut { timeout_secs } => RunEventKind::StepTimedOut {
                    step: step.name().to_string(),
                    timeout_secs: *timeout_secs,
                    duration_ms,
                },
            };
            obs::emit_step_finished(step.name(), &output.status, duration_ms);
            sink.emit(event).await?;

            let artifacts = if output.status.success() {
                artifacts::resolve_all(ctx.cwd(), step.artifacts())?
            } else {
                Vec::new()
            };
            for matched in &artifacts {
                obs::emit_artifacts_resolved(step.name(), &matched.pattern, matched.paths.len());
                sink.emit(RunEventKind::ArtifactsResolved {
                    step: step.name().to_string(),
                    pattern: matched.pattern.clone(),
                    matched: matched.paths.len(),
                })
                .await?;
            }

            let result = StepResult::new(step.name(), output, artifacts);
            let passed = result.passed();
            run.record(result)?;
            if !passed {
                break;
            }
        }

        if !run.status().is_terminal() {
            run.finish()?;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_run_finished(&run_id, run.status(), run.steps().len(), duration_ms);
        sink.emit(RunEventKind::RunFinished {
            status: run.status().clone(),
            duration_ms,
        })
        .await?;

        Ok(run)
    }
}

/// Run `steps` in `ctx` without journaling.
pub async fn run(steps: Vec<Step>, ctx: &ExecutionContext) -> Result<PipelineRun> {
    Pipeline::new("pipeline", steps)?.run(ctx, &NullJournal).await
}

/// Sequences events into a journal.
struct EventSink<'a> {
    journal: &'a dyn RunJournal,
    seq: u64,
}

impl<'a> EventSink<'a> {
    fn new(journal: &'a dyn RunJournal) -> Self {
        Self { journal, seq: 0 }
    }

    async fn emit(&mut self, kind: RunEventKind) -> Result<()> {
        self.seq += 1;
        self.journal
            .append(RunEvent {
                seq: self.seq,
                kind,
                timestamp: Utc::now(),
            })
            .await
    }
}
