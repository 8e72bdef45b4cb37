//! Single step execution.

use crate::artifacts::ArtifactMatch;
use crate::context::ExecutionContext;
use crate::step::Step;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Minimum time spent draining pipes once the child has exited or been killed.
/// Background processes holding the pipes open must not stall the pipeline.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How a step's process ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepStatus {
    /// Process exited with a code.
    Exited { code: i32 },

    /// Process was terminated by a signal.
    Terminated,

    /// Process exceeded its time budget and was killed.
    TimedOut { timeout_secs: u64 },
}

impl StepStatus {
    pub fn success(&self) -> bool {
        matches!(self, StepStatus::Exited { code: 0 })
    }
}

/// Why a step counts as failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Ran and returned non-zero (or was terminated).
    StepExecutionFailure,

    /// Exceeded its time budget.
    StepTimeout,
}

/// Raw outcome of running a step's process.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub status: StepStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Result of a finished step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepResult {
    /// Step name.
    pub step_name: String,

    /// How the process ended.
    pub status: StepStatus,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// One entry per declared artifact pattern. Empty for failed steps.
    pub artifacts: Vec<ArtifactMatch>,
}

impl StepResult {
    pub fn new(step_name: impl Into<String>, output: StepOutput, artifacts: Vec<ArtifactMatch>) -> Self {
        let artifacts = if output.status.success() {
            artifacts
        } else {
            Vec::new()
        };
        Self {
            step_name: step_name.into(),
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
            artifacts,
        }
    }

    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.status.success()
    }

    /// Exit code, if the process exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            StepStatus::Exited { code } => Some(code),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.status {
            StepStatus::Exited { code: 0 } => None,
            StepStatus::Exited { .. } | StepStatus::Terminated => {
                Some(FailureKind::StepExecutionFailure)
            }
            StepStatus::TimedOut { .. } => Some(FailureKind::StepTimeout),
        }
    }

    /// All matched artifact paths in declaration order.
    pub fn artifact_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.artifacts.iter().flat_map(|m| m.paths.iter())
    }
}

/// Spawns a step's command inside an [`ExecutionContext`].
#[derive(Debug, Clone, Default)]
pub struct StepRunner {
    default_timeout_secs: Option<u64>,
}

impl StepRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout applied to steps that do not declare their own. Zero disables it.
    pub fn with_default_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.default_timeout_secs = (timeout_secs > 0).then_some(timeout_secs);
        self
    }

    /// Effective timeout for `step`.
    pub fn timeout_for(&self, step: &Step) -> Option<u64> {
        step.timeout_secs().or(self.default_timeout_secs)
    }

    /// Run `step` to completion or timeout.
    ///
    /// Returns `Err` only when the process could not be started.
    pub async fn execute(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
    ) -> std::io::Result<StepOutput> {
        let start = Instant::now();

        let mut child = Command::new(step.program())
            .args(step.args())
            .current_dir(ctx.cwd())
            .env_clear()
            .envs(ctx.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        debug!(step = %step.name(), pid = ?child.id(), "spawned step process");

        // Take the pipes so the child can still be killed on timeout.
        let stdout_drain = PipeDrain::spawn(child.stdout.take());
        let stderr_drain = PipeDrain::spawn(child.stderr.take());

        let timeout_secs = self.timeout_for(step);
        let deadline = timeout_secs.map(|secs| start + Duration::from_secs(secs));
        let status = match timeout_secs {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                    Ok(status) => Some(status?),
                    Err(_) => {
                        warn!(step = %step.name(), timeout_secs = secs, "step timed out, killing process");
                        if let Err(e) = child.kill().await {
                            warn!(step = %step.name(), error = %e, "failed to kill timed-out step");
                        }
                        None
                    }
                }
            }
            None => Some(child.wait().await?),
        };

        // The child is gone; whatever still holds the pipes gets the rest of
        // the step budget, and never less than the grace period.
        let drain_limit = deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
            .max(DRAIN_GRACE);
        let ((stdout, stdout_complete), (stderr, stderr_complete)) = tokio::join!(
            stdout_drain.finish(drain_limit),
            stderr_drain.finish(drain_limit)
        );
        if !(stdout_complete && stderr_complete) {
            warn!(
                step = %step.name(),
                drain_ms = drain_limit.as_millis() as u64,
                "step output still held open by background processes, output truncated"
            );
        }

        let status = match status {
            Some(status) => match status.code() {
                Some(code) => StepStatus::Exited { code },
                None => StepStatus::Terminated,
            },
            None => StepStatus::TimedOut {
                timeout_secs: timeout_secs.unwrap_or_default(),
            },
        };

        Ok(StepOutput {
            status,
            stdout,
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Reads one pipe in its own task. Bytes read so far survive an abort.
struct PipeDrain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl PipeDrain {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                }
            }
        });
        Self { buf, handle }
    }

    /// Wait up to `limit` for EOF. The flag is false when the read was cut short.
    async fn finish(self, limit: Duration) -> (String, bool) {
        let abort = self.handle.abort_handle();
        let complete = tokio::time::timeout(limit, self.handle).await.is_ok();
        if !complete {
            abort.abort();
        }
        let bytes = std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner));
        (String::from_utf8_lossy(&bytes).into_owned(), complete)
    }
}
