//! stepline - fail-fast pipeline runner
//!
//! Runs an ordered list of named external commands against a workspace:
//! - Steps execute strictly in order, one at a time
//! - The first failing step halts the pipeline
//! - Declared artifact globs are resolved after each passing step
//! - Every run is journaled and summarised as a [`PipelineRun`]

pub mod artifacts;
pub mod context;
pub mod error;
pub mod gate;
pub mod journal;
pub mod obs;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod step;
pub mod telemetry;

// Re-export key types
pub use artifacts::{ArtifactMatch, ArtifactPattern};
pub use context::ExecutionContext;
pub use error::{PipelineError, Result};
pub use gate::{GateVerdict, RunGate};
pub use journal::{MemoryJournal, NullJournal, RunEvent, RunEventKind, RunJournal};
pub use pipeline::{run, Pipeline, PipelineRun, RunStatus};
pub use report::{exit_codes, Outcome, RunReport};
pub use runner::{FailureKind, StepOutput, StepResult, StepRunner, StepStatus};
pub use step::Step;
pub use telemetry::init_tracing;
