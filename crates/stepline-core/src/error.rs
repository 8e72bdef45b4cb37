//! Error types for pipeline definition and execution

use crate::runner::StepResult;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline has no steps")]
    EmptyPipeline,

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Invalid artifact pattern '{pattern}': {reason}")]
    InvalidArtifactPattern { pattern: String, reason: String },

    /// The step's command could not be located or started.
    ///
    /// `completed` holds the results of the steps that ran before it.
    #[error("Step '{step}' could not be started: {source}")]
    StepNotFound {
        step: String,
        #[source]
        source: std::io::Error,
        completed: Vec<StepResult>,
    },

    #[error("Invalid run status transition: {current} -> {requested}")]
    InvalidStatusTransition { current: String, requested: String },

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
