//! Run journal: the append-only event stream of a pipeline run.
//!
//! The pipeline appends one sequenced [`RunEvent`] per lifecycle transition.
//! Journals are backend-agnostic; [`MemoryJournal`] keeps events in memory
//! and [`NullJournal`] discards them.

use crate::error::{PipelineError, Result};
use crate::pipeline::RunStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// A single journaled event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,

    /// What happened.
    #[serde(flatten)]
    pub kind: RunEventKind,

    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted {
        run_id: String,
        steps: Vec<String>,
    },
    StepStarted {
        step: String,
        command: Vec<String>,
        timeout_secs: Option<u64>,
    },
    StepFinished {
        step: String,
        exit_code: i32,
        duration_ms: u64,
    },
    StepFailed {
        step: String,
        exit_code: Option<i32>,
        duration_ms: u64,
        error: String,
    },
    StepTimedOut {
        step: String,
        timeout_secs: u64,
        duration_ms: u64,
    },
    StepNotFound {
        step: String,
        error: String,
    },
    ArtifactsResolved {
        step: String,
        pattern: String,
        matched: usize,
    },
    RunFinished {
        status: RunStatus,
        duration_ms: u64,
    },
}

impl RunEventKind {
    /// Snake-case event name, as serialized in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            RunEventKind::RunStarted { .. } => "run_started",
            RunEventKind::StepStarted { .. } => "step_started",
            RunEventKind::StepFinished { .. } => "step_finished",
            RunEventKind::StepFailed { .. } => "step_failed",
            RunEventKind::StepTimedOut { .. } => "step_timed_out",
            RunEventKind::StepNotFound { .. } => "step_not_found",
            RunEventKind::ArtifactsResolved { .. } => "artifacts_resolved",
            RunEventKind::RunFinished { .. } => "run_finished",
        }
    }
}

/// Sink for run events.
#[async_trait]
pub trait RunJournal: Send + Sync {
    /// Append one event. Events arrive in `seq` order.
    async fn append(&self, event: RunEvent) -> Result<()>;
}

/// Journal that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<RunEvent>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events appended so far.
    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RunJournal for MemoryJournal {
    async fn append(&self, event: RunEvent) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| PipelineError::Journal(e.to_string()))?;
        if let Some(last) = events.last() {
            if event.seq <= last.seq {
                return Err(PipelineError::Journal(format!(
                    "out-of-order event seq {} after {}",
                    event.seq, last.seq
                )));
            }
        }
        events.push(event);
        Ok(())
    }
}

/// Journal that discards events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJournal;

#[async_trait]
impl RunJournal for NullJournal {
    async fn append(&self, _event: RunEvent) -> Result<()> {
        Ok(())
    }
}
