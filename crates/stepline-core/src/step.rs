//! Step definitions.

use crate::artifacts::ArtifactPattern;
use crate::error::{PipelineError, Result};

/// One named unit of work: an external command plus the artifact globs it
/// is expected to produce.
///
/// Steps are validated on construction and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Step {
    name: String,
    command: Vec<String>,
    artifacts: Vec<ArtifactPattern>,
    timeout_secs: Option<u64>,
}

impl Step {
    /// Create a step running `command` (first element is the executable).
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::InvalidStep("step name is empty".to_string()));
        }
        match command.first() {
            None => {
                return Err(PipelineError::InvalidStep(format!(
                    "step '{}' has empty command",
                    name
                )))
            }
            Some(program) if program.trim().is_empty() => {
                return Err(PipelineError::InvalidStep(format!(
                    "step '{}' has empty program",
                    name
                )))
            }
            Some(_) => {}
        }

        Ok(Self {
            name,
            command,
            artifacts: Vec::new(),
            timeout_secs: None,
        })
    }

    /// Create a step running `script` through `sh -c`.
    pub fn shell(name: impl Into<String>, script: impl Into<String>) -> Result<Self> {
        Self::new(name, vec!["sh".to_string(), "-c".to_string(), script.into()])
    }

    /// Declare the artifact globs this step produces, in order.
    pub fn with_artifacts<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.artifacts = patterns
            .into_iter()
            .map(|p| ArtifactPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Set a time budget for this step. Zero disables the timeout.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = (timeout_secs > 0).then_some(timeout_secs);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn program(&self) -> &str {
        &self.command[0]
    }

    pub fn args(&self) -> &[String] {
        &self.command[1..]
    }

    pub fn artifacts(&self) -> &[ArtifactPattern] {
        &self.artifacts
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    /// Command rendered for logs and reports.
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}
