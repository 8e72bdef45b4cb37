//! Pipeline definition files.
//!
//! A definition is TOML (default) or JSON (`.json` extension):
//!
//! ```toml
//! name = "image"
//! workdir = "."
//! default_timeout_secs = 1800
//!
//! [env]
//! IMAGE_TAG = "latest"
//!
//! [[steps]]
//! name = "build"
//! run = "./scripts/image-build.sh"
//! artifacts = ["out/img.tar"]
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stepline_core::{Pipeline, Step, StepRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Toml,
        }
    }
}

/// On-disk pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    /// Pipeline name (defaults to the file stem).
    #[serde(default)]
    pub name: Option<String>,

    /// Working directory, relative to the definition file.
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Timeout for steps that do not declare one.
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Variables layered over the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    pub steps: Vec<StepDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StepDef {
    pub name: String,

    /// Shell script, run with `sh -c`.
    #[serde(default)]
    pub run: Option<String>,

    /// Argv, first element is the executable.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default)]
    pub artifacts: Vec<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StepDef {
    pub fn into_step(self) -> Result<Step> {
        let step = match (self.run, self.command) {
            (Some(script), None) => Step::shell(&self.name, script),
            (None, Some(command)) => Step::new(&self.name, command),
            (Some(_), Some(_)) => bail!("step '{}' sets both `run` and `command`", self.name),
            (None, None) => bail!("step '{}' needs one of `run` or `command`", self.name),
        }?;
        let step = step.with_artifacts(&self.artifacts)?;
        Ok(match self.timeout_secs {
            Some(secs) => step.with_timeout_secs(secs),
            None => step,
        })
    }
}

/// A definition turned into runnable parts.
#[derive(Debug, Clone)]
pub struct LoadedPipeline {
    pub pipeline: Pipeline,
    pub workdir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl PipelineFile {
    pub fn parse(contents: &str, format: Format) -> Result<Self> {
        match format {
            Format::Toml => toml::from_str(contents).context("invalid TOML pipeline definition"),
            Format::Json => {
                serde_json::from_str(contents).context("invalid JSON pipeline definition")
            }
        }
    }

    /// Read and parse a definition file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline file {}", path.display()))?;
        Self::parse(&contents, Format::from_path(path))
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Validate steps and resolve the working directory against `base_dir`.
    pub fn build(self, default_name: &str, base_dir: &Path) -> Result<LoadedPipeline> {
        let name = self.name.unwrap_or_else(|| default_name.to_string());
        let steps = self
            .steps
            .into_iter()
            .map(StepDef::into_step)
            .collect::<Result<Vec<_>>>()?;

        let mut runner = StepRunner::new();
        if let Some(secs) = self.default_timeout_secs {
            runner = runner.with_default_timeout_secs(secs);
        }
        let pipeline = Pipeline::new(name, steps)?.with_runner(runner);

        let workdir = match self.workdir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };

        Ok(LoadedPipeline {
            pipeline,
            workdir,
            env: self.env,
        })
    }
}

/// Load `path` and build it, naming the pipeline after the file stem.
pub fn load_pipeline(path: &Path) -> Result<LoadedPipeline> {
    let file = PipelineFile::load(path)?;
    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("pipeline");
    let base_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    file.build(default_name, &base_dir)
}
