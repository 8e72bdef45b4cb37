//! Explicit execution environment for a pipeline run.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Working directory and environment every step runs with.
///
/// Steps never see ambient process state: the runner clears the child
/// environment and applies exactly these variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionContext {
    cwd: PathBuf,
    env: BTreeMap<String, String>,
}

impl ExecutionContext {
    /// Context with the given working directory and no environment.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            env: BTreeMap::new(),
        }
    }

    /// Capture the current process directory and environment.
    pub fn from_current_process() -> std::io::Result<Self> {
        Ok(Self {
            cwd: std::env::current_dir()?,
            env: std::env::vars().collect(),
        })
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Set (or override) a single variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set (or override) several variables.
    pub fn with_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// Deterministic SHA-256 of cwd and environment.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.cwd.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        // BTreeMap iterates in key order
        for (key, value) in &self.env {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Short digest (first 12 chars)
    pub fn short_digest(&self) -> String {
        self.digest()[..12].to_string()
    }
}
