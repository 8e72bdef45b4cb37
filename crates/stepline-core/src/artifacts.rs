//! Artifact glob compilation and resolution against the workspace.
//!
//! Patterns use `globset` syntax with a literal separator: `*` stays within
//! one path component and `**` crosses directories. Patterns without glob
//! metacharacters are resolved by a direct existence check; the rest share a
//! single sorted directory walk of the workspace root.

use crate::error::{PipelineError, Result};
use globset::{Glob, GlobBuilder, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}', '\\'];

/// A validated artifact pattern, relative to the workspace root.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    raw: String,
    normalized: String,
    glob: Option<Glob>,
}

impl ArtifactPattern {
    /// Validate and compile a pattern.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| PipelineError::InvalidArtifactPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("pattern is empty"));
        }
        if Path::new(trimmed).is_absolute() {
            return Err(invalid("pattern must be relative to the workspace"));
        }
        if Path::new(trimmed)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(invalid("pattern must stay inside the workspace"));
        }

        let normalized = trimmed.trim_start_matches("./").to_string();
        let glob = if normalized.contains(GLOB_META) {
            let glob = GlobBuilder::new(&normalized)
                .literal_separator(true)
                .build()
                .map_err(|e| invalid(&e.kind().to_string()))?;
            Some(glob)
        } else {
            None
        };

        Ok(Self {
            raw: raw.to_string(),
            normalized,
            glob,
        })
    }

    /// The pattern as declared.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains glob metacharacters.
    pub fn is_glob(&self) -> bool {
        self.glob.is_some()
    }
}

/// Paths matched by one declared pattern. An empty match is kept and reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactMatch {
    /// Pattern as declared on the step.
    pub pattern: String,

    /// Workspace-relative matched paths, sorted.
    pub paths: Vec<PathBuf>,
}

impl ArtifactMatch {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Resolve every pattern against `root`, preserving declaration order.
///
/// Literal patterns match any existing path (file or directory). Glob
/// patterns match regular files only.
pub fn resolve_all(root: &Path, patterns: &[ArtifactPattern]) -> Result<Vec<ArtifactMatch>> {
    let mut matches: Vec<ArtifactMatch> = patterns
        .iter()
        .map(|p| ArtifactMatch {
            pattern: p.raw.clone(),
            paths: Vec::new(),
        })
        .collect();

    // Index of each glob in the set -> index of its pattern.
    let mut glob_owner = Vec::new();
    let mut builder = GlobSetBuilder::new();

    for (idx, pattern) in patterns.iter().enumerate() {
        match &pattern.glob {
            Some(glob) => {
                builder.add(glob.clone());
                glob_owner.push(idx);
            }
            None => {
                if root.join(&pattern.normalized).exists() {
                    matches[idx].paths.push(PathBuf::from(&pattern.normalized));
                }
            }
        }
    }

    if !glob_owner.is_empty() {
        let set = builder
            .build()
            .map_err(|e| PipelineError::InvalidArtifactPattern {
                pattern: e.glob().unwrap_or_default().to_string(),
                reason: e.kind().to_string(),
            })?;

        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable workspace entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel_path) = entry.path().strip_prefix(root) else {
                continue;
            };
            for hit in set.matches(rel_path) {
                matches[glob_owner[hit]].paths.push(rel_path.to_path_buf());
            }
        }
    }

    for m in &mut matches {
        m.paths.sort();
        m.paths.dedup();
    }

    Ok(matches)
}
