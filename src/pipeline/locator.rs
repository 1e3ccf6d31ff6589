//! Finding the artifact a generated program produced.
//!
//! A file counts as a candidate only if it
//! - has the expected extension (case-insensitive),
//! - is a regular file, not a symlink,
//! - is not the program source itself,
//! - was created or modified by this execution: absent from the
//!   pre-execution snapshot (or changed since) and with an mtime inside the
//!   execution window.
//!
//! Exactly one candidate is required. Several candidates are reported as an
//! ambiguity instead of picking one.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use super::types::{Artifact, CorrelationId, ExecutionResult, normalize_extension};
use super::workspace::{Workspace, WorkspaceSnapshot};
use crate::errors::LocateError;

/// Tolerance for filesystems whose timestamps are coarser than the clock.
/// An accepted mtime is clamped into the window, so `produced_at` never
/// precedes the start of execution.
pub const MTIME_SLACK: Duration = Duration::from_secs(1);

pub struct ArtifactLocator {
    extension: String,
}

impl ArtifactLocator {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: normalize_extension(extension),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Locate the single artifact produced by `execution` in `workspace`.
    ///
    /// `expected` is the correlation id of the request being served; a
    /// workspace owned by any other request is refused outright.
    pub fn locate(
        &self,
        workspace: &Workspace,
        expected: CorrelationId,
        baseline: &WorkspaceSnapshot,
        execution: &ExecutionResult,
    ) -> Result<Artifact, LocateError> {
        if workspace.correlation_id() != expected {
            return Err(LocateError::CorrelationMismatch {
                expected,
                found: workspace.correlation_id(),
            });
        }

        let mut candidates = Vec::new();
        for entry in WalkDir::new(workspace.path()).follow_links(false) {
            let entry = entry.map_err(|e| LocateError::Io {
                path: workspace.path().to_path_buf(),
                source: e.into(),
            })?;
            // `file_type` comes from lstat, so symlinks are never files here.
            if !entry.file_type().is_file() || entry.path() == execution.program_path {
                continue;
            }
            if !self.matches_extension(entry.path()) {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| LocateError::Io {
                path: entry.path().to_path_buf(),
                source: e.into(),
            })?;
            let modified = metadata.modified().map_err(|source| LocateError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;

            if baseline.is_unchanged(entry.path(), modified) {
                tracing::debug!(file = %entry.path().display(), "skipping pre-existing file");
                continue;
            }
            if !execution.window.contains(modified, MTIME_SLACK) {
                tracing::debug!(file = %entry.path().display(), "skipping file outside execution window");
                continue;
            }
            candidates.push((entry.into_path(), metadata.len(), modified));
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        match candidates.len() {
            0 => Err(LocateError::NotFound {
                extension: self.extension.clone(),
                workspace: workspace.path().to_path_buf(),
            }),
            1 => {
                let (path, size_bytes, modified) = candidates.remove(0);
                if !workspace.contains(&path) {
                    return Err(LocateError::OutsideWorkspace { path });
                }
                Ok(Artifact {
                    path,
                    size_bytes,
                    produced_at: DateTime::<Utc>::from(execution.window.clamp(modified)),
                    correlation_id: expected,
                    extension: self.extension.clone(),
                })
            }
            _ => Err(LocateError::Ambiguous {
                extension: self.extension.clone(),
                candidates: candidates.into_iter().map(|(path, _, _)| path).collect(),
            }),
        }
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| normalize_extension(ext) == self.extension)
    }
}
