//! Request-scoped workspaces.
//!
//! Every pipeline run gets a fresh directory named after its correlation id
//! under a shared root. The directory is created exclusively (never reused),
//! owned by exactly one pipeline, and removed either right after the
//! artifact is handed over or after a retention period when the run failed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use super::types::CorrelationId;
use crate::errors::WorkspaceError;

/// An exclusive directory for one request.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
    correlation_id: CorrelationId,
}

impl Workspace {
    /// Create `<root>/<correlation_id>`. Fails if it already exists.
    pub fn create(root: &Path, correlation_id: CorrelationId) -> Result<Self, WorkspaceError> {
        std::fs::create_dir_all(root).map_err(|source| WorkspaceError::Create {
            path: root.to_path_buf(),
            source,
        })?;

        let dir = root.join(correlation_id.to_string());
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::AlreadyExists { path: dir });
            }
            Err(source) => return Err(WorkspaceError::Create { path: dir, source }),
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).map_err(
                |source| WorkspaceError::Create {
                    path: dir.clone(),
                    source,
                },
            )?;
        }

        Ok(Self {
            dir,
            correlation_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Record every regular file currently in the workspace with its mtime.
    pub fn snapshot(&self) -> Result<WorkspaceSnapshot, WorkspaceError> {
        let mut files = HashMap::new();
        for entry in WalkDir::new(&self.dir).follow_links(false) {
            let entry = entry.map_err(|e| WorkspaceError::Scan {
                path: self.dir.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .map_err(|e| WorkspaceError::Scan {
                    path: entry.path().to_path_buf(),
                    source: e.into(),
                })?
                .modified()
                .map_err(|source| WorkspaceError::Scan {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
            files.insert(entry.into_path(), modified);
        }
        Ok(WorkspaceSnapshot { files })
    }

    /// Whether `path` resolves to a location inside this workspace.
    pub fn contains(&self, path: &Path) -> bool {
        match (self.dir.canonicalize(), path.canonicalize()) {
            (Ok(root), Ok(target)) => target.starts_with(&root) && target != root,
            _ => false,
        }
    }

    /// Delete everything in the workspace except `keep`.
    pub fn retain_only(&self, keep: &Path) -> Result<(), WorkspaceError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| WorkspaceError::Scan {
            path: self.dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| WorkspaceError::Scan {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path == keep || keep.starts_with(&path) {
                continue;
            }
            let file_type = entry.file_type().map_err(|source| WorkspaceError::Scan {
                path: path.clone(),
                source,
            })?;
            let result = if file_type.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            result.map_err(|source| WorkspaceError::Remove { path, source })?;
        }
        Ok(())
    }

    /// Remove the whole workspace directory.
    pub fn remove(&self) -> Result<(), WorkspaceError> {
        remove_dir(&self.dir)
    }
}

fn remove_dir(dir: &Path) -> Result<(), WorkspaceError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(WorkspaceError::Remove {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

/// Files present in a workspace at one point in time.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceSnapshot {
    files: HashMap<PathBuf, SystemTime>,
}

impl WorkspaceSnapshot {
    /// True when `path` existed at snapshot time with the same mtime.
    pub fn is_unchanged(&self, path: &Path, modified: SystemTime) -> bool {
        self.files.get(path) == Some(&modified)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Remove a workspace directory once `delay` has elapsed.
pub fn schedule_removal(dir: PathBuf, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match remove_dir(&dir) {
            Ok(()) => tracing::debug!(workspace = %dir.display(), "removed retained workspace"),
            Err(e) => tracing::warn!(error = %e, "failed to remove retained workspace"),
        }
    });
}

/// Remove workspaces under `root` that have not been touched for `retention`.
///
/// Only directories whose name parses as a correlation id are considered, so
/// an unrelated directory configured as the root is never emptied.
/// Returns the number of workspaces removed.
pub fn sweep_expired(root: &Path, retention: Duration) -> Result<usize, WorkspaceError> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(WorkspaceError::Scan {
                path: root.to_path_buf(),
                source,
            });
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_workspace = path.is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.parse::<CorrelationId>().is_ok());
        if !is_workspace {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age >= retention {
            remove_dir(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
