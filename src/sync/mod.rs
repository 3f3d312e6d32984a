//! Directory synchronization
//!
//! Expands an `UploadTask` into a concrete list of file copies and, for
//! `sync` tasks with `delete_extra`, the set of remote files to remove once
//! the upload has finished.
//!
//! Planning is local and side-effect free (`plan`); `FileSynchronizer`
//! additionally prepares the remote side (directories, conflict checks,
//! remote listing).

mod remote;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use deploy_transport::{Transport, TransportError};
use walkdir::WalkDir;

use crate::config::UploadTask;

pub use remote::{RemoteFs, RemoteKind};

/// Synchronization errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("local path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("remote path exists and is not a directory: {0}")]
    RemotePathConflict(String),

    #[error("cannot prepare remote directory {path}: {message}")]
    RemoteDir { path: String, message: String },

    #[error("cannot read local tree: {0}")]
    Walk(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One concrete file copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCopyPlanEntry {
    /// Local regular file
    pub local: PathBuf,
    /// Exact remote destination
    pub remote: String,
    /// Size at plan time
    pub size: u64,
}

/// Local expansion of one upload task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPlan {
    /// Files to copy, in walk order
    pub entries: Vec<FileCopyPlanEntry>,
    /// Remote directories to ensure, parents before children
    pub remote_dirs: Vec<String>,
    /// Remote directory mirroring the local tree (None for a single file)
    pub remote_root: Option<String>,
    /// Relative paths of `entries` under `remote_root`
    pub relative: BTreeSet<String>,
    /// Remote extras should be removed after upload
    pub delete_extra: bool,
}

impl TaskPlan {
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Remote files to remove after a `sync` upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDeletion {
    pub remote_root: String,
    /// Absolute remote paths, sorted
    pub extras: Vec<String>,
}

/// Outcome of a deletion pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub deleted: Vec<String>,
    /// `(path, reason)` pairs
    pub failed: Vec<(String, String)>,
}

/// A task whose remote side is ready for upload
#[derive(Debug, Clone)]
pub struct PreparedTask {
    pub plan: TaskPlan,
    pub deletion: Option<SyncDeletion>,
}

/// Join a relative path onto a remote directory
pub fn join_remote(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    format!("{}/{}", base, rel.trim_start_matches('/'))
}

/// Parent directory of a remote file path (None for bare names)
fn remote_parent(path: &str) -> Option<String> {
    let (head, _) = path.trim_end_matches('/').rsplit_once('/')?;
    Some(if head.is_empty() { "/".to_string() } else { head.to_string() })
}

fn normalize_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Relative path with forward slashes
fn relative_slash(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    Some(parts.join("/"))
}

/// Expand `task` into file copies without touching the remote host
pub fn plan(task: &UploadTask) -> Result<TaskPlan, SyncError> {
    let local = &task.local_path;
    let meta = std::fs::metadata(local).map_err(|_| SyncError::PathNotFound(local.clone()))?;

    if meta.is_file() {
        let (remote, dir) = if task.remote_path.ends_with('/') {
            let name = local
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| SyncError::Walk(format!("{} has no file name", local.display())))?;
            (join_remote(&task.remote_path, &name), Some(normalize_dir(&task.remote_path)))
        } else {
            (task.remote_path.clone(), remote_parent(&task.remote_path))
        };

        if task.deletes_extra() {
            tracing::debug!(path = %local.display(), "delete_extra has no effect for a single file");
        }

        return Ok(TaskPlan {
            entries: vec![FileCopyPlanEntry {
                local: local.clone(),
                remote,
                size: meta.len(),
            }],
            remote_dirs: dir.into_iter().collect(),
            remote_root: None,
            relative: BTreeSet::new(),
            delete_extra: false,
        });
    }

    if !meta.is_dir() {
        return Err(SyncError::Walk(format!(
            "{} is neither a regular file nor a directory",
            local.display()
        )));
    }

    let root = normalize_dir(&task.remote_path);
    let mut entries = Vec::new();
    let mut remote_dirs = Vec::new();
    let mut relative = BTreeSet::new();

    for entry in WalkDir::new(local).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| SyncError::Walk(e.to_string()))?;
        let Some(rel) = relative_slash(entry.path(), local) else {
            continue;
        };

        if entry.file_type().is_dir() {
            remote_dirs.push(if rel.is_empty() { root.clone() } else { join_remote(&root, &rel) });
        } else if entry.file_type().is_file() {
            let size = entry.metadata().map_err(|e| SyncError::Walk(e.to_string()))?.len();
            entries.push(FileCopyPlanEntry {
                local: entry.path().to_path_buf(),
                remote: join_remote(&root, &rel),
                size,
            });
            relative.insert(rel);
        }
    }

    Ok(TaskPlan {
        entries,
        remote_dirs,
        remote_root: Some(root),
        relative,
        delete_extra: task.deletes_extra(),
    })
}

/// Prepares upload tasks against a remote host
pub struct FileSynchronizer<'a, T: Transport + ?Sized> {
    remote: RemoteFs<'a, T>,
}

impl<'a, T: Transport + ?Sized> FileSynchronizer<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            remote: RemoteFs::new(transport),
        }
    }

    /// Plan `task`, create its remote directories and compute remote extras
    ///
    /// The remote listing is taken before any upload so that extras are
    /// exactly the files the local tree does not have.
    pub fn prepare(&self, task: &UploadTask) -> Result<PreparedTask, SyncError> {
        let plan = plan(task)?;

        for dir in &plan.remote_dirs {
            self.remote.ensure_dir(dir)?;
        }

        let deletion = match (&plan.remote_root, plan.delete_extra) {
            (Some(root), true) => {
                let remote_set = self.remote.list_files(root)?;
                let extras: Vec<String> = remote_set
                    .difference(&plan.relative)
                    .map(|rel| join_remote(root, rel))
                    .collect();
                tracing::debug!(root = %root, extras = extras.len(), "computed remote extras");
                Some(SyncDeletion {
                    remote_root: root.clone(),
                    extras,
                })
            }
            _ => None,
        };

        Ok(PreparedTask { plan, deletion })
    }

    /// Remove remote extras; failures are reported, never fatal
    pub fn apply_deletion(&self, deletion: &SyncDeletion) -> DeletionReport {
        let mut report = DeletionReport::default();
        for path in &deletion.extras {
            match self.remote.remove_file(path) {
                Ok(()) => {
                    tracing::info!(path = %path, "deleted remote extra");
                    report.deleted.push(path.clone());
                }
                Err(reason) => {
                    tracing::warn!(path = %path, reason = %reason, "failed to delete remote extra");
                    report.failed.push((path.clone(), reason));
                }
            }
        }
        report
    }
}
