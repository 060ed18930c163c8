use git2::Repository;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{AppError, Result};
use crate::models::{CacheStats, RefMap, RepositoryInfo};

pub struct GitRepository {
    pub repo: Mutex<Repository>,
    /// Directory `git` subprocesses run in (the worktree, or the git dir when bare)
    pub path: PathBuf,
}

impl GitRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let repo = Repository::discover(&path).map_err(|_| AppError::RepoNotFound(path_str))?;
        let path = repo.workdir().unwrap_or_else(|| repo.path()).to_path_buf();

        Ok(Self {
            repo: Mutex::new(repo),
            path,
        })
    }

    pub fn info(&self, cache: CacheStats) -> Result<RepositoryInfo> {
        let repo = self.repo.lock().map_err(|_| AppError::Internal("Lock poisoned".to_string()))?;

        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let head = repo.head().ok();
        let head_branch = head
            .as_ref()
            .filter(|h| h.is_branch())
            .and_then(|h| h.shorthand().map(|s| s.to_string()));
        let head_revision = head
            .as_ref()
            .and_then(|h| h.peel_to_commit().ok())
            .map(|c| c.id().to_string());

        Ok(RepositoryInfo {
            name,
            path: repo.path().to_string_lossy().to_string(),
            workdir: repo.workdir().map(|w| w.to_string_lossy().to_string()),
            head_branch,
            head_revision,
            is_bare: repo.is_bare(),
            is_empty: repo.is_empty().unwrap_or(true),
            cache,
        })
    }

    /// Every branch, remote branch and tag, grouped by the revision it points at.
    pub fn refs(&self) -> Result<RefMap> {
        let repo = self.repo.lock().map_err(|_| AppError::Internal("Lock poisoned".to_string()))?;
        let mut refs = RefMap::new();

        for reference in repo.references()? {
            let reference = reference?;
            if reference.is_remote() && reference.name().is_some_and(|n| n.ends_with("/HEAD")) {
                continue;
            }
            let Some(name) = reference.shorthand().map(|s| s.to_string()) else {
                continue;
            };
            let Ok(commit) = reference.peel_to_commit() else {
                tracing::debug!("Skipping ref {} that does not point at a commit", name);
                continue;
            };
            refs.entry(commit.id().to_string()).or_default().push(name);
        }

        for names in refs.values_mut() {
            names.sort();
        }
        Ok(refs)
    }
}

pub type SharedRepo = Arc<GitRepository>;
