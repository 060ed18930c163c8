//! Revision metadata cache.
//!
//! Revisions are immutable, so entries never need invalidation: the cache is
//! keyed by revision hash and lives as long as the process.
//! - One `RevisionDataStore` per repository path, handed out by `CacheRegistry`
//! - Concurrent requests for the same revision share one in-flight load
//! - A failed load is not memoized; the next request retries
//!
//! Used by: log sessions (range requests, priming), prefetcher, search, blame
//! revision details

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::LoadFailure;
use crate::git::process::HistorySource;
use crate::git::sequence::RevisionSequence;
use crate::models::{CacheStats, Revision};

pub type LoadResult = std::result::Result<Arc<Revision>, LoadFailure>;

/// Cloneable handle to a (possibly finished) revision load.
pub type RevisionFuture = Shared<BoxFuture<'static, LoadResult>>;

enum CacheEntry {
    Pending(RevisionFuture),
    Resolved(Arc<Revision>),
}

type Entries = Arc<Mutex<HashMap<String, CacheEntry>>>;

pub struct RevisionDataStore {
    repo_path: PathBuf,
    source: Arc<dyn HistorySource>,
    entries: Entries,
    load_timeout: Option<Duration>,
}

impl RevisionDataStore {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        source: Arc<dyn HistorySource>,
        load_timeout: Option<Duration>,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            source,
            entries: Arc::new(Mutex::new(HashMap::new())),
            load_timeout,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if no revision load has ever been started on this store.
    pub fn no_load_started(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Cached value, without starting a load.
    #[cfg(test)]
    pub fn get(&self, revision: &str) -> Option<Arc<Revision>> {
        match self.lock_entries().get(revision) {
            Some(CacheEntry::Resolved(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Return the cached revision, join the in-flight load, or start one.
    pub fn get_or_load(&self, revision: &str) -> RevisionFuture {
        let mut entries = self.lock_entries();

        match entries.get(revision) {
            Some(CacheEntry::Resolved(data)) => {
                let data = data.clone();
                return async move { LoadResult::Ok(data) }.boxed().shared();
            }
            Some(CacheEntry::Pending(load)) => return load.clone(),
            None => {}
        }

        let load = self.spawn_load(revision.to_string());
        entries.insert(revision.to_string(), CacheEntry::Pending(load.clone()));
        load
    }

    /// The load runs on its own task so it finishes even if every waiter goes away.
    fn spawn_load(&self, revision: String) -> RevisionFuture {
        let source = self.source.clone();
        let entries = self.entries.clone();
        let repo_path = self.repo_path.clone();
        let load_timeout = self.load_timeout;
        let task_revision = revision.clone();

        let task = tokio::spawn(async move {
            let revision = task_revision;
            let started = Instant::now();
            let load = source.show_revision(&repo_path, &revision);

            let result = match load_timeout {
                Some(limit) => match tokio::time::timeout(limit, load).await {
                    Ok(result) => result.map_err(|e| LoadFailure::from_error(&revision, &e)),
                    Err(_) => Err(LoadFailure::new(
                        &revision,
                        format!("timed out after {:?}", limit),
                    )),
                },
                None => load.await.map_err(|e| LoadFailure::from_error(&revision, &e)),
            };

            let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
            match result {
                Ok(data) => {
                    let data = Arc::new(data);
                    tracing::trace!("Loaded {} in {:?}", revision, started.elapsed());
                    entries.insert(revision, CacheEntry::Resolved(data.clone()));
                    Ok(data)
                }
                Err(failure) => {
                    tracing::warn!("{}", failure);
                    entries.remove(&revision);
                    Err(failure)
                }
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(LoadFailure::new(revision, format!("load task failed: {}", e))),
            }
        }
        .boxed()
        .shared()
    }

    /// Load revisions `[start, start + count)` of `sequence`.
    ///
    /// If the range reaches past the known identifiers while the list is still
    /// loading, waits for enough identifiers (or for the list to settle) and then
    /// clamps to what exists.
    pub async fn load_range(
        &self,
        sequence: &RevisionSequence,
        start: usize,
        count: usize,
    ) -> Vec<LoadResult> {
        let end = start.saturating_add(count);
        let status = sequence.status();
        if end > status.len && !status.is_settled() {
            sequence.wait_for_len(end).await;
        }

        let loads: Vec<RevisionFuture> = sequence
            .slice(start, end)
            .iter()
            .map(|revision| self.get_or_load(revision))
            .collect();

        futures::future::join_all(loads).await
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock_entries();
        let resolved = entries
            .values()
            .filter(|entry| matches!(entry, CacheEntry::Resolved(_)))
            .count();
        CacheStats {
            resolved,
            pending: entries.len() - resolved,
        }
    }
}

/// One `RevisionDataStore` per repository path, shared by every session on it.
pub struct CacheRegistry {
    source: Arc<dyn HistorySource>,
    load_timeout: Option<Duration>,
    stores: Mutex<HashMap<PathBuf, Arc<RevisionDataStore>>>,
}

impl CacheRegistry {
    pub fn new(source: Arc<dyn HistorySource>, load_timeout: Option<Duration>) -> Self {
        Self {
            source,
            load_timeout,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn store_for(&self, repo_path: &Path) -> Arc<RevisionDataStore> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        stores
            .entry(repo_path.to_path_buf())
            .or_insert_with(|| {
                tracing::debug!("Creating revision cache for {}", repo_path.display());
                Arc::new(RevisionDataStore::new(
                    repo_path,
                    self.source.clone(),
                    self.load_timeout,
                ))
            })
            .clone()
    }

    pub fn source(&self) -> Arc<dyn HistorySource> {
        self.source.clone()
    }
}
