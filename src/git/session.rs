//! Log sessions: one revision listing plus its search engine.
//!
//! A session owns the `RevisionSequence` for one `LogQuery`, feeds it from a
//! `git rev-list` process, and shares the repository's `RevisionDataStore`
//! with every other session on the same repository. Dropping the session
//! stops the listing process, the search, and any prefetching.
//!
//! Used by: logs/search routes via `SessionRegistry<LogSession>`

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::CoreConfig;
use crate::error::Result;
use crate::git::cache::{LoadResult, RevisionDataStore};
use crate::git::prefetch::PrefetchScheduler;
use crate::git::process::HistorySource;
use crate::git::registry::Session;
use crate::git::revision_list::{ListOutcome, RevisionListStream};
use crate::git::search::SearchEngine;
use crate::git::sequence::RevisionSequence;
use crate::models::{LogQuery, RevisionCountEvent, SearchEvent, SearchStatus};

pub struct LogSession {
    store: Arc<RevisionDataStore>,
    sequence: Arc<RevisionSequence>,
    counts: broadcast::Sender<RevisionCountEvent>,
    search: SearchEngine,
    cancel: CancellationToken,
}

impl LogSession {
    /// Spawn the listing process and start filling the sequence.
    pub fn open(
        store: Arc<RevisionDataStore>,
        source: &dyn HistorySource,
        query: LogQuery,
        config: &CoreConfig,
    ) -> Result<Self> {
        let events = source.list_revisions(store.repo_path(), &query)?;
        tracing::debug!("Listing revisions for {:?}", query);

        let sequence = Arc::new(RevisionSequence::new());
        let (counts, _) = broadcast::channel(config.event_capacity);
        let cancel = CancellationToken::new();
        let search = SearchEngine::new(store.clone(), sequence.clone(), config, &cancel);

        let stream = RevisionListStream::new(config.list_throttle, Instant::now());
        let task_store = store.clone();
        let task_sequence = sequence.clone();
        let task_counts = counts.clone();
        let task_cancel = cancel.clone();
        let prime_count = config.prime_count;
        let concurrency = config.prefetch_concurrency;

        tokio::spawn(async move {
            let mut primed = false;
            let outcome = stream
                .pump(events, &task_cancel, |batch| {
                    task_sequence.append(batch.revisions, batch.all_loaded);
                    let revision_count = task_sequence.len();
                    let _ = task_counts.send(RevisionCountEvent {
                        revision_count,
                        all_loaded: batch.all_loaded,
                    });

                    // Warm the first screen, unless something already started loading.
                    if !primed && (revision_count >= prime_count || batch.all_loaded) {
                        primed = true;
                        if task_store.no_load_started() {
                            tracing::debug!("Priming first {} revisions", prime_count);
                            PrefetchScheduler::spawn(
                                task_store.clone(),
                                task_sequence.clone(),
                                0,
                                Some(prime_count),
                                concurrency,
                                task_cancel.child_token(),
                            );
                        }
                    }
                })
                .await;

            if outcome == ListOutcome::Failed {
                task_sequence.mark_failed();
            }
        });

        Ok(Self {
            store,
            sequence,
            counts,
            search,
            cancel,
        })
    }

    pub fn revision_count(&self) -> RevisionCountEvent {
        let status = self.sequence.status();
        RevisionCountEvent {
            revision_count: status.len,
            all_loaded: status.is_complete(),
        }
    }

    /// Revision data for `[start, start + count)`, waiting for the list if needed.
    pub async fn request_revision_range(&self, start: usize, count: usize) -> Vec<LoadResult> {
        self.store.load_range(&self.sequence, start, count).await
    }

    pub fn subscribe_revision_count(&self) -> broadcast::Receiver<RevisionCountEvent> {
        self.counts.subscribe()
    }

    pub fn subscribe_search(&self) -> broadcast::Receiver<SearchEvent> {
        self.search.subscribe()
    }

    pub fn search(&self, text: &str) {
        self.search.start(text);
    }

    pub fn pause_search(&self) {
        self.search.pause();
    }

    pub fn resume_search(&self, replay: bool) {
        self.search.resume(replay);
    }

    pub fn search_status(&self) -> Option<SearchStatus> {
        self.search.status()
    }
}

impl Session for LogSession {
    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LogSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
