//! Resumable full-history text search.
//!
//! Each distinct search text owns a `SearchState` (cursor + matches) that
//! survives pauses and being superseded by another text. Only one text scans
//! at a time. The scan visits indices in order, so matches are reported in
//! strictly increasing order even though a prefetcher warms the cache ahead
//! of the cursor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::CoreConfig;
use crate::git::cache::RevisionDataStore;
use crate::git::prefetch::PrefetchScheduler;
use crate::git::sequence::{RevisionSequence, SequenceStatus};
use crate::models::{FileChange, Revision, SearchEvent, SearchPhase, SearchStatus};

/// Substring match against identity, message, author, then changed paths.
pub fn is_search_match(text: &str, data: &Revision) -> bool {
    data.revision.contains(text)
        || data.subject.contains(text)
        || data.body.as_deref().is_some_and(|body| body.contains(text))
        || data.author.name.contains(text)
        || data.author.email.contains(text)
        || data
            .changes
            .iter()
            .flat_map(FileChange::paths)
            .any(|path| path.contains(text))
}

#[derive(Debug)]
struct SearchState {
    /// Next index to scan
    cursor: usize,
    matches: Vec<usize>,
    phase: SearchPhase,
    /// Bumped on every (re)start so a stale run cannot overwrite the phase
    run_id: u64,
}

struct SearchSlot {
    text: String,
    state: Mutex<SearchState>,
    /// Held for the lifetime of a scan run; a resumed run waits for the old one.
    running: Arc<tokio::sync::Mutex<()>>,
}

impl SearchSlot {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            state: Mutex::new(SearchState {
                cursor: 0,
                matches: Vec::new(),
                phase: SearchPhase::Idle,
                run_id: 0,
            }),
            running: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SearchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ActiveSearch {
    slot: Arc<SearchSlot>,
    cancel: CancellationToken,
}

struct SearchInner {
    store: Arc<RevisionDataStore>,
    sequence: Arc<RevisionSequence>,
    concurrency: usize,
    progress_interval: usize,
    events: broadcast::Sender<SearchEvent>,
    searches: Mutex<HashMap<String, Arc<SearchSlot>>>,
    active: Mutex<Option<ActiveSearch>>,
    shutdown: CancellationToken,
}

pub struct SearchEngine {
    inner: Arc<SearchInner>,
}

impl SearchEngine {
    pub fn new(
        store: Arc<RevisionDataStore>,
        sequence: Arc<RevisionSequence>,
        config: &CoreConfig,
        parent: &CancellationToken,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            inner: Arc::new(SearchInner {
                store,
                sequence,
                concurrency: config.prefetch_concurrency,
                progress_interval: config.progress_interval.max(1),
                events,
                searches: Mutex::new(HashMap::new()),
                active: Mutex::new(None),
                shutdown: parent.child_token(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.inner.events.subscribe()
    }

    /// Search for `text`, pausing whatever search was running.
    ///
    /// A text searched before picks up where it stopped, re-delivering the
    /// matches it already found as one batch.
    pub fn start(&self, text: &str) {
        let mut active = self.inner.lock_active();
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            let mut state = previous.slot.lock_state();
            if state.phase == SearchPhase::Scanning {
                state.phase = SearchPhase::Paused;
            }
        }

        let slot = self.inner.slot_for(text);
        let cancel = self.inner.shutdown.child_token();
        {
            let mut state = slot.lock_state();
            self.inner.replay(&slot, &state);
            if state.phase == SearchPhase::Completed {
                self.inner.emit_final_progress(&slot, &state);
            } else {
                tracing::debug!("Searching for {:?} from index {}", text, state.cursor);
                self.inner.launch(&slot, &mut state, cancel.clone());
            }
        }

        *active = Some(ActiveSearch { slot, cancel });
    }

    /// Stop the active scan after its current fetch settles. No-op unless scanning.
    pub fn pause(&self) {
        let active = self.inner.lock_active();
        let Some(current) = active.as_ref() else {
            return;
        };
        let mut state = current.slot.lock_state();
        if state.phase == SearchPhase::Scanning {
            current.cancel.cancel();
            state.phase = SearchPhase::Paused;
            tracing::debug!("Paused search {:?} at index {}", current.slot.text, state.cursor);
        }
    }

    /// Continue the active search from its cursor. No-op while scanning.
    ///
    /// With `replay`, every match found so far is delivered again as one batch
    /// first (for a view that re-attached).
    pub fn resume(&self, replay: bool) {
        let mut active = self.inner.lock_active();
        let Some(current) = active.as_mut() else {
            return;
        };
        let slot = current.slot.clone();
        let mut state = slot.lock_state();

        if replay {
            self.inner.replay(&slot, &state);
            if state.phase == SearchPhase::Completed {
                self.inner.emit_final_progress(&slot, &state);
            }
        }

        match state.phase {
            SearchPhase::Scanning | SearchPhase::Completed => {}
            SearchPhase::Idle | SearchPhase::Paused => {
                current.cancel = self.inner.shutdown.child_token();
                tracing::debug!("Resuming search {:?} at index {}", slot.text, state.cursor);
                self.inner.launch(&slot, &mut state, current.cancel.clone());
            }
        }
    }

    pub fn status(&self) -> Option<SearchStatus> {
        let active = self.inner.lock_active();
        active.as_ref().map(|current| {
            let state = current.slot.lock_state();
            SearchStatus {
                search_text: current.slot.text.clone(),
                phase: state.phase,
                scanned: state.cursor,
                matches: state.matches.len(),
            }
        })
    }
}

impl Drop for SearchEngine {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl SearchInner {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSearch>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_searches(&self) -> MutexGuard<'_, HashMap<String, Arc<SearchSlot>>> {
        self.searches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_for(&self, text: &str) -> Arc<SearchSlot> {
        self.lock_searches()
            .entry(text.to_string())
            .or_insert_with(|| Arc::new(SearchSlot::new(text)))
            .clone()
    }

    fn emit(&self, event: SearchEvent) {
        // No subscribers is fine; state is kept regardless.
        let _ = self.events.send(event);
    }

    fn replay(&self, slot: &SearchSlot, state: &SearchState) {
        if !state.matches.is_empty() {
            self.emit(SearchEvent::Matches {
                search_text: slot.text.clone(),
                indices: state.matches.clone(),
                replay: true,
            });
        }
    }

    fn emit_final_progress(&self, slot: &SearchSlot, state: &SearchState) {
        self.emit(SearchEvent::Progress {
            search_text: slot.text.clone(),
            current_index: state.cursor.saturating_sub(1),
            total: self.sequence.len(),
            complete: true,
        });
    }

    fn launch(self: &Arc<Self>, slot: &Arc<SearchSlot>, state: &mut SearchState, cancel: CancellationToken) {
        state.phase = SearchPhase::Scanning;
        state.run_id += 1;
        let run_id = state.run_id;

        let inner = self.clone();
        let slot = slot.clone();
        tokio::spawn(async move { inner.run_scan(slot, run_id, cancel).await });
    }

    fn start_prefetch(&self, start: usize, cancel: &CancellationToken) -> PrefetchScheduler {
        PrefetchScheduler::spawn(
            self.store.clone(),
            self.sequence.clone(),
            start,
            None,
            self.concurrency,
            cancel.child_token(),
        )
    }

    async fn run_scan(self: Arc<Self>, slot: Arc<SearchSlot>, run_id: u64, cancel: CancellationToken) {
        let _running = slot.running.clone().lock_owned().await;
        if cancel.is_cancelled() {
            return;
        }

        let start = slot.lock_state().cursor;
        let mut prefetch = self.start_prefetch(start, &cancel);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let index = slot.lock_state().cursor;
            let status = self.sequence.status();

            if index >= status.len {
                if status.is_settled() {
                    self.complete(&slot, run_id, status, &cancel);
                    break;
                }
                // Caught up with the revision list; wait for more or for the end.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.sequence.wait_for_len(index + 1) => {}
                }
                if prefetch.is_finished() {
                    prefetch = self.start_prefetch(index, &cancel);
                }
                continue;
            }

            let Some(revision) = self.sequence.get(index) else {
                break;
            };
            let result = self.store.get_or_load(&revision).await;

            let mut state = slot.lock_state();
            if state.cursor != index {
                tracing::warn!("Search cursor for {:?} moved under a running scan", slot.text);
                break;
            }

            match result {
                Ok(data) => {
                    if is_search_match(&slot.text, &data) {
                        debug_assert!(state.matches.last().is_none_or(|&last| last < index));
                        state.matches.push(index);
                        self.emit(SearchEvent::Matches {
                            search_text: slot.text.clone(),
                            indices: vec![index],
                            replay: false,
                        });
                    }
                }
                Err(failure) => {
                    tracing::warn!("Search skipped index {}: {}", index, failure);
                }
            }
            state.cursor = index + 1;

            if index % self.progress_interval == 0 {
                self.emit(SearchEvent::Progress {
                    search_text: slot.text.clone(),
                    current_index: index,
                    total: self.sequence.len(),
                    complete: false,
                });
            }
        }

        prefetch.cancel();
        prefetch.join().await;
    }

    fn complete(&self, slot: &SearchSlot, run_id: u64, status: SequenceStatus, cancel: &CancellationToken) {
        let mut state = slot.lock_state();
        if state.run_id != run_id || cancel.is_cancelled() {
            return;
        }
        state.phase = SearchPhase::Completed;
        tracing::debug!(
            "Search {:?} finished: {} matches in {} revisions",
            slot.text,
            state.matches.len(),
            status.len
        );
        self.emit_final_progress(slot, &state);
    }
}
