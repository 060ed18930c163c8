//! Bounded-concurrency cache warmer.
//!
//! Walks a cursor over the revision sequence and keeps up to `concurrency`
//! revision loads in flight, refilling the pool as each one completes. The
//! cursor advances on dispatch. Cancellation is checked before every
//! dispatch; loads already dispatched run to completion and stay cached.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::git::cache::RevisionDataStore;
use crate::git::sequence::RevisionSequence;

pub struct PrefetchScheduler {
    cancel: CancellationToken,
    task: JoinHandle<usize>,
}

impl PrefetchScheduler {
    /// Start warming from `start` up to the known sequence length, or `end` if smaller.
    pub fn spawn(
        store: Arc<RevisionDataStore>,
        sequence: Arc<RevisionSequence>,
        start: usize,
        end: Option<usize>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut cursor = start;
            let mut in_flight = FuturesUnordered::new();

            loop {
                while in_flight.len() < concurrency && !task_cancel.is_cancelled() {
                    let limit = end.map_or(sequence.len(), |end| end.min(sequence.len()));
                    if cursor >= limit {
                        break;
                    }
                    let Some(revision) = sequence.get(cursor) else {
                        break;
                    };
                    in_flight.push(store.get_or_load(&revision));
                    cursor += 1;
                }

                match in_flight.next().await {
                    Some(Ok(_)) => {}
                    Some(Err(failure)) => tracing::debug!("Prefetch skipped: {}", failure),
                    None => break,
                }
            }

            tracing::debug!("Prefetch stopped at {} (started at {})", cursor, start);
            cursor - start
        });

        Self { cancel, task }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the scheduler to drain; returns how many loads it dispatched.
    pub async fn join(self) -> usize {
        self.task.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::FakeSource;
    use std::time::Duration;

    fn setup(count: usize) -> (Arc<FakeSource>, Arc<RevisionDataStore>, Arc<RevisionSequence>) {
        let source = Arc::new(FakeSource::with_revisions(count).delay(Duration::from_millis(10)));
        let store = Arc::new(RevisionDataStore::new("/repo", source.clone(), None));
        let sequence = Arc::new(RevisionSequence::complete(source.ids()));
        (source, store, sequence)
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_concurrency_bound() {
        let (source, store, sequence) = setup(40);

        let scheduler =
            PrefetchScheduler::spawn(store.clone(), sequence, 0, None, 3, CancellationToken::new());
        assert_eq!(scheduler.join().await, 40);

        assert_eq!(source.show_calls(), 40);
        assert_eq!(source.max_in_flight(), 3);
        assert_eq!(store.stats().resolved, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_respects_start_and_end() {
        let (source, store, sequence) = setup(20);

        let scheduler = PrefetchScheduler::spawn(
            store.clone(),
            sequence,
            5,
            Some(12),
            4,
            CancellationToken::new(),
        );
        assert_eq!(scheduler.join().await, 7);

        assert!(store.get(&source.id(4)).is_none());
        assert!(store.get(&source.id(5)).is_some());
        assert!(store.get(&source.id(11)).is_some());
        assert!(store.get(&source.id(12)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_dispatch_but_finishes_in_flight() {
        let (source, store, sequence) = setup(50);
        let cancel = CancellationToken::new();

        let scheduler =
            PrefetchScheduler::spawn(store.clone(), sequence, 0, None, 4, cancel.clone());
        tokio::time::sleep(Duration::from_millis(15)).await;

        cancel.cancel();
        let in_flight_at_cancel = source.in_flight();
        let calls_at_cancel = source.show_calls();
        assert!(in_flight_at_cancel <= 4);

        let dispatched = scheduler.join().await;
        assert_eq!(source.in_flight(), 0);
        assert_eq!(source.show_calls(), calls_at_cancel);
        assert_eq!(dispatched, calls_at_cancel);
        assert_eq!(store.stats().resolved, calls_at_cancel);
        assert!(dispatched < 50);
    }

    #[tokio::test]
    async fn test_failed_loads_are_skipped() {
        let (source, store, sequence) = setup(5);
        source.fail_next(&source.id(2));

        let scheduler =
            PrefetchScheduler::spawn(store.clone(), sequence, 0, None, 2, CancellationToken::new());
        assert_eq!(scheduler.join().await, 5);
        assert_eq!(store.stats().resolved, 4);
        assert!(store.get(&source.id(2)).is_none());
    }

    #[tokio::test]
    async fn test_empty_sequence_finishes_immediately() {
        let source = Arc::new(FakeSource::new());
        let store = Arc::new(RevisionDataStore::new("/repo", source.clone(), None));
        let sequence = Arc::new(RevisionSequence::new());

        let scheduler =
            PrefetchScheduler::spawn(store, sequence, 0, None, 2, CancellationToken::new());
        assert_eq!(scheduler.join().await, 0);
        assert_eq!(source.show_calls(), 0);
    }
}
