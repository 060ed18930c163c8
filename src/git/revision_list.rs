//! Incremental reader for `git rev-list` output.
//!
//! Stdout arrives in arbitrary chunks; only whole identifiers are emitted.
//! Early batches go out immediately so the first screen fills fast, then
//! delivery is throttled and identifiers are coalesced. The terminal batch
//! (`all_loaded = true`) is only produced on a clean exit.

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::git::batch::{BatchThrottle, LineSplitter, ThrottleConfig};
use crate::git::process::{ProcessEvent, ProcessStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionBatch {
    pub revisions: Vec<String>,
    pub all_loaded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOutcome {
    Complete,
    Failed,
    Cancelled,
}

pub struct RevisionListStream {
    splitter: LineSplitter,
    throttle: BatchThrottle,
    pending: Vec<String>,
}

impl RevisionListStream {
    pub fn new(config: ThrottleConfig, now: Instant) -> Self {
        Self {
            splitter: LineSplitter::new(),
            throttle: BatchThrottle::new(config, now),
            pending: Vec::new(),
        }
    }

    /// Feed one stdout chunk; returns a batch if one may be delivered now.
    pub fn push_chunk(&mut self, chunk: &[u8], now: Instant) -> Option<RevisionBatch> {
        self.pending.extend(
            self.splitter
                .push(chunk)
                .into_iter()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty()),
        );
        self.flush_due(now)
    }

    /// Deliver held-back identifiers if the throttle allows it.
    pub fn flush_due(&mut self, now: Instant) -> Option<RevisionBatch> {
        if self.pending.is_empty() || !self.throttle.ready(now) {
            return None;
        }
        Some(self.take_batch(false, now))
    }

    /// When held-back identifiers become deliverable, if any are waiting.
    pub fn pending_deadline(&self) -> Option<Instant> {
        (!self.pending.is_empty()).then(|| self.throttle.deadline())
    }

    /// The terminal batch, flushed regardless of timing.
    pub fn finish(&mut self, now: Instant) -> RevisionBatch {
        if let Some(line) = self.splitter.finish() {
            let line = line.trim();
            if !line.is_empty() {
                self.pending.push(line.to_string());
            }
        }
        self.take_batch(true, now)
    }

    pub fn total_delivered(&self) -> usize {
        self.throttle.total_delivered()
    }

    fn take_batch(&mut self, all_loaded: bool, now: Instant) -> RevisionBatch {
        let revisions = std::mem::take(&mut self.pending);
        self.throttle.delivered(revisions.len(), now);
        RevisionBatch {
            revisions,
            all_loaded,
        }
    }

    /// Drive the stream from a listing process until it exits or `cancel` fires.
    pub async fn pump<F>(
        mut self,
        mut events: ProcessStream,
        cancel: &CancellationToken,
        mut deliver: F,
    ) -> ListOutcome
    where
        F: FnMut(RevisionBatch),
    {
        loop {
            let deadline = self.pending_deadline();
            let flush_timer = sleep_until(deadline.unwrap_or_else(Instant::now));

            tokio::select! {
                _ = cancel.cancelled() => return ListOutcome::Cancelled,
                _ = flush_timer, if deadline.is_some() => {
                    if let Some(batch) = self.flush_due(Instant::now()) {
                        deliver(batch);
                    }
                }
                event = events.recv() => match event {
                    Some(ProcessEvent::Stdout(chunk)) => {
                        if let Some(batch) = self.push_chunk(&chunk, Instant::now()) {
                            deliver(batch);
                        }
                    }
                    Some(ProcessEvent::Stderr(line)) => {
                        tracing::warn!("git rev-list: {}", line);
                    }
                    Some(ProcessEvent::Exit(Some(0))) => {
                        let batch = self.finish(Instant::now());
                        deliver(batch);
                        tracing::info!("Revision list loaded: {} revisions", self.total_delivered());
                        return ListOutcome::Complete;
                    }
                    Some(ProcessEvent::Exit(code)) => {
                        tracing::error!(
                            "git rev-list exited with {:?} after {} revisions",
                            code,
                            self.total_delivered()
                        );
                        return ListOutcome::Failed;
                    }
                    None => {
                        tracing::error!("git rev-list output ended without an exit status");
                        return ListOutcome::Failed;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn unthrottled() -> ThrottleConfig {
        ThrottleConfig::new(usize::MAX, Duration::from_secs(1))
    }

    async fn run_pump(chunks: &[&str], exit: Option<i32>) -> (Vec<RevisionBatch>, ListOutcome) {
        let (tx, rx) = mpsc::channel(16);
        for chunk in chunks {
            tx.send(ProcessEvent::Stdout(chunk.as_bytes().to_vec())).await.unwrap();
        }
        tx.send(ProcessEvent::Exit(exit)).await.unwrap();

        let mut batches = Vec::new();
        let stream = RevisionListStream::new(unthrottled(), Instant::now());
        let outcome = stream
            .pump(rx, &CancellationToken::new(), |batch| batches.push(batch))
            .await;
        (batches, outcome)
    }

    #[tokio::test]
    async fn test_chunks_split_inside_identifier() {
        let (batches, outcome) = run_pump(&["aaa\nbbb\n", "cc", "c\nddd\n"], Some(0)).await;

        assert_eq!(outcome, ListOutcome::Complete);
        let all: Vec<String> = batches.iter().flat_map(|b| b.revisions.clone()).collect();
        assert_eq!(all, vec!["aaa", "bbb", "ccc", "ddd"]);

        let terminal: Vec<_> = batches.iter().filter(|b| b.all_loaded).collect();
        assert_eq!(terminal.len(), 1);
        assert!(batches.last().unwrap().all_loaded);
    }

    #[test]
    fn test_every_chunking_yields_same_sequence() {
        let input = b"0123abcd\nfeed5678\n9999\ncafe\n";
        let expected = vec!["0123abcd", "feed5678", "9999", "cafe"];
        let now = Instant::now();

        for first in 0..=input.len() {
            for second in first..=input.len() {
                let mut stream = RevisionListStream::new(unthrottled(), now);
                let mut seen = Vec::new();
                for chunk in [&input[..first], &input[first..second], &input[second..]] {
                    if let Some(batch) = stream.push_chunk(chunk, now) {
                        seen.extend(batch.revisions);
                    }
                }
                let terminal = stream.finish(now);
                assert!(terminal.all_loaded);
                seen.extend(terminal.revisions);
                assert_eq!(seen, expected, "split at {} / {}", first, second);
            }
        }
    }

    #[test]
    fn test_throttle_coalesces_after_quota() {
        let start = Instant::now();
        let mut stream =
            RevisionListStream::new(ThrottleConfig::new(2, Duration::from_secs(1)), start);

        let first = stream.push_chunk(b"a\nb\n", start).unwrap();
        assert_eq!(first.revisions, vec!["a", "b"]);

        let held = start + Duration::from_millis(300);
        assert_eq!(stream.push_chunk(b"c\n", held), None);
        assert_eq!(stream.push_chunk(b"d\n", held), None);
        assert_eq!(stream.pending_deadline(), Some(start + Duration::from_secs(1)));

        let later = start + Duration::from_millis(1100);
        let coalesced = stream.push_chunk(b"e\n", later).unwrap();
        assert_eq!(coalesced.revisions, vec!["c", "d", "e"]);
        assert!(!coalesced.all_loaded);

        assert_eq!(stream.push_chunk(b"f\n", later), None);
        let terminal = stream.finish(later);
        assert_eq!(terminal.revisions, vec!["f"]);
        assert!(terminal.all_loaded);
        assert_eq!(stream.total_delivered(), 6);
    }

    #[tokio::test]
    async fn test_failed_exit_never_reports_all_loaded() {
        let (batches, outcome) = run_pump(&["aaa\n", "bbb\n"], Some(128)).await;

        assert_eq!(outcome, ListOutcome::Failed);
        assert!(batches.iter().all(|b| !b.all_loaded));
        let all: Vec<String> = batches.iter().flat_map(|b| b.revisions.clone()).collect();
        assert_eq!(all, vec!["aaa", "bbb"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_held_batch_without_new_chunks() {
        let (tx, rx) = mpsc::channel(16);
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();

        let config = ThrottleConfig::new(1, Duration::from_secs(1));
        tokio::spawn(async move {
            let stream = RevisionListStream::new(config, Instant::now());
            stream
                .pump(rx, &CancellationToken::new(), |batch| {
                    let _ = batch_tx.send(batch);
                })
                .await
        });

        tx.send(ProcessEvent::Stdout(b"a\nb\n".to_vec())).await.unwrap();
        assert_eq!(batch_rx.recv().await.unwrap().revisions, vec!["a", "b"]);

        tx.send(ProcessEvent::Stdout(b"c\n".to_vec())).await.unwrap();
        let held = batch_rx.recv().await.unwrap();
        assert_eq!(held.revisions, vec!["c"]);
        assert!(!held.all_loaded);

        tx.send(ProcessEvent::Exit(Some(0))).await.unwrap();
        let terminal = batch_rx.recv().await.unwrap();
        assert!(terminal.revisions.is_empty());
        assert!(terminal.all_loaded);
    }

    #[tokio::test]
    async fn test_cancel_stops_pump() {
        let (_tx, rx) = mpsc::channel::<ProcessEvent>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stream = RevisionListStream::new(unthrottled(), Instant::now());
        let outcome = stream.pump(rx, &cancel, |_| panic!("no batches expected")).await;
        assert_eq!(outcome, ListOutcome::Cancelled);
    }
}
