//! Blame sessions that survive a reconnecting view.
//!
//! A `BlameSession` runs one `start_blame` pipeline and keeps everything it
//! produced: the options, the file contents, every record, and the final
//! outcome. A subscriber that attaches late (or a view that reloads) first
//! gets all of that as a replay, with the records merged into a single
//! batch, and then the live batches.
//!
//! Used by: blame routes via `SessionRegistry<BlameSession>`

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::CoreConfig;
use crate::git::blame::start_blame;
use crate::git::process::HistorySource;
use crate::git::registry::Session;
use crate::models::{BlameEvent, BlameQuery, BlameRecord};

#[derive(Debug, Default)]
struct Accumulated {
    options: Option<BlameEvent>,
    contents: Option<BlameEvent>,
    records: Vec<BlameRecord>,
    outcome: Option<BlameEvent>,
}

impl Accumulated {
    fn absorb(&mut self, event: &BlameEvent) {
        match event {
            BlameEvent::Options(_) => self.options = Some(event.clone()),
            BlameEvent::FileContents { .. } | BlameEvent::FileContentsUnavailable { .. } => {
                self.contents = Some(event.clone())
            }
            BlameEvent::Records { records } => self.records.extend(records.iter().cloned()),
            BlameEvent::Finished { .. } | BlameEvent::Failed { .. } => {
                self.outcome = Some(event.clone())
            }
        }
    }

    fn replay(&self) -> Vec<BlameEvent> {
        let mut events: Vec<BlameEvent> = self.options.iter().chain(&self.contents).cloned().collect();
        if !self.records.is_empty() {
            events.push(BlameEvent::Records {
                records: self.records.clone(),
            });
        }
        events.extend(self.outcome.clone());
        events
    }
}

struct Shared {
    state: Mutex<Accumulated>,
    events: broadcast::Sender<BlameEvent>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, Accumulated> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record and broadcast under one lock so a subscriber sees each event once.
    fn publish(&self, event: BlameEvent) {
        let mut state = self.lock_state();
        state.absorb(&event);
        let _ = self.events.send(event);
    }
}

pub struct BlameSession {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl BlameSession {
    /// Spawn the blame and start accumulating its events.
    pub fn start(
        source: Arc<dyn HistorySource>,
        repo_path: PathBuf,
        query: BlameQuery,
        config: &CoreConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let shared = Arc::new(Shared {
            state: Mutex::new(Accumulated::default()),
            events,
        });
        let cancel = CancellationToken::new();

        let mut rx = start_blame(source, repo_path, query, config);
        let task_shared = shared.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = rx.recv() => event,
                };
                match event {
                    Some(event) => task_shared.publish(event),
                    None => break,
                }
            }
            // Dropping `rx` here kills a still running blame process.
        });

        Self { shared, cancel }
    }

    /// Everything produced so far, then a receiver for what comes next.
    pub fn subscribe(&self) -> (Vec<BlameEvent>, broadcast::Receiver<BlameEvent>) {
        let state = self.shared.lock_state();
        (state.replay(), self.shared.events.subscribe())
    }
}

impl Session for BlameSession {
    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for BlameSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::process::ProcessEvent;
    use crate::git::testing::FakeSource;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn query() -> BlameQuery {
        BlameQuery {
            path: "foo.txt".to_string(),
            revision: None,
            starting_line: None,
        }
    }

    fn record_lines(lines: &[u32]) -> Vec<u8> {
        lines
            .iter()
            .map(|line| format!("abc123 {} {} 1\nfilename foo.txt\n", line, line))
            .collect::<String>()
            .into_bytes()
    }

    fn record_count(event: &BlameEvent) -> Option<usize> {
        match event {
            BlameEvent::Records { records } => Some(records.len()),
            _ => None,
        }
    }

    async fn recv_records(rx: &mut broadcast::Receiver<BlameEvent>) -> usize {
        loop {
            if let Some(count) = record_count(&rx.recv().await.unwrap()) {
                return count;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscriber_gets_everything_once() {
        let (process_tx, process_rx) = mpsc::channel(8);
        let source = Arc::new(FakeSource::new().file_text("a\nb\nc\n").blame_stream(process_rx));
        let session = BlameSession::start(source, "/repo".into(), query(), &CoreConfig::default());
        let (_, mut first) = session.subscribe();

        process_tx.send(ProcessEvent::Stdout(record_lines(&[1]))).await.unwrap();
        assert_eq!(recv_records(&mut first).await, 1);
        process_tx.send(ProcessEvent::Stdout(record_lines(&[2]))).await.unwrap();
        assert_eq!(recv_records(&mut first).await, 1);

        // Reattach: options and contents, then both records as one batch.
        let (replay, mut second) = session.subscribe();
        assert_eq!(replay.first(), Some(&BlameEvent::Options(query())));
        assert!(replay.contains(&BlameEvent::FileContents {
            text: "a\nb\nc\n".to_string()
        }));
        let replayed: Vec<usize> = replay.iter().filter_map(record_count).collect();
        assert_eq!(replayed, vec![2]);
        assert_eq!(replay.len(), 3);

        process_tx.send(ProcessEvent::Stdout(record_lines(&[3]))).await.unwrap();
        process_tx.send(ProcessEvent::Exit(Some(0))).await.unwrap();
        assert_eq!(recv_records(&mut second).await, 1);
        assert_eq!(second.recv().await.unwrap(), BlameEvent::Finished { total: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_after_finish_is_complete() {
        let source = Arc::new(FakeSource::new().file_text("x").blame(
            &["abc123 1 1 1", "filename foo.txt", "abc123 2 2 1", "filename foo.txt"],
            Some(0),
        ));
        let session = BlameSession::start(source.clone(), "/repo".into(), query(), &CoreConfig::default());
        let (_, mut live) = session.subscribe();
        while !matches!(live.recv().await.unwrap(), BlameEvent::Finished { .. }) {}

        let (replay, _) = session.subscribe();
        assert_eq!(replay.len(), 4);
        assert_eq!(replay[0], BlameEvent::Options(query()));
        assert_eq!(replay[1], BlameEvent::FileContents { text: "x".to_string() });
        assert_eq!(record_count(&replay[2]), Some(2));
        assert_eq!(replay[3], BlameEvent::Finished { total: 2 });
        // Reattaching never starts another blame.
        assert_eq!(source.blame_queries().len(), 1);
    }

    #[tokio::test]
    async fn test_close_stops_blame_process() {
        let (process_tx, process_rx) = mpsc::channel(8);
        let source = Arc::new(FakeSource::new().file_text("x").blame_stream(process_rx));
        let session = BlameSession::start(source, "/repo".into(), query(), &CoreConfig::default());

        session.close();
        tokio::time::timeout(Duration::from_secs(5), process_tx.closed())
            .await
            .expect("blame stream should be released");
    }
}
