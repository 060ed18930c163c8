//! In-memory `HistorySource` for tests.

use async_trait::async_trait;
use chrono::DateTime;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::git::process::{HistorySource, ProcessEvent, ProcessStream};
use crate::models::{AuthorInfo, BlameQuery, FileChange, FileChangeKind, LogQuery, Revision};

pub struct FakeSource {
    order: Vec<String>,
    revisions: HashMap<String, Revision>,
    delay: Duration,
    fail_next: Mutex<HashSet<String>>,
    list_stream: Mutex<Option<ProcessStream>>,
    blame_stream: Mutex<Option<ProcessStream>>,
    blame_lines: Vec<String>,
    blame_exit: Option<i32>,
    file_text: Option<String>,
    show_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    blame_queries: Mutex<Vec<BlameQuery>>,
}

pub fn revision(id: &str, subject: &str) -> Revision {
    Revision {
        revision: id.to_string(),
        parents: Vec::new(),
        author: AuthorInfo {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
        },
        author_date: DateTime::parse_from_rfc3339("2024-01-01T00:00:00+00:00").unwrap(),
        subject: subject.to_string(),
        body: None,
        changes: vec![FileChange {
            kind: FileChangeKind::Modify,
            path: "src/main.rs".to_string(),
            new_path: None,
        }],
    }
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            revisions: HashMap::new(),
            delay: Duration::ZERO,
            fail_next: Mutex::new(HashSet::new()),
            list_stream: Mutex::new(None),
            blame_stream: Mutex::new(None),
            blame_lines: Vec::new(),
            blame_exit: Some(0),
            file_text: None,
            show_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            blame_queries: Mutex::new(Vec::new()),
        }
    }

    /// `count` revisions with ids `rev000`, `rev001`, ... and subjects `change N`.
    pub fn with_revisions(count: usize) -> Self {
        (0..count).fold(Self::new(), |source, i| {
            let id = format!("rev{:03}", i);
            source.revision(&id, &format!("change {}", i))
        })
    }

    pub fn revision(self, id: &str, subject: &str) -> Self {
        self.with(revision(id, subject))
    }

    pub fn with(mut self, data: Revision) -> Self {
        self.order.push(data.revision.clone());
        self.revisions.insert(data.revision.clone(), data);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Serve `list_revisions` from a caller-controlled event stream.
    pub fn list_stream(self, stream: ProcessStream) -> Self {
        *self.list_stream.lock().unwrap() = Some(stream);
        self
    }

    /// Serve `blame_incremental` from a caller-controlled event stream.
    pub fn blame_stream(self, stream: ProcessStream) -> Self {
        *self.blame_stream.lock().unwrap() = Some(stream);
        self
    }

    pub fn blame(mut self, lines: &[&str], exit: Option<i32>) -> Self {
        self.blame_lines = lines.iter().map(|l| l.to_string()).collect();
        self.blame_exit = exit;
        self
    }

    pub fn file_text(mut self, text: &str) -> Self {
        self.file_text = Some(text.to_string());
        self
    }

    pub fn fail_next(&self, id: &str) {
        self.fail_next.lock().unwrap().insert(id.to_string());
    }

    pub fn id(&self, index: usize) -> String {
        self.order[index].clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn show_calls(&self) -> usize {
        self.show_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn blame_queries(&self) -> Vec<BlameQuery> {
        self.blame_queries.lock().unwrap().clone()
    }
}

fn feed(events: Vec<ProcessEvent>) -> ProcessStream {
    let (tx, rx) = mpsc::channel(events.len().max(1));
    for event in events {
        tx.try_send(event).unwrap();
    }
    rx
}

#[async_trait]
impl HistorySource for FakeSource {
    fn list_revisions(&self, _repo_path: &Path, _query: &LogQuery) -> Result<ProcessStream> {
        if let Some(stream) = self.list_stream.lock().unwrap().take() {
            return Ok(stream);
        }
        let mut text = self.order.join("\n");
        text.push('\n');
        Ok(feed(vec![
            ProcessEvent::Stdout(text.into_bytes()),
            ProcessEvent::Exit(Some(0)),
        ]))
    }

    async fn show_revision(&self, _repo_path: &Path, revision: &str) -> Result<Revision> {
        self.show_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_next.lock().unwrap().remove(revision) {
            return Err(AppError::Process(format!("git show {} failed", revision)));
        }
        self.revisions
            .get(revision)
            .cloned()
            .ok_or_else(|| AppError::RevisionNotFound(revision.to_string()))
    }

    fn blame_incremental(&self, _repo_path: &Path, query: &BlameQuery) -> Result<ProcessStream> {
        self.blame_queries.lock().unwrap().push(query.clone());
        if let Some(stream) = self.blame_stream.lock().unwrap().take() {
            return Ok(stream);
        }
        let mut events: Vec<ProcessEvent> = self
            .blame_lines
            .iter()
            .map(|line| ProcessEvent::Stdout(format!("{}\n", line).into_bytes()))
            .collect();
        events.push(ProcessEvent::Exit(self.blame_exit));
        Ok(feed(events))
    }

    async fn file_contents(&self, _repo_path: &Path, path: &str, revision: &str) -> Result<String> {
        self.file_text
            .clone()
            .ok_or_else(|| AppError::Process(format!("no {} at {}", path, revision)))
    }
}
