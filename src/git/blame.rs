//! `git blame --incremental` parsing and blame sessions.
//!
//! The incremental format is a sequence of records:
//! ```text
//! <revision> <source line> <result line> <num lines>
//! author Jane
//! author-mail <jane@x.com>
//! ...
//! filename foo.txt
//! ```
//! Metadata lines only appear the first time a revision shows up; `filename`
//! always closes the record.
//!
//! Used by: blame route (SSE)

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::config::CoreConfig;
use crate::error::{AppError, Result};
use crate::git::batch::{BatchThrottle, LineSplitter, ThrottleConfig};
use crate::git::process::{HistorySource, ProcessEvent, ProcessStream};
use crate::models::{BlameEvent, BlameQuery, BlameRecord, RevisionShortData};

#[derive(Debug)]
enum ParserState {
    AwaitingHeader,
    Accumulating(BlameRecord),
}

/// Line-at-a-time state machine producing completed `BlameRecord`s.
#[derive(Debug)]
pub struct BlameStreamParser {
    state: ParserState,
    line_number: usize,
}

impl Default for BlameStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BlameStreamParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingHeader,
            line_number: 0,
        }
    }

    /// Feed one line; returns the record it completed, if any.
    pub fn push_line(&mut self, line: &str) -> Result<Option<BlameRecord>> {
        self.line_number += 1;
        if line.is_empty() {
            return Ok(None);
        }

        let (key, value) = line.split_once(' ').unwrap_or((line, ""));

        match std::mem::replace(&mut self.state, ParserState::AwaitingHeader) {
            ParserState::AwaitingHeader => {
                let record = parse_header(line).ok_or_else(|| self.desync(format!(
                    "expected a record header, got {:?}",
                    line
                )))?;
                self.state = ParserState::Accumulating(record);
                Ok(None)
            }
            ParserState::Accumulating(mut record) => {
                if key == "filename" {
                    record.filename = value.to_string();
                    return Ok(Some(record));
                }
                if !apply_metadata(&mut record, key, value) {
                    if parse_header(line).is_some() {
                        return Err(self.desync(format!(
                            "header {:?} before the open record's filename",
                            line
                        )));
                    }
                    tracing::warn!("Skipping unknown blame key {:?} on line {}", key, self.line_number);
                }
                self.state = ParserState::Accumulating(record);
                Ok(None)
            }
        }
    }

    /// True when the stream stopped between records.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ParserState::AwaitingHeader)
    }

    fn desync(&self, reason: String) -> AppError {
        AppError::BlameDesync {
            line_number: self.line_number,
            reason,
        }
    }
}

fn parse_header(line: &str) -> Option<BlameRecord> {
    let mut tokens = line.split(' ');
    let revision = tokens.next()?;
    let source_line = tokens.next()?.parse().ok()?;
    let result_line = tokens.next()?.parse().ok()?;
    let num_lines = tokens.next()?.parse().ok()?;
    if tokens.next().is_some()
        || revision.is_empty()
        || !revision.chars().all(|c| c.is_ascii_hexdigit())
    {
        return None;
    }

    Some(BlameRecord {
        revision: revision.to_string(),
        source_line,
        result_line,
        num_lines,
        ..BlameRecord::default()
    })
}

/// Returns false for keys this parser does not know.
fn apply_metadata(record: &mut BlameRecord, key: &str, value: &str) -> bool {
    match key {
        "previous" => {
            let (revision, path) = value.split_once(' ').unwrap_or((value, ""));
            record.previous = Some(revision.to_string());
            record.previous_path = (!path.is_empty()).then(|| path.to_string());
            return true;
        }
        "boundary" => {
            record.boundary = true;
            return true;
        }
        _ => {}
    }

    let short = record.revision_short_data.get_or_insert_with(RevisionShortData::default);
    match key {
        "author" => short.author = Some(value.to_string()),
        "author-mail" => short.author_mail = Some(value.to_string()),
        "author-time" => short.author_time = value.parse().ok(),
        "author-tz" => short.author_tz = Some(value.to_string()),
        "committer" => short.committer = Some(value.to_string()),
        "committer-mail" => short.committer_mail = Some(value.to_string()),
        "committer-time" => short.committer_time = value.parse().ok(),
        "committer-tz" => short.committer_tz = Some(value.to_string()),
        "summary" => short.summary = Some(value.to_string()),
        _ => {
            if *short == RevisionShortData::default() {
                record.revision_short_data = None;
            }
            return false;
        }
    }
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlameOutcome {
    Finished(usize),
    Failed(String),
    /// The receiving side went away
    Closed,
}

/// Chunked blame output to throttled record batches.
pub struct BlameStream {
    splitter: LineSplitter,
    parser: BlameStreamParser,
    throttle: BatchThrottle,
    pending: Vec<BlameRecord>,
}

impl BlameStream {
    pub fn new(config: ThrottleConfig, now: Instant) -> Self {
        Self {
            splitter: LineSplitter::new(),
            parser: BlameStreamParser::new(),
            throttle: BatchThrottle::new(config, now),
            pending: Vec::new(),
        }
    }

    /// Records completed before a desync stay pending, so they can still be flushed.
    pub fn push_chunk(&mut self, chunk: &[u8], now: Instant) -> Result<Option<Vec<BlameRecord>>> {
        for line in self.splitter.push(chunk) {
            if let Some(record) = self.parser.push_line(&line)? {
                self.pending.push(record);
            }
        }
        Ok(self.flush_due(now))
    }

    pub fn flush_due(&mut self, now: Instant) -> Option<Vec<BlameRecord>> {
        if self.pending.is_empty() || !self.throttle.ready(now) {
            return None;
        }
        Some(self.take_batch(now))
    }

    pub fn pending_deadline(&self) -> Option<Instant> {
        (!self.pending.is_empty()).then(|| self.throttle.deadline())
    }

    /// Everything still buffered once the process exited cleanly.
    pub fn finish(&mut self, now: Instant) -> Result<Vec<BlameRecord>> {
        if let Some(line) = self.splitter.finish() {
            if let Some(record) = self.parser.push_line(&line)? {
                self.pending.push(record);
            }
        }
        if !self.parser.is_idle() {
            tracing::warn!("Blame output ended inside a record; dropping it");
        }
        Ok(self.take_batch(now))
    }

    pub fn total_delivered(&self) -> usize {
        self.throttle.total_delivered()
    }

    fn take_batch(&mut self, now: Instant) -> Vec<BlameRecord> {
        let records = std::mem::take(&mut self.pending);
        self.throttle.delivered(records.len(), now);
        records
    }

    /// Drive the stream until the blame process exits or `tx` is closed.
    pub async fn pump(mut self, mut events: ProcessStream, tx: &mpsc::Sender<BlameEvent>) -> BlameOutcome {
        loop {
            let deadline = self.pending_deadline();
            let flush_timer = sleep_until(deadline.unwrap_or_else(Instant::now));

            let batch = tokio::select! {
                _ = tx.closed() => return BlameOutcome::Closed,
                _ = flush_timer, if deadline.is_some() => self.flush_due(Instant::now()),
                event = events.recv() => match event {
                    Some(ProcessEvent::Stdout(chunk)) => match self.push_chunk(&chunk, Instant::now()) {
                        Ok(batch) => batch,
                        Err(e) => return self.fail(tx, e.to_string()).await,
                    },
                    Some(ProcessEvent::Stderr(line)) => {
                        tracing::warn!("git blame: {}", line);
                        None
                    }
                    Some(ProcessEvent::Exit(Some(0))) => {
                        let records = match self.finish(Instant::now()) {
                            Ok(records) => records,
                            Err(e) => return self.fail(tx, e.to_string()).await,
                        };
                        if !records.is_empty()
                            && tx.send(BlameEvent::Records { records }).await.is_err()
                        {
                            return BlameOutcome::Closed;
                        }
                        return BlameOutcome::Finished(self.total_delivered());
                    }
                    Some(ProcessEvent::Exit(code)) => {
                        return self.fail(tx, format!("git blame exited with {:?}", code)).await;
                    }
                    None => {
                        return self
                            .fail(tx, "git blame output ended without an exit status".to_string())
                            .await;
                    }
                },
            };

            if let Some(records) = batch {
                if tx.send(BlameEvent::Records { records }).await.is_err() {
                    return BlameOutcome::Closed;
                }
            }
        }
    }

    /// Deliver every completed record still held back, then report the failure.
    async fn fail(&mut self, tx: &mpsc::Sender<BlameEvent>, reason: String) -> BlameOutcome {
        if !self.pending.is_empty() {
            let records = self.take_batch(Instant::now());
            if tx.send(BlameEvent::Records { records }).await.is_err() {
                return BlameOutcome::Closed;
            }
        }
        BlameOutcome::Failed(reason)
    }
}

/// Start blaming `query.path`; events arrive on the returned channel.
///
/// Dropping the receiver ends the session and kills the blame process.
pub fn start_blame(
    source: Arc<dyn HistorySource>,
    repo_path: PathBuf,
    query: BlameQuery,
    config: &CoreConfig,
) -> mpsc::Receiver<BlameEvent> {
    let (tx, rx) = mpsc::channel(config.event_capacity);
    let throttle = config.blame_throttle;

    tokio::spawn(async move {
        if tx.send(BlameEvent::Options(query.clone())).await.is_err() {
            return;
        }

        let contents = async {
            let revision = query.revision.as_deref().unwrap_or("HEAD");
            let event = match source.file_contents(&repo_path, &query.path, revision).await {
                Ok(text) => BlameEvent::FileContents { text },
                Err(e) => {
                    tracing::warn!("No contents for {} at {}: {}", query.path, revision, e);
                    BlameEvent::FileContentsUnavailable { error: e.to_string() }
                }
            };
            let _ = tx.send(event).await;
        };

        let records = async {
            match source.blame_incremental(&repo_path, &query) {
                Ok(events) => BlameStream::new(throttle, Instant::now()).pump(events, &tx).await,
                Err(e) => BlameOutcome::Failed(e.to_string()),
            }
        };

        let ((), outcome) = tokio::join!(contents, records);
        let last = match outcome {
            BlameOutcome::Finished(total) => {
                tracing::info!("Blame of {} finished: {} records", query.path, total);
                BlameEvent::Finished { total }
            }
            BlameOutcome::Failed(reason) => {
                tracing::error!("Blame of {} failed: {}", query.path, reason);
                BlameEvent::Failed { reason }
            }
            BlameOutcome::Closed => {
                tracing::debug!("Blame of {} abandoned", query.path);
                return;
            }
        };
        let _ = tx.send(last).await;
    });

    rx
}
