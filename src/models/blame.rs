//! Blame data transfer objects.
//!
//! Records are assembled by the incremental blame parser and streamed to the
//! blame view in batches. A record covers `num_lines` consecutive lines of the
//! file starting at `result_line`.

use serde::{Deserialize, Serialize};

/// One completed attribution record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameRecord {
    /// Revision that last changed these lines
    pub revision: String,
    /// First line number in that revision (1-indexed)
    pub source_line: u32,
    /// First line number in the blamed file (1-indexed)
    pub result_line: u32,
    /// Number of consecutive lines covered
    pub num_lines: u32,
    /// Revision before `revision` that touched this range, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    /// Path of the file in `previous`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
    /// Only present the first time a revision appears in the stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_short_data: Option<RevisionShortData>,
    /// Set when `revision` is a root commit or the range boundary
    #[serde(default)]
    pub boundary: bool,
    /// Path of the file in `revision`
    pub filename: String,
}

/// Short per-revision metadata carried by the blame stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionShortData {
    pub author: Option<String>,
    pub author_mail: Option<String>,
    pub author_time: Option<i64>,
    pub author_tz: Option<String>,
    pub committer: Option<String>,
    pub committer_mail: Option<String>,
    pub committer_time: Option<i64>,
    pub committer_tz: Option<String>,
    pub summary: Option<String>,
}

/// Parameters of one blame invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameQuery {
    pub path: String,
    /// Historical revision to blame; the working state when unset
    pub revision: Option<String>,
    /// Line the view should scroll to once contents arrive
    pub starting_line: Option<u32>,
}

/// Events of one blame session, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BlameEvent {
    Options(BlameQuery),
    FileContents { text: String },
    FileContentsUnavailable { error: String },
    Records { records: Vec<BlameRecord> },
    Finished { total: usize },
    Failed { reason: String },
}

impl BlameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BlameEvent::Options(_) => "blame-options",
            BlameEvent::FileContents { .. } => "file-contents",
            BlameEvent::FileContentsUnavailable { .. } => "file-contents-unavailable",
            BlameEvent::Records { .. } => "blame-records",
            BlameEvent::Finished { .. } => "blame-finished",
            BlameEvent::Failed { .. } => "blame-failed",
        }
    }
}
