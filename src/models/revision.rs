//! Revision metadata as produced by the single-revision parser.
//!
//! - `Revision`: one commit's immutable metadata (shared as `Arc<Revision>`)
//! - `FileChange` / `FileChangeKind`: name-status entries against the first parent
//! - `RevisionSlot`: one entry of a range response, either loaded or "not available"
//!
//! Used by: log view rows, revision details panel, search predicate

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::LoadFailure;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub revision: String,
    /// Parent hashes; the first one is the primary ancestor.
    pub parents: Vec<String>,
    pub author: AuthorInfo,
    pub author_date: DateTime<FixedOffset>,
    pub subject: String,
    pub body: Option<String>,
    pub changes: Vec<FileChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Add,
    Delete,
    Modify,
    Rename,
    Unknown,
}

impl FileChangeKind {
    /// Map a `--name-status` letter (`A`, `D`, `M`, `R100`, ...) to a kind.
    pub fn from_status(status: &str) -> Self {
        match status.chars().next() {
            Some('A') => FileChangeKind::Add,
            Some('D') => FileChangeKind::Delete,
            Some('M') => FileChangeKind::Modify,
            Some('R') => FileChangeKind::Rename,
            _ => FileChangeKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub kind: FileChangeKind,
    pub path: String,
    /// Destination path, only set for renames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
}

impl FileChange {
    /// Every path this change touches, old path first.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.path.as_str()).chain(self.new_path.as_deref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RevisionDetail {
    #[serde(flatten)]
    pub revision: Revision,
    pub relative_time: String,
}

impl RevisionDetail {
    pub fn new(revision: &Revision) -> Self {
        Self {
            relative_time: format_relative_time(revision.author_date.timestamp()),
            revision: revision.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RevisionSlot {
    Loaded(RevisionDetail),
    Unavailable { revision: String, error: String },
}

impl From<std::result::Result<std::sync::Arc<Revision>, LoadFailure>> for RevisionSlot {
    fn from(result: std::result::Result<std::sync::Arc<Revision>, LoadFailure>) -> Self {
        match result {
            Ok(revision) => RevisionSlot::Loaded(RevisionDetail::new(&revision)),
            Err(failure) => RevisionSlot::Unavailable {
                revision: failure.revision,
                error: failure.reason,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RevisionRangeResponse {
    pub start_index: usize,
    pub revisions: Vec<RevisionSlot>,
}

pub fn format_relative_time(timestamp: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let diff = now - timestamp;

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        let mins = diff / 60;
        format!("{} minute{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if diff < 86400 {
        let hours = diff / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if diff < 2592000 {
        let days = diff / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else if diff < 31536000 {
        let months = diff / 2592000;
        format!("{} month{} ago", months, if months == 1 { "" } else { "s" })
    } else {
        let years = diff / 31536000;
        format!("{} year{} ago", years, if years == 1 { "" } else { "s" })
    }
}
