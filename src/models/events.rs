//! Log session events published to subscribers.
//!
//! - `RevisionCountEvent`: the sequence grew (or finished loading)
//! - `SearchEvent`: match batches and progress reports, tagged with the search text

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevisionCountEvent {
    pub revision_count: usize,
    pub all_loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SearchEvent {
    Matches {
        search_text: String,
        indices: Vec<usize>,
        /// True when this batch re-delivers previously found matches
        replay: bool,
    },
    Progress {
        search_text: String,
        /// Last scanned index
        current_index: usize,
        total: usize,
        complete: bool,
    },
}

impl SearchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SearchEvent::Matches { .. } => "search-match",
            SearchEvent::Progress { .. } => "search-progress",
        }
    }

    pub fn search_text(&self) -> &str {
        match self {
            SearchEvent::Matches { search_text, .. } | SearchEvent::Progress { search_text, .. } => {
                search_text
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPhase {
    Idle,
    Scanning,
    Paused,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchStatus {
    pub search_text: String,
    pub phase: SearchPhase,
    /// Number of indices scanned so far
    pub scanned: usize,
    pub matches: usize,
}
