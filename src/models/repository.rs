//! Repository-level DTOs.
//!
//! - `RepositoryInfo`: Repo metadata (header display)
//! - `RefMap`: revision hash → ref names, for ref badges in the log
//! - `CacheStats`: revision cache counters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub path: String,
    pub workdir: Option<String>,
    pub head_branch: Option<String>,
    pub head_revision: Option<String>,
    pub is_bare: bool,
    pub is_empty: bool,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub resolved: usize,
    pub pending: usize,
}

pub type RefMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQuery {
    /// Branch or revision to list from; the current branch when unset
    pub branch: Option<String>,
    /// Restrict the log to revisions touching this path
    pub path: Option<String>,
}
