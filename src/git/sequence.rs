//! Append-only list of revision identifiers for one log query.
//!
//! Index → identifier bindings never change once assigned. Growth and
//! settlement are published on a `watch` channel so readers can wait for
//! "at least N known, or no more coming".

use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    Loading,
    Complete,
    /// The listing process failed; no more identifiers will arrive.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceStatus {
    pub len: usize,
    pub state: SequenceState,
}

impl SequenceStatus {
    /// True once the length can no longer change.
    pub fn is_settled(&self) -> bool {
        self.state != SequenceState::Loading
    }

    pub fn is_complete(&self) -> bool {
        self.state == SequenceState::Complete
    }
}

pub struct RevisionSequence {
    ids: RwLock<Vec<String>>,
    status: watch::Sender<SequenceStatus>,
}

impl Default for RevisionSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl RevisionSequence {
    pub fn new() -> Self {
        let (status, _) = watch::channel(SequenceStatus {
            len: 0,
            state: SequenceState::Loading,
        });
        Self {
            ids: RwLock::new(Vec::new()),
            status,
        }
    }

    /// A sequence that is already fully known.
    pub fn complete(ids: Vec<String>) -> Self {
        let sequence = Self::new();
        sequence.append(ids, true);
        sequence
    }

    /// Append newly confirmed identifiers; `all_loaded` marks the end of the list.
    pub fn append(&self, batch: Vec<String>, all_loaded: bool) {
        let len = {
            let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
            ids.extend(batch);
            ids.len()
        };
        self.status.send_modify(|status| {
            status.len = len;
            if all_loaded {
                status.state = SequenceState::Complete;
            }
        });
    }

    pub fn mark_failed(&self) {
        self.status.send_modify(|status| {
            if status.state == SequenceState::Loading {
                status.state = SequenceState::Failed;
            }
        });
    }

    pub fn get(&self, index: usize) -> Option<String> {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Identifiers in `[start, end)`, clamped to what is known.
    pub fn slice(&self, start: usize, end: usize) -> Vec<String> {
        let ids = self.ids.read().unwrap_or_else(PoisonError::into_inner);
        let end = end.min(ids.len());
        ids.get(start..end).map(<[String]>::to_vec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.status.borrow().len
    }

    pub fn status(&self) -> SequenceStatus {
        *self.status.borrow()
    }

    /// Wait until at least `len` identifiers are known or the sequence settles.
    pub async fn wait_for_len(&self, len: usize) -> SequenceStatus {
        let mut rx = self.status.subscribe();
        match rx.wait_for(|status| status.len >= len || status.is_settled()).await {
            Ok(status) => *status,
            // The sender lives in `self`, so this only happens during teardown.
            Err(_) => self.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_append_and_lookup() {
        let seq = RevisionSequence::new();
        seq.append(vec!["a".into(), "b".into()], false);
        seq.append(vec!["c".into()], false);

        assert_eq!(seq.len(), 3);
        assert_eq!(seq.get(2).as_deref(), Some("c"));
        assert_eq!(seq.get(3), None);
        assert_eq!(seq.slice(1, 10), vec!["b", "c"]);
        assert!(seq.slice(5, 10).is_empty());
        assert_eq!(seq.status().state, SequenceState::Loading);
    }

    #[tokio::test]
    async fn test_wait_for_len_wakes_on_growth() {
        let seq = Arc::new(RevisionSequence::new());
        let writer = seq.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.append(vec!["a".into()], false);
            writer.append(vec!["b".into()], false);
        });

        let status = seq.wait_for_len(2).await;
        assert_eq!(status.len, 2);
        assert!(!status.is_settled());
    }

    #[tokio::test]
    async fn test_wait_for_len_wakes_on_failure() {
        let seq = Arc::new(RevisionSequence::new());
        seq.append(vec!["a".into()], false);
        let writer = seq.clone();
        tokio::spawn(async move {
            writer.mark_failed();
        });

        let status = seq.wait_for_len(10).await;
        assert_eq!(status.len, 1);
        assert_eq!(status.state, SequenceState::Failed);
        assert!(!status.is_complete());
    }

    #[test]
    fn test_failure_after_completion_is_ignored() {
        let seq = RevisionSequence::complete(vec!["a".into()]);
        seq.mark_failed();
        assert!(seq.status().is_complete());
    }
}
