//! Parser for single-revision `git show` output.
//!
//! The revision is requested with `SHOW_FORMAT`, which separates the header
//! fields with NUL bytes and ends the message with one more NUL. Everything
//! after the last NUL is `--name-status` output against the first parent.

use chrono::DateTime;

use crate::error::{AppError, Result};
use crate::models::{AuthorInfo, FileChange, FileChangeKind, Revision};

/// Hash, parents, author name, author email, author date (strict ISO 8601), raw message.
pub const SHOW_FORMAT: &str = "%H%x00%P%x00%an%x00%ae%x00%aI%x00%B%x00";

const FIELD_COUNT: usize = 6;

pub fn parse_show_output(revision: &str, stdout: &str) -> Result<Revision> {
    let malformed = |reason: String| AppError::MalformedOutput {
        revision: revision.to_string(),
        reason,
    };

    let fields: Vec<&str> = stdout.splitn(FIELD_COUNT + 1, '\0').collect();
    if fields.len() <= FIELD_COUNT {
        return Err(malformed(format!(
            "expected {} NUL-separated fields, found {}",
            FIELD_COUNT + 1,
            fields.len()
        )));
    }

    let parents = fields[1].split_whitespace().map(str::to_string).collect();
    let author_date = DateTime::parse_from_rfc3339(fields[4].trim())
        .map_err(|e| malformed(format!("bad author date {:?}: {}", fields[4], e)))?;
    let (subject, body) = split_message(fields[5]);

    Ok(Revision {
        revision: revision.to_string(),
        parents,
        author: AuthorInfo {
            name: fields[2].to_string(),
            email: fields[3].to_string(),
        },
        author_date,
        subject,
        body,
        changes: parse_name_status(fields[6]),
    })
}

/// Subject is everything before the first blank line.
fn split_message(message: &str) -> (String, Option<String>) {
    match message.find("\n\n") {
        Some(pos) if pos > 0 => {
            let body = message[pos + 2..].trim_end();
            let body = (!body.is_empty()).then(|| body.to_string());
            (message[..pos].to_string(), body)
        }
        _ => (message.trim_end().to_string(), None),
    }
}

fn parse_name_status(text: &str) -> Vec<FileChange> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let status = parts.next()?.trim();
            let path = parts.next()?.to_string();
            let kind = FileChangeKind::from_status(status);

            if kind == FileChangeKind::Unknown {
                tracing::warn!("Unexpected file change type: {}", status);
            }

            let new_path = match kind {
                FileChangeKind::Rename => parts.next().map(str::to_string),
                _ => None,
            };

            Some(FileChange { kind, path, new_path })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn show_output(message: &str, changes: &str) -> String {
        format!(
            "{}\0{}\0{}\0{}\0{}\0{}\0{}",
            "a1b2c3",
            "p1 p2",
            "Jane Doe",
            "jane@example.com",
            "2024-03-01T12:30:00+01:00",
            message,
            changes
        )
    }

    #[test]
    fn test_parse_full_revision() {
        let out = show_output(
            "Fix the parser\n\nLonger explanation\nacross lines\n",
            "\nM\tsrc/lib.rs\nA\tdocs/new.md\nR087\told/name.rs\tnew/name.rs\nD\tgone.txt\n",
        );
        let rev = parse_show_output("a1b2c3", &out).unwrap();

        assert_eq!(rev.revision, "a1b2c3");
        assert_eq!(rev.parents, vec!["p1", "p2"]);
        assert_eq!(rev.author.name, "Jane Doe");
        assert_eq!(rev.author.email, "jane@example.com");
        assert_eq!(rev.author_date.timestamp(), 1709292600);
        assert_eq!(rev.subject, "Fix the parser");
        assert_eq!(rev.body.as_deref(), Some("Longer explanation\nacross lines"));

        assert_eq!(rev.changes.len(), 4);
        assert_eq!(rev.changes[0].kind, FileChangeKind::Modify);
        assert_eq!(rev.changes[1].kind, FileChangeKind::Add);
        assert_eq!(rev.changes[2].kind, FileChangeKind::Rename);
        assert_eq!(rev.changes[2].path, "old/name.rs");
        assert_eq!(rev.changes[2].new_path.as_deref(), Some("new/name.rs"));
        assert_eq!(rev.changes[3].kind, FileChangeKind::Delete);
    }

    #[test]
    fn test_subject_only_message_and_no_changes() {
        let out = show_output("One liner\n", "");
        let rev = parse_show_output("a1b2c3", &out).unwrap();
        assert_eq!(rev.subject, "One liner");
        assert_eq!(rev.body, None);
        assert!(rev.changes.is_empty());
    }

    #[test]
    fn test_missing_delimiter_is_malformed() {
        let err = parse_show_output("a1b2c3", "a1b2c3\0p1\0Jane").unwrap_err();
        assert!(matches!(err, AppError::MalformedOutput { ref revision, .. } if revision == "a1b2c3"));
    }

    #[test]
    fn test_unknown_status_letter() {
        let out = show_output("Subject", "\nT\tlink\n");
        let rev = parse_show_output("a1b2c3", &out).unwrap();
        assert_eq!(rev.changes[0].kind, FileChangeKind::Unknown);
        assert_eq!(rev.changes[0].path, "link");
    }
}
