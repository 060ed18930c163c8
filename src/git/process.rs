//! Boundary to the external `git` executable.
//!
//! The core only sees the `HistorySource` trait. `GitCli` is the production
//! implementation: it builds argument lists and spawns `git` through
//! `tokio::process`. Streaming commands hand back a channel of
//! `ProcessEvent`s; dropping the receiver kills the child.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::git::show::{parse_show_output, SHOW_FORMAT};
use crate::models::{BlameQuery, LogQuery, Revision};

const STDOUT_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(Vec<u8>),
    Stderr(String),
    /// Exit code; `None` when the process was killed by a signal
    Exit(Option<i32>),
}

pub type ProcessStream = mpsc::Receiver<ProcessEvent>;

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// First-parent revision identifiers, newest first, one per line.
    fn list_revisions(&self, repo_path: &Path, query: &LogQuery) -> Result<ProcessStream>;

    /// Load and parse one revision's metadata.
    async fn show_revision(&self, repo_path: &Path, revision: &str) -> Result<Revision>;

    /// `git blame --incremental` output for one file.
    fn blame_incremental(&self, repo_path: &Path, query: &BlameQuery) -> Result<ProcessStream>;

    /// File text at a revision.
    async fn file_contents(&self, repo_path: &Path, path: &str, revision: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    git: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(git: impl Into<PathBuf>) -> Self {
        Self { git: git.into() }
    }

    fn command(&self, repo_path: &Path) -> Command {
        let mut cmd = Command::new(&self.git);
        cmd.arg("-C").arg(repo_path);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run a command that reads `object`; a missing object is `RevisionNotFound`.
    async fn run(&self, repo_path: &Path, args: &[&str], object: &str) -> Result<String> {
        let output = self.command(repo_path).args(args).output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let command = args.first().copied().unwrap_or_default();

        if !output.status.success() {
            return Err(command_failure(command, object, &output.status.to_string(), stderr.trim()));
        }
        if !stderr.trim().is_empty() {
            tracing::warn!("git {}: {}", command, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn spawn_streaming(&self, repo_path: &Path, args: Vec<String>) -> Result<ProcessStream> {
        let mut child = self
            .command(repo_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Internal("child stderr not captured".to_string()))?;

        let (tx, rx) = mpsc::channel(64);

        let stderr_tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(ProcessEvent::Stderr(line)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut buf = vec![0u8; STDOUT_CHUNK_SIZE];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(ProcessEvent::Stdout(buf[..n].to_vec())).await.is_err() {
                            // Receiver gone; dropping `child` kills the process.
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to read git output: {}", e);
                        break;
                    }
                }
            }

            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::error!("Failed to wait for git: {}", e);
                    None
                }
            };
            let _ = tx.send(ProcessEvent::Exit(code)).await;
        });

        Ok(rx)
    }
}

const MISSING_OBJECT_MESSAGES: [&str; 6] = [
    "unknown revision",
    "bad revision",
    "bad object",
    "invalid object name",
    "does not exist in",
    "exists on disk, but not in",
];

fn command_failure(command: &str, object: &str, status: &str, stderr: &str) -> AppError {
    if MISSING_OBJECT_MESSAGES.iter().any(|m| stderr.contains(m)) {
        return AppError::RevisionNotFound(object.to_string());
    }
    AppError::Process(format!("git {} exited with {}: {}", command, status, stderr))
}

#[async_trait]
impl HistorySource for GitCli {
    fn list_revisions(&self, repo_path: &Path, query: &LogQuery) -> Result<ProcessStream> {
        let branch = query.branch.clone().unwrap_or_else(|| "HEAD".to_string());
        let mut args = vec!["rev-list".to_string(), "--first-parent".to_string(), branch];
        if let Some(path) = query.path.as_deref().filter(|p| !p.is_empty()) {
            args.push("--".to_string());
            args.push(path.to_string());
        }
        tracing::debug!("Listing revisions: git {}", args.join(" "));
        self.spawn_streaming(repo_path, args)
    }

    async fn show_revision(&self, repo_path: &Path, revision: &str) -> Result<Revision> {
        if revision.is_empty() {
            return Err(AppError::InvalidArgument("missing revision".to_string()));
        }
        let format = format!("--format=format:{}", SHOW_FORMAT);
        let stdout = self
            .run(
                repo_path,
                &[
                    "show",
                    &format,
                    "--name-status",
                    "-m",
                    "--first-parent",
                    "--no-abbrev",
                    revision,
                ],
                revision,
            )
            .await?;
        parse_show_output(revision, &stdout)
    }

    fn blame_incremental(&self, repo_path: &Path, query: &BlameQuery) -> Result<ProcessStream> {
        let mut args = vec!["blame".to_string(), "--incremental".to_string()];
        if let Some(revision) = query.revision.as_deref().filter(|r| !r.is_empty()) {
            args.push(revision.to_string());
        }
        args.push("--".to_string());
        args.push(query.path.clone());
        tracing::debug!("Blaming: git {}", args.join(" "));
        self.spawn_streaming(repo_path, args)
    }

    async fn file_contents(&self, repo_path: &Path, path: &str, revision: &str) -> Result<String> {
        let object = format!("{}:{}", revision, path);
        self.run(repo_path, &["show", &object], &object).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_objects_are_not_found() {
        for stderr in [
            "fatal: ambiguous argument 'nope': unknown revision or path not in the working tree.",
            "fatal: bad object deadbeef",
            "fatal: invalid object name 'nope'.",
            "fatal: path 'gone.txt' does not exist in 'HEAD'",
            "fatal: path 'new.txt' exists on disk, but not in 'abc123'",
        ] {
            let err = command_failure("show", "abc123:gone.txt", "exit status: 128", stderr);
            assert!(matches!(err, AppError::RevisionNotFound(ref o) if o == "abc123:gone.txt"), "{}", stderr);
        }
    }

    #[test]
    fn test_other_failures_stay_process_errors() {
        let err = command_failure("show", "HEAD", "exit status: 128", "fatal: not a git repository");
        assert!(matches!(err, AppError::Process(ref m) if m.contains("not a git repository")));
    }
}
