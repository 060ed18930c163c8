//! Application error types and HTTP response mapping.
//!
//! Defines `AppError` enum for all error conditions and implements Axum's
//! `IntoResponse` to automatically convert errors to appropriate HTTP responses
//! with JSON error bodies.
//!
//! Error mappings:
//! - `RepoNotFound`, `RevisionNotFound`, `SessionNotFound`, `BlameNotFound` → 404
//! - `InvalidArgument` → 400
//! - `RevisionLoad` → 404 when the revision does not exist, otherwise 502
//!   (the external tool failed for that one revision)
//! - `Git`, `Process`, `MalformedOutput`, `BlameDesync`, `Internal` → 500

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Revision not found: {0}")]
    RevisionNotFound(String),

    #[error("Log session not found: {0}")]
    SessionNotFound(u64),

    #[error("Blame session not found: {0}")]
    BlameNotFound(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Malformed output for {revision}: {reason}")]
    MalformedOutput { revision: String, reason: String },

    #[error("Blame stream out of sync at line {line_number}: {reason}")]
    BlameDesync { line_number: usize, reason: String },

    #[error(transparent)]
    RevisionLoad(#[from] LoadFailure),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Process(e.to_string())
    }
}

/// Failure of a single revision load.
///
/// Cloneable so one failed load can be handed to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Failed to load revision {revision}: {reason}")]
pub struct LoadFailure {
    pub revision: String,
    pub reason: String,
    /// The revision does not exist, as opposed to a failed or timed out load
    #[serde(skip)]
    pub missing: bool,
}

impl LoadFailure {
    pub fn new(revision: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            revision: revision.into(),
            reason: reason.to_string(),
            missing: false,
        }
    }

    pub fn from_error(revision: impl Into<String>, error: &AppError) -> Self {
        Self {
            missing: matches!(error, AppError::RevisionNotFound(_)),
            ..Self::new(revision, error)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Git(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::RepoNotFound(path) => {
                (StatusCode::NOT_FOUND, format!("Repository not found: {}", path))
            }
            AppError::RevisionNotFound(rev) => {
                (StatusCode::NOT_FOUND, format!("Revision not found: {}", rev))
            }
            AppError::SessionNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Log session not found: {}", id))
            }
            AppError::BlameNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Blame session not found: {}", id))
            }
            AppError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::RevisionLoad(failure) if failure.missing => {
                (StatusCode::NOT_FOUND, failure.to_string())
            }
            AppError::RevisionLoad(failure) => (StatusCode::BAD_GATEWAY, failure.to_string()),
            AppError::Process(_)
            | AppError::MalformedOutput { .. }
            | AppError::BlameDesync { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
