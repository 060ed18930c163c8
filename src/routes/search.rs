//! Search control for a log session.
//!
//! - POST /api/v1/logs/{id}/search { text: string }
//!   Starts (or switches to) a search. Results arrive on the session's event
//!   stream as `search-match` / `search-progress`.
//!
//! - POST /api/v1/logs/{id}/search/pause
//! - POST /api/v1/logs/{id}/search/resume?replay=true
//!   `replay` re-sends every match found so far as one batch first.
//!
//! - GET /api/v1/logs/{id}/search
//!   Phase, scanned count and match count of the active search (or null).

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::SearchStatus;
use crate::routes::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/logs/{id}/search", get(get_status).post(start_search))
        .route("/api/v1/logs/{id}/search/pause", post(pause_search))
        .route("/api/v1/logs/{id}/search/resume", post(resume_search))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    text: String,
}

async fn start_search(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Option<SearchStatus>>> {
    if request.text.is_empty() {
        return Err(AppError::InvalidArgument("search text is empty".to_string()));
    }
    let session = state.sessions.get(id)?;
    session.search(&request.text);
    Ok(Json(session.search_status()))
}

async fn pause_search(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Option<SearchStatus>>> {
    let session = state.sessions.get(id)?;
    session.pause_search();
    Ok(Json(session.search_status()))
}

#[derive(Debug, Deserialize)]
struct ResumeQuery {
    #[serde(default)]
    replay: bool,
}

async fn resume_search(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<ResumeQuery>,
) -> Result<Json<Option<SearchStatus>>> {
    let session = state.sessions.get(id)?;
    session.resume_search(query.replay);
    Ok(Json(session.search_status()))
}

async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Option<SearchStatus>>> {
    let session = state.sessions.get(id)?;
    Ok(Json(session.search_status()))
}
