//! Log session endpoints.
//!
//! - POST /api/v1/logs { branch?: string, path?: string }
//!   Starts listing revisions and returns `{ session_id }`.
//!   Used by: log view on open and when the branch/path filter changes
//!
//! - DELETE /api/v1/logs/{id}
//!   Stops the listing process, search and prefetching.
//!
//! - GET /api/v1/logs/{id}/revisions?start=0&count=50
//!   Revision data for a window of rows. Waits while the list is still too
//!   short; a row whose load failed carries an `error` instead of data.
//!
//! - GET /api/v1/logs/{id}/count
//!   Current `{ revision_count, all_loaded }`.
//!
//! - GET /api/v1/logs/{id}/events (SSE)
//!   `revision-count`, `search-match` and `search-progress` events. A session
//!   with no open event stream is closed after the idle timeout.

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::git::{LogSession, SubscriberGuard};
use crate::models::{LogQuery, RevisionCountEvent, RevisionRangeResponse, RevisionSlot, SearchEvent};
use crate::routes::{broadcast_stream, guarded_stream, sse_event, AppState};

const REVISION_COUNT_EVENT: &str = "revision-count";
const MAX_RANGE: usize = 1000;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/logs", post(open_log))
        .route("/api/v1/logs/{id}", delete(close_log))
        .route("/api/v1/logs/{id}/revisions", get(get_revisions))
        .route("/api/v1/logs/{id}/count", get(get_count))
        .route("/api/v1/logs/{id}/events", get(log_events))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct OpenLogRequest {
    branch: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenLogResponse {
    session_id: u64,
}

async fn open_log(
    State(state): State<AppState>,
    Json(request): Json<OpenLogRequest>,
) -> Result<Json<OpenLogResponse>> {
    let query = LogQuery {
        branch: request.branch.or_else(|| state.default_query.branch.clone()),
        path: request.path.or_else(|| state.default_query.path.clone()),
    };

    let store = state.caches.store_for(&state.repo.path);
    let source = state.caches.source();
    let session = LogSession::open(store, source.as_ref(), query, &state.config)?;
    let session_id = state.sessions.insert(session);

    Ok(Json(OpenLogResponse { session_id }))
}

async fn close_log(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<()>> {
    state.sessions.close(id)?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    #[serde(default)]
    start: usize,
    #[serde(default = "default_count")]
    count: usize,
}

fn default_count() -> usize {
    50
}

async fn get_revisions(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<RevisionRangeResponse>> {
    if range.count > MAX_RANGE {
        return Err(AppError::InvalidArgument(format!(
            "count must be at most {}",
            MAX_RANGE
        )));
    }

    let session = state.sessions.get(id)?;
    let results = session.request_revision_range(range.start, range.count).await;

    Ok(Json(RevisionRangeResponse {
        start_index: range.start,
        revisions: results.into_iter().map(RevisionSlot::from).collect(),
    }))
}

async fn get_count(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<RevisionCountEvent>> {
    let session = state.sessions.get(id)?;
    Ok(Json(session.revision_count()))
}

async fn log_events(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let (session, guard) = state.sessions.subscribe(id)?;
    Ok(Sse::new(session_events(session, guard)).keep_alive(KeepAlive::default()))
}

/// The session stays open while this stream (or another subscriber's) is alive.
fn session_events(
    session: Arc<LogSession>,
    guard: SubscriberGuard<LogSession>,
) -> impl Stream<Item = std::result::Result<Event, axum::Error>> {
    // Subscribe before reading the current count so no growth is missed.
    let counts = session.subscribe_revision_count();
    let searches = session.subscribe_search();
    let current = session.revision_count();

    let initial = stream::once(async move { sse_event(REVISION_COUNT_EVENT, &current) });
    let live = stream::select(
        broadcast_stream(counts, |_: &RevisionCountEvent| REVISION_COUNT_EVENT),
        broadcast_stream(searches, SearchEvent::name),
    );

    guarded_stream(initial.chain(live), guard)
}
