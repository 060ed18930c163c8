//! Blame endpoints.
//!
//! - POST /api/v1/blame { path, revision?, starting_line? }
//!   Starts `git blame` for one file and returns `{ blame_id }`.
//!   Used by: blame view on open
//!
//! - GET /api/v1/blame/{id}/events (SSE)
//!   Everything produced so far (`blame-options`, `file-contents` or
//!   `file-contents-unavailable`, one `blame-records` batch with all records,
//!   `blame-finished`/`blame-failed` once done), then live `blame-records`
//!   batches and the final event. A reloading view reattaches here instead
//!   of blaming again.
//!
//! - DELETE /api/v1/blame/{id}
//!   Kills the blame process and forgets its records. A blame with no open
//!   event stream is also closed after the idle timeout.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::git::BlameSession;
use crate::models::{BlameEvent, BlameQuery};
use crate::routes::{broadcast_stream, guarded_stream, sse_event, AppState};

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/blame", post(open_blame))
        .route("/api/v1/blame/{id}", delete(close_blame))
        .route("/api/v1/blame/{id}/events", get(blame_events))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct OpenBlameResponse {
    blame_id: u64,
}

async fn open_blame(
    State(state): State<AppState>,
    Json(query): Json<BlameQuery>,
) -> Result<Json<OpenBlameResponse>> {
    if query.path.is_empty() {
        return Err(AppError::InvalidArgument("path is required".to_string()));
    }

    tracing::debug!("Blaming {} at {:?}", query.path, query.revision);
    let session = BlameSession::start(
        state.caches.source(),
        state.repo.path.clone(),
        query,
        &state.config,
    );
    let blame_id = state.blames.insert(session);

    Ok(Json(OpenBlameResponse { blame_id }))
}

async fn close_blame(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<()>> {
    state.blames.close(id)?;
    Ok(Json(()))
}

async fn blame_events(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let (session, guard) = state.blames.subscribe(id)?;
    let (replay, live) = session.subscribe();

    let replay = stream::iter(
        replay
            .into_iter()
            .map(|event| sse_event(event.name(), &event))
            .collect::<Vec<_>>(),
    );
    let events = replay.chain(broadcast_stream(live, BlameEvent::name));

    Ok(Sse::new(guarded_stream(events, guard)).keep_alive(KeepAlive::default()))
}
