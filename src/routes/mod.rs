//! API route handlers - maps HTTP endpoints to log sessions and blame.
//!
//! Each submodule defines routes for a feature area:
//! - `repository`: Repo info and ref badges (GET /api/v1/repository)
//! - `logs`: Log session lifecycle, revision ranges, event stream
//! - `search`: Full-history search control for a log session
//! - `revisions`: One revision's details
//! - `blame`: Streaming per-line attribution (SSE)

pub mod blame;
pub mod logs;
pub mod repository;
pub mod revisions;
pub mod search;

use axum::response::sse::Event;
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::config::CoreConfig;
use crate::git::registry::Session;
use crate::git::{BlameSession, CacheRegistry, LogSession, SessionRegistry, SharedRepo, SubscriberGuard};
use crate::models::LogQuery;

#[derive(Clone)]
pub struct AppState {
    pub repo: SharedRepo,
    pub caches: Arc<CacheRegistry>,
    pub sessions: SessionRegistry<LogSession>,
    pub blames: SessionRegistry<BlameSession>,
    pub config: Arc<CoreConfig>,
    /// Branch/path given on the command line, used when a request omits them
    pub default_query: LogQuery,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(repository::routes(state.clone()))
        .merge(logs::routes(state.clone()))
        .merge(search::routes(state.clone()))
        .merge(revisions::routes(state.clone()))
        .merge(blame::routes(state))
}

pub(crate) fn sse_event<T: Serialize>(name: &'static str, data: &T) -> Result<Event, axum::Error> {
    Event::default().event(name).json_data(data)
}

/// SSE events from a broadcast subscription; a lagging client skips what it missed.
pub(crate) fn broadcast_stream<T>(
    rx: broadcast::Receiver<T>,
    name: fn(&T) -> &'static str,
) -> impl Stream<Item = Result<Event, axum::Error>>
where
    T: Clone + Serialize + Send + 'static,
{
    stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((sse_event(name(&event), &event), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

/// Keeps `guard` alive exactly as long as the client holds `events`.
pub(crate) fn guarded_stream<S, T>(events: S, guard: SubscriberGuard<T>) -> impl Stream<Item = S::Item>
where
    S: Stream + Send + 'static,
    T: Session,
{
    stream::unfold((events.boxed(), guard), |(mut events, guard)| async move {
        let event = events.next().await?;
        Some((event, (events, guard)))
    })
}
