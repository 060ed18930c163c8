//! Repository endpoints.
//!
//! - GET /api/v1/repository
//!   Repo metadata plus revision cache counters.
//!   Used by: header
//!
//! - GET /api/v1/repository/refs
//!   Revision hash -> branch/tag names.
//!   Used by: ref badges in the log view

use axum::{extract::State, routing::get, Json, Router};

use crate::error::Result;
use crate::models::{RefMap, RepositoryInfo};
use crate::routes::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/repository", get(get_repository_info))
        .route("/api/v1/repository/refs", get(get_refs))
        .with_state(state)
}

async fn get_repository_info(State(state): State<AppState>) -> Result<Json<RepositoryInfo>> {
    let stats = state.caches.store_for(&state.repo.path).stats();
    let info = state.repo.info(stats)?;
    Ok(Json(info))
}

async fn get_refs(State(state): State<AppState>) -> Result<Json<RefMap>> {
    let refs = state.repo.refs()?;
    Ok(Json(refs))
}
