//! Single revision endpoint.
//!
//! GET /api/v1/revisions/{revision}
//!
//! Full metadata and changed files for one revision, served from (and
//! stored into) the repository's revision cache.
//!
//! Used by: blame view details panel

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::error::Result;
use crate::models::RevisionDetail;
use crate::routes::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/revisions/{revision}", get(get_revision))
        .with_state(state)
}

async fn get_revision(
    State(state): State<AppState>,
    Path(revision): Path<String>,
) -> Result<Json<RevisionDetail>> {
    let store = state.caches.store_for(&state.repo.path);
    let data = store.get_or_load(&revision).await?;

    Ok(Json(RevisionDetail::new(&data)))
}
