use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/events/{id}/availability", get(get_availability))
}

// GET /api/events/{id}/availability
async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.cache.get_availability(event_id).await?))
}
