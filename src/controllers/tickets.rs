use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::AuthUser;
use crate::services::tickets::{CheckInRequest, TransferRequest};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tickets/{id}/transfer", post(transfer_ticket))
        .route("/events/{id}/check-in", post(check_in))
}

// POST /api/tickets/{id}/transfer
async fn transfer_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<TransferRequest>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.engine.transfer_ticket(ticket_id, user.user_id, req).await?))
}

// POST /api/events/{id}/check-in
async fn check_in(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
    Json(req): Json<CheckInRequest>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.engine.check_in(event_id, user.user_id, req).await?))
}
