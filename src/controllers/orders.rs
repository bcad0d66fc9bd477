use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::refund::RefundRequest;
use crate::services::reservation::ReservationRequest;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/payment", post(start_payment))
        .route("/orders/{id}/confirm", post(confirm_payment))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/orders/{id}/refund", post(refund_order))
}

// POST /api/orders
async fn create_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<ReservationRequest>,
) -> AppResult<impl IntoResponse> {
    let event_id = req.event_id;
    let details = state.engine.reserve(user.user_id, req).await?;
    state.cache.invalidate_availability(event_id).await;
    Ok((StatusCode::CREATED, Json(details)))
}

// GET /api/orders
async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.engine.order_history(user.user_id).await?))
}

// GET /api/orders/{id}
async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.engine.owned_order(order_id, user.user_id).await?))
}

// POST /api/orders/{id}/payment
async fn start_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let intent = state.engine.start_payment(order_id, user.user_id, user.email).await?;
    Ok(Json(intent))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ConfirmPaymentRequest {
    #[validate(length(min = 1, max = 512))]
    client_secret: String,
}

// POST /api/orders/{id}/confirm
async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate().map_err(|e| AppError::bad_request(e.to_string()))?;
    let outcome = state
        .engine
        .complete_payment(order_id, user.user_id, &req.client_secret)
        .await?;
    state.cache.invalidate_availability(outcome.order.order.event_id).await;

    let status = if outcome.succeeded { StatusCode::OK } else { StatusCode::PAYMENT_REQUIRED };
    Ok((status, Json(outcome)))
}

// POST /api/orders/{id}/cancel
async fn cancel_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let details = state.engine.cancel(order_id, user.user_id).await?;
    state.cache.invalidate_availability(details.order.event_id).await;
    Ok(Json(details))
}

// POST /api/orders/{id}/refund
async fn refund_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> AppResult<impl IntoResponse> {
    let details = state.engine.refund(order_id, user.user_id, req).await?;
    state.cache.invalidate_availability(details.order.event_id).await;
    Ok(Json(details))
}
