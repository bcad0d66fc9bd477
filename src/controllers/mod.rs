pub mod inventory;
pub mod orders;
pub mod tickets;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(orders::routes())
        .merge(inventory::routes())
        .merge(tickets::routes())
}

pub fn health_route() -> Router<Arc<crate::AppState>> {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
