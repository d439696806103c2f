//! service::routes::health

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::coordinator::Coordinator;

pub fn router() -> Router<Arc<Coordinator>> {
    Router::new().route("/health", get(health))
}

async fn health(State(coordinator): State<Arc<Coordinator>>) -> Json<Value> {
    let pool = coordinator.pool_stats();
    let status = if pool.degraded { "degraded" } else { "ok" };
    Json(json!({ "status": status, "pool": pool }))
}
