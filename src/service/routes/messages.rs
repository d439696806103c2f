//! service::routes::messages
//!
//! Read-only browsing of sample messages.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::coordinator::Coordinator;
use crate::core::types::TemplateName;
use crate::service::error::ApiError;

use super::text_response;

pub fn router() -> Router<Arc<Coordinator>> {
    Router::new()
        .route("/messages", get(list))
        .route("/messages/*path", get(read))
}

async fn list(State(coordinator): State<Arc<Coordinator>>) -> Result<Json<Value>, ApiError> {
    let names = coordinator
        .message_names()
        .await
        .map_err(ApiError::from_listing)?;
    let messages: Vec<Value> = names.iter().map(|n| json!({ "name": n })).collect();
    Ok(Json(json!({ "messages": messages })))
}

async fn read(
    State(coordinator): State<Arc<Coordinator>>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let name = TemplateName::new(path)?;
    let content = coordinator.read_message(name).await?;
    Ok(text_response(&content))
}
