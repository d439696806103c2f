//! service::routes::repo
//!
//! Git smart-HTTP endpoints for the template repository.
//!
//! Only the configured repository name is served; any other name, and any
//! other sub-path, is a plain 404. A successful receive-pack may have moved
//! the checked-out branch underneath the cache, so it triggers a full
//! invalidation.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::coordinator::Coordinator;
use crate::git::wire::{self, WireService};
use crate::git::WireError;
use crate::service::error::ApiError;

use super::RawBody;

pub fn router() -> Router<Arc<Coordinator>> {
    Router::new()
        .route("/repo/:name/info/refs", get(info_refs))
        .route("/repo/:name/git-upload-pack", post(upload_pack))
        .route("/repo/:name/git-receive-pack", post(receive_pack))
}

fn ensure_repo(coordinator: &Coordinator, name: &str) -> Result<(), ApiError> {
    if wire::matches_repo_name(name, &coordinator.config().git.repo_name) {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("no repository named '{}'", name)))
    }
}

fn git_response(content_type: String, body: Vec<u8>) -> Response {
    let mut response = body.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn info_refs(
    State(coordinator): State<Arc<Coordinator>>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    ensure_repo(&coordinator, &name)?;
    let service = WireService::parse(query.get("service").map(String::as_str).unwrap_or(""))?;

    let body = wire::advertise_refs(&coordinator.store().work_dir(), service).await?;
    Ok(git_response(service.advertisement_content_type(), body))
}

async fn upload_pack(
    State(coordinator): State<Arc<Coordinator>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: RawBody,
) -> Result<Response, ApiError> {
    let body = rpc_body(&coordinator, &name, &headers, body?)?;
    let service = WireService::UploadPack;
    let result = wire::rpc(&coordinator.store().work_dir(), service, body).await?;
    Ok(git_response(service.result_content_type(), result))
}

async fn receive_pack(
    State(coordinator): State<Arc<Coordinator>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: RawBody,
) -> Result<Response, ApiError> {
    let body = rpc_body(&coordinator, &name, &headers, body?)?;
    let service = WireService::ReceivePack;
    let result = wire::rpc(&coordinator.store().work_dir(), service, body).await?;

    coordinator.external_push_completed();
    Ok(git_response(service.result_content_type(), result))
}

fn rpc_body(
    coordinator: &Coordinator,
    name: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Vec<u8>, ApiError> {
    ensure_repo(coordinator, name)?;
    let encoding = headers
        .get(header::CONTENT_ENCODING)
        .map(|v| v.to_str().map_err(|_| WireError::Compressed {
            encoding: "<non-ascii>".to_string(),
        }))
        .transpose()?;
    wire::ensure_uncompressed(encoding)?;
    Ok(body.to_vec())
}
