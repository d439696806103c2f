//! service::routes::templates
//!
//! Template authoring and version control.
//!
//! Template names may contain `/`, so everything below `/templates/` is one
//! catch-all. The reserved `git/` prefix selects version control operations;
//! `reset-base` is only meaningful for POST.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::SetOutcome;
use crate::coordinator::{CommitRequest, Coordinator};
use crate::core::types::{BranchName, TemplateName};
use crate::service::error::ApiError;

use super::{parse_json_body, text_response, utf8_body, RawBody};

pub fn router() -> Router<Arc<Coordinator>> {
    Router::new()
        .route("/templates", get(list))
        .route(
            "/templates/*path",
            get(read).put(write).delete(delete).post(action),
        )
}

async fn list(State(coordinator): State<Arc<Coordinator>>) -> Result<Json<Value>, ApiError> {
    let names = coordinator
        .template_names()
        .await
        .map_err(ApiError::from_listing)?;
    let templates: Vec<Value> = names.iter().map(|n| json!({ "name": n })).collect();
    Ok(Json(json!({ "templates": templates })))
}

async fn read(
    State(coordinator): State<Arc<Coordinator>>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    match path.as_str() {
        "git/status" => {
            let status = coordinator.status().await?;
            Ok(Json(json!({ "status": status })).into_response())
        }
        "git/branches" => {
            let branches = coordinator.branches().await?;
            Ok(Json(json!({ "branches": branches })).into_response())
        }
        _ => {
            let name = template_name(&path)?;
            let content = coordinator.read_template(name).await?;
            Ok(text_response(&content))
        }
    }
}

async fn write(
    State(coordinator): State<Arc<Coordinator>>,
    Path(path): Path<String>,
    body: RawBody,
) -> Result<Response, ApiError> {
    let body = body?;
    let name = template_name(&path)?;
    let content = utf8_body(body)?;
    let status = match coordinator
        .write_template(name.clone(), content)
        .await
        .map_err(ApiError::from_write)?
    {
        SetOutcome::Created => StatusCode::CREATED,
        SetOutcome::Replaced => StatusCode::OK,
    };
    Ok((status, Json(json!({ "name": name }))).into_response())
}

async fn delete(
    State(coordinator): State<Arc<Coordinator>>,
    Path(path): Path<String>,
) -> Result<StatusCode, ApiError> {
    let name = template_name(&path)?;
    coordinator
        .delete_template(name)
        .await
        .map_err(ApiError::from_write)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchBody {
    name: Option<String>,
    base_branch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CommitBody {
    message: Option<String>,
    name: Option<String>,
    email: Option<String>,
}

async fn action(
    State(coordinator): State<Arc<Coordinator>>,
    Path(path): Path<String>,
    body: RawBody,
) -> Result<Response, ApiError> {
    let body = body?;
    match path.as_str() {
        "git/branches" => {
            let body: BranchBody = parse_json_body(&body)?;
            let name = BranchName::new(required(body.name)?)?;
            let base = body.base_branch.map(BranchName::new).transpose()?;
            let info = coordinator.create_branch(name, base).await?;
            Ok((StatusCode::CREATED, Json(json!({ "branch": info }))).into_response())
        }
        "git/checkout" => {
            let body: BranchBody = parse_json_body(&body)?;
            let name = BranchName::new(required(body.name)?)?;
            coordinator.checkout(name.clone()).await?;
            Ok(Json(json!({ "branch": name })).into_response())
        }
        "git/commit" => {
            let body: CommitBody = if body.is_empty() {
                CommitBody::default()
            } else {
                parse_json_body(&body)?
            };
            let oid = coordinator
                .commit(CommitRequest {
                    message: body.message,
                    name: body.name,
                    email: body.email,
                })
                .await?;
            Ok(Json(json!({ "commit": oid })).into_response())
        }
        "reset-base" => {
            let report = coordinator
                .reset_to_base()
                .await
                .map_err(ApiError::from_write)?;
            Ok(Json(json!({
                "moved": report.moved,
                "copied": report.copied,
                "backupDir": report.backup_dir,
            }))
            .into_response())
        }
        other => Err(ApiError::not_found(format!("no such operation: {}", other))),
    }
}

fn required(name: Option<String>) -> Result<String, ApiError> {
    name.filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("missing field: name"))
}

/// A template name usable on the authoring routes.
fn template_name(path: &str) -> Result<TemplateName, ApiError> {
    let name = TemplateName::new(path)?;
    if name.is_reserved() {
        return Err(ApiError::not_found(format!("no such operation: {}", path)));
    }
    Ok(name)
}
