//! service::routes::convert
//!
//! Conversion requests.
//!
//! # Request shapes
//!
//! - `POST /convert` with a JSON body of base64 fields: `templateBase64` and
//!   `messageBase64` are required, `replacementTableBase64` (a JSON object)
//!   and `templateMapBase64` (a JSON object of include name to template text)
//!   are optional
//! - `POST /convert/{template}` with the raw message as body
//!
//! # Response versions
//!
//! `?api-version=1` returns the whole structured result; `2` returns only the
//! rendered document. Failures always return the worker's error payload with
//! the worker's status.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::core::types::TemplateName;
use crate::pool::{ConversionJob, ConversionResult, TemplateSource};
use crate::service::error::ApiError;

use super::{parse_json_body, utf8_body, RawBody};

pub fn router() -> Router<Arc<Coordinator>> {
    Router::new()
        .route("/convert", post(convert_inline))
        .route("/convert/*template", post(convert_stored))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertBody {
    template_base64: Option<String>,
    message_base64: Option<String>,
    replacement_table_base64: Option<String>,
    template_map_base64: Option<String>,
}

/// Response shape selected by `api-version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiVersion {
    Full,
    DocumentOnly,
}

impl ApiVersion {
    fn select(query: &HashMap<String, String>, default: u8) -> Result<Self, ApiError> {
        let version = match query.get("api-version") {
            None => default,
            Some(raw) => raw
                .trim()
                .parse::<u8>()
                .map_err(|_| ApiError::bad_request(format!("invalid api-version '{}'", raw)))?,
        };
        match version {
            1 => Ok(ApiVersion::Full),
            2 => Ok(ApiVersion::DocumentOnly),
            other => Err(ApiError::bad_request(format!(
                "unsupported api-version {}",
                other
            ))),
        }
    }
}

async fn convert_inline(
    State(coordinator): State<Arc<Coordinator>>,
    Query(query): Query<HashMap<String, String>>,
    body: RawBody,
) -> Result<Response, ApiError> {
    let body = body?;
    let version = ApiVersion::select(&query, coordinator.config().conversion.default_api_version)?;
    let body: ConvertBody = parse_json_body(&body)?;

    let template = decode_text("templateBase64", required("templateBase64", body.template_base64)?)?;
    let message = decode_text("messageBase64", required("messageBase64", body.message_base64)?)?;

    let mut job = ConversionJob::new(TemplateSource::Inline(template), message);
    if let Some(encoded) = body.replacement_table_base64 {
        let table = decode_json("replacementTableBase64", &encoded)?;
        if !table.is_object() {
            return Err(ApiError::bad_request(
                "replacementTableBase64 must encode a JSON object",
            ));
        }
        job.replacement_table = Some(table);
    }
    if let Some(encoded) = body.template_map_base64 {
        let map: HashMap<String, String> = serde_json::from_value(decode_json(
            "templateMapBase64",
            &encoded,
        )?)
        .map_err(|e| {
            ApiError::bad_request(format!(
                "templateMapBase64 must map names to template text: {}",
                e
            ))
        })?;
        job.template_map = Some(map);
    }

    let result = coordinator.convert(job).await?;
    Ok(respond(result, version))
}

async fn convert_stored(
    State(coordinator): State<Arc<Coordinator>>,
    Path(template): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: RawBody,
) -> Result<Response, ApiError> {
    let body = body?;
    let version = ApiVersion::select(&query, coordinator.config().conversion.default_api_version)?;
    let name = TemplateName::new(template)?;
    let message = utf8_body(body)?;

    let result = coordinator
        .convert(ConversionJob::new(TemplateSource::Stored(name), message))
        .await?;
    Ok(respond(result, version))
}

fn respond(result: ConversionResult, version: ApiVersion) -> Response {
    let status = StatusCode::from_u16(result.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if !result.is_success() {
        return (status, Json(result.payload)).into_response();
    }

    let payload = match version {
        ApiVersion::Full => result.payload,
        ApiVersion::DocumentOnly => match result.payload {
            Value::Object(mut fields) => fields.remove("document").unwrap_or(Value::Null),
            other => other,
        },
    };
    (status, Json(payload)).into_response()
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    value.ok_or_else(|| ApiError::bad_request(format!("missing field: {}", field)))
}

fn decode_text(field: &str, encoded: String) -> Result<String, ApiError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::bad_request(format!("{} is not valid base64: {}", field, e)))?;
    String::from_utf8(bytes)
        .map_err(|_| ApiError::bad_request(format!("{} does not decode to UTF-8 text", field)))
}

fn decode_json(field: &str, encoded: &str) -> Result<Value, ApiError> {
    let text = decode_text(field, encoded.to_string())?;
    serde_json::from_str(&text)
        .map_err(|e| ApiError::bad_request(format!("{} is not valid JSON: {}", field, e)))
}
