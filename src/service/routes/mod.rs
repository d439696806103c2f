//! service::routes
//!
//! Route tables. Each submodule owns a disjoint path prefix.

pub mod convert;
pub mod health;
pub mod messages;
pub mod repo;
pub mod templates;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;

use super::error::ApiError;

/// A buffered request body. Taking the rejection as a value keeps oversize
/// and unreadable bodies inside the error envelope.
pub(crate) type RawBody = Result<Bytes, BytesRejection>;

/// Raw artifact text.
pub(crate) fn text_response(content: &str) -> Response {
    let mut response = content.to_string().into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub(crate) fn utf8_body(body: Bytes) -> Result<String, ApiError> {
    String::from_utf8(body.to_vec()).map_err(|_| ApiError::bad_request("body is not UTF-8 text"))
}

/// Parse a JSON body, reporting malformed input in the error envelope.
pub(crate) fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))
}
