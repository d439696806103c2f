//! service::auth
//!
//! API-key authentication middleware.
//!
//! A key is accepted from, in order:
//! - the `x-api-key` header
//! - the `code` query parameter
//! - the password of HTTP Basic credentials (git clients send these)
//!
//! Keys are read from the active configuration on every request, so a reload
//! takes effect immediately. An empty key list disables authentication.
//! `/health` is always public.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

use super::error::ApiError;
use crate::coordinator::Coordinator;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Default, Deserialize)]
struct KeyQuery {
    code: Option<String>,
}

/// Reject requests that carry no accepted key.
pub async fn require_api_key(
    State(coordinator): State<Arc<Coordinator>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = coordinator.config();
    let keys = &config.server.api_keys;
    if keys.is_empty() || request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let accepted = presented_keys(&request)
        .iter()
        .any(|candidate| keys.iter().any(|key| key == candidate));
    if accepted {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "rejected unauthenticated request");
    let mut response = ApiError::unauthorized().into_response();
    if request.uri().path().starts_with("/repo/") {
        // Prompts git clients for credentials.
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"hl7conv\""),
        );
    }
    response
}

fn presented_keys(request: &Request<Body>) -> Vec<String> {
    let headers = request.headers();
    let mut keys = Vec::new();

    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        keys.push(key.to_string());
    }
    if let Ok(Query(query)) = Query::<KeyQuery>::try_from_uri(request.uri()) {
        keys.extend(query.code);
    }
    keys.extend(basic_password(headers));
    keys
}

/// Password part of `Authorization: Basic ...`.
fn basic_password(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (_user, password) = credentials.split_once(':')?;
    Some(password.to_string())
}
