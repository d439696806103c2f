//! service
//!
//! HTTP binding of the coordinator.
//!
//! # Architecture
//!
//! Two independent routers on disjoint prefixes, merged only here:
//!
//! - the structured API (`/health`, `/templates`, `/messages`, `/convert`)
//! - the git wire protocol (`/repo/{name}/...`)
//!
//! Both share the authentication layer and request tracing. API bodies are
//! capped by `server.max_body_bytes` (read once, here); wire bodies are not
//! capped, since a push carries a whole pack. Handlers never
//! touch caches, the store or the pool directly; every call goes through the
//! [`Coordinator`].
//!
//! # Modules
//!
//! - [`error`] - Error envelope and status mapping
//! - [`auth`] - API-key middleware
//! - [`routes`] - Route tables and handlers

pub mod auth;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Uri;
use axum::middleware;
use axum::Router;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

use crate::coordinator::Coordinator;

/// Build the complete router.
pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    let api = Router::new()
        .merge(routes::health::router())
        .merge(routes::templates::router())
        .merge(routes::messages::router())
        .merge(routes::convert::router())
        .layer(body_limit(coordinator.config().server.max_body_bytes));

    let wire = routes::repo::router().layer(DefaultBodyLimit::disable());

    Router::new()
        .merge(api)
        .merge(wire)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&coordinator),
            auth::require_api_key,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

fn body_limit(max_bytes: usize) -> DefaultBodyLimit {
    match max_bytes {
        0 => DefaultBodyLimit::disable(),
        n => DefaultBodyLimit::max(n),
    }
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("no route for {}", uri.path()))
}
