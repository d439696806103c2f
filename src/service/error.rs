//! service::error
//!
//! Mapping of every failure to a status and a stable error envelope.
//!
//! # Envelope
//!
//! ```json
//! {"error": {"code": "NotFound", "message": "template not found: ADT_A01.json"}}
//! ```

use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::cache::CacheError;
use crate::coordinator::CoordinatorError;
use crate::core::types::TypeError;
use crate::git::{StoreError, WireError};
use crate::pool::PoolError;

/// An error ready to be sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "missing or invalid API key",
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NotFound", message)
    }

    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "WriteError", message)
    }

    /// Backing-store failures on a write path: absent stays 404, the rest is 403.
    pub fn from_write(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Cache(CacheError::Io { .. } | CacheError::Walk { .. })
            | CoordinatorError::Reset { .. } => Self::write_failed(err.to_string()),
            other => other.into(),
        }
    }

    /// Listing failures are reported as 404.
    pub fn from_listing(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Cache(_) => Self::not_found(err.to_string()),
            other => other.into(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

impl From<BytesRejection> for ApiError {
    fn from(err: BytesRejection) -> Self {
        let status = err.status();
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "PayloadTooLarge"
        } else {
            "BadRequest"
        };
        Self::new(status, code, err.body_text())
    }
}

impl From<TypeError> for ApiError {
    fn from(err: TypeError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidName", err.to_string())
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        let (status, code) = match err {
            PoolError::WorkerCrashed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "WorkerCrashed"),
            PoolError::Degraded => (StatusCode::SERVICE_UNAVAILABLE, "PoolDegraded"),
            PoolError::ShutDown => (StatusCode::SERVICE_UNAVAILABLE, "ShuttingDown"),
            PoolError::Spawn { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let (status, code) = match err {
            StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NotFound"),
            StoreError::InvalidName { .. } => (StatusCode::BAD_REQUEST, "InvalidName"),
            StoreError::NotARepo { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
            StoreError::Conflict { .. } | StoreError::Io { .. } | StoreError::Internal { .. } => {
                (StatusCode::CONFLICT, "Conflict")
            }
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<WireError> for ApiError {
    fn from(err: WireError) -> Self {
        let (status, code) = match err {
            WireError::UnknownService { .. } => (StatusCode::FORBIDDEN, "UnsupportedService"),
            WireError::Compressed { .. } => (StatusCode::BAD_REQUEST, "BadRequest"),
            WireError::Spawn { .. } | WireError::Failed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "GitFailure")
            }
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Cache(CacheError::NotFound { .. }) => Self::not_found(err.to_string()),
            CoordinatorError::Store(e) => e.into(),
            CoordinatorError::Pool(e) => e.into(),
            CoordinatorError::Reset { .. } => Self::write_failed(err.to_string()),
            CoordinatorError::Cache(_)
            | CoordinatorError::Lock(_)
            | CoordinatorError::Config(_)
            | CoordinatorError::Task { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal",
                err.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn pool_errors_map_to_server_statuses() {
        let crashed = ApiError::from(PoolError::WorkerCrashed { worker: Some(1) });
        assert_eq!(crashed.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(crashed.code, "WorkerCrashed");

        let degraded = ApiError::from(PoolError::Degraded);
        assert_eq!(degraded.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(degraded.code, "PoolDegraded");
    }

    #[test]
    fn store_errors() {
        let missing = ApiError::from(StoreError::NotFound {
            what: "branch 'x'".into(),
        });
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let conflict = ApiError::from(StoreError::Conflict {
            message: "nothing to commit".into(),
        });
        assert_eq!(conflict.status, StatusCode::CONFLICT);
        assert_eq!(conflict.code, "Conflict");
    }

    #[test]
    fn write_path_failures_are_forbidden() {
        let io = CoordinatorError::Cache(CacheError::Io {
            name: "a.json".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        assert_eq!(ApiError::from_write(io).status, StatusCode::FORBIDDEN);

        let missing = CoordinatorError::Cache(CacheError::NotFound {
            name: "a.json".into(),
        });
        assert_eq!(ApiError::from_write(missing).status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn listing_failures_are_not_found() {
        let walk = CoordinatorError::Cache(CacheError::Walk {
            path: PathBuf::from("/absent"),
            message: "no such directory".into(),
        });
        let err = ApiError::from_listing(walk);
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn compressed_wire_body_is_bad_request() {
        let err = ApiError::from(WireError::Compressed {
            encoding: "gzip".into(),
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
