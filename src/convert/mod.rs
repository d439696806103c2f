//! convert
//!
//! Message-to-document conversion as run inside a pool worker.
//!
//! # Architecture
//!
//! Conversion is a pure function of template text, message text and optional
//! side tables. The pool only sees the [`ConversionEngine`] trait; each worker
//! owns one engine created by an [`EngineFactory`], so engines are `Send` but
//! never shared.
//!
//! Includes are resolved through a [`TemplateResolver`] supplied per request,
//! which lets the worker layer decide precedence (job-supplied map first, then
//! the worker's template cache).
//!
//! # Modules
//!
//! - [`hl7`] - Pipe-delimited message parsing
//! - [`template`] - Reference engine: JSON templates with placeholders

pub mod hl7;
pub mod template;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use template::{TemplateEngine, TemplateEngineFactory};

/// Errors reported by an engine.
///
/// Each variant carries the status the worker replies with.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The message could not be parsed.
    #[error("invalid message: {message}")]
    InvalidMessage { message: String },

    /// The template could not be expanded or rendered.
    #[error("template error: {message}")]
    Template { message: String },

    /// A stored template does not exist.
    #[error("template not found: {name}")]
    TemplateNotFound { name: String },

    /// The engine's isolated context is unusable; the worker must be replaced.
    #[error("engine failure: {message}")]
    Fatal { message: String },
}

impl ConversionError {
    /// Status the worker reports for this error.
    pub fn status(&self) -> u16 {
        match self {
            ConversionError::InvalidMessage { .. } | ConversionError::Template { .. } => 400,
            ConversionError::TemplateNotFound { .. } => 404,
            ConversionError::Fatal { .. } => 500,
        }
    }

    /// Stable error code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ConversionError::InvalidMessage { .. } => "InvalidMessage",
            ConversionError::Template { .. } => "TemplateError",
            ConversionError::TemplateNotFound { .. } => "NotFound",
            ConversionError::Fatal { .. } => "EngineFailure",
        }
    }
}

/// Resolves include names to template text.
pub trait TemplateResolver {
    fn resolve(&self, name: &str) -> Option<Arc<str>>;
}

/// Inputs of one conversion.
pub struct ConversionRequest<'a> {
    /// Template text, before include expansion
    pub template: &'a str,
    /// Raw message text
    pub message: &'a str,
    /// Mapping tables for `map:` filters, a JSON object of objects
    pub replacement_table: Option<&'a Value>,
    /// Include lookup
    pub resolver: &'a dyn TemplateResolver,
    /// Maximum include nesting
    pub max_include_depth: usize,
}

/// A successful conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutput {
    /// The rendered document
    pub document: Value,
    /// Segments no placeholder referenced
    pub unused_segments: Vec<String>,
    /// Placeholders that referenced a missing segment
    pub invalid_access: Vec<String>,
}

/// Per-worker conversion engine.
pub trait ConversionEngine: Send {
    /// Convert one message.
    fn convert(&mut self, request: &ConversionRequest<'_>) -> Result<ConversionOutput, ConversionError>;

    /// Drop any state derived from templates.
    fn invalidate(&mut self);
}

/// Creates one engine per worker.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn ConversionEngine>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        let cases = [
            (ConversionError::InvalidMessage { message: "x".into() }, 400, "InvalidMessage"),
            (ConversionError::Template { message: "x".into() }, 400, "TemplateError"),
            (ConversionError::TemplateNotFound { name: "x".into() }, 404, "NotFound"),
            (ConversionError::Fatal { message: "x".into() }, 500, "EngineFailure"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn output_serializes_camel_case() {
        let output = ConversionOutput {
            document: serde_json::json!({"a": 1}),
            unused_segments: vec!["EVN".into()],
            invalid_access: vec![],
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["unusedSegments"][0], "EVN");
        assert!(json["invalidAccess"].as_array().unwrap().is_empty());
    }
}
