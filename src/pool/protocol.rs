//! pool::protocol
//!
//! Messages exchanged between the dispatcher and its workers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use super::PoolError;
use crate::convert::ConversionOutput;
use crate::core::config::Config;
use crate::core::types::TemplateName;

/// Where a job's template comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Template text supplied with the job
    Inline(String),
    /// A template in the worker's template directory
    Stored(TemplateName),
}

/// One unit of conversion work.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub template: TemplateSource,
    pub message: String,
    /// Replaces the default replacement table when present
    pub replacement_table: Option<Value>,
    /// Include overrides, consulted before the template directory
    pub template_map: Option<HashMap<String, String>>,
}

impl ConversionJob {
    /// A job with no side tables.
    pub fn new(template: TemplateSource, message: impl Into<String>) -> Self {
        Self {
            template,
            message: message.into(),
            replacement_table: None,
            template_map: None,
        }
    }
}

/// A worker's reply: an HTTP-style status and a JSON payload.
///
/// The status is owned by the worker and passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    pub status: u16,
    pub payload: Value,
}

impl ConversionResult {
    pub(crate) fn success(output: &ConversionOutput) -> Self {
        match serde_json::to_value(output) {
            Ok(payload) => Self {
                status: 200,
                payload,
            },
            Err(e) => Self::failure(500, "EvaluationFault", &e.to_string()),
        }
    }

    pub(crate) fn failure(status: u16, code: &str, message: &str) -> Self {
        Self {
            status,
            payload: json!({ "error": { "code": code, "message": message } }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Configuration every worker holds a copy of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConstants {
    pub template_dir: PathBuf,
    pub max_include_depth: usize,
    pub default_replacement_table: Option<TemplateName>,
}

impl WorkerConstants {
    /// Extract the worker-relevant part of a configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            template_dir: config.storage.template_dir.clone(),
            max_include_depth: config.conversion.max_include_depth,
            default_replacement_table: config
                .conversion
                .default_replacement_table
                .as_deref()
                .and_then(|name| TemplateName::new(name).ok()),
        }
    }
}

/// Control message broadcast to every live worker.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// New configuration; workers re-point their caches
    ConstantsUpdated(Arc<WorkerConstants>),
    /// Template content changed; workers drop cached templates
    TemplatesUpdated,
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::ConstantsUpdated(_) => "constantsUpdated",
            ControlMessage::TemplatesUpdated => "templatesUpdated",
        }
    }
}

/// A queued job and the channel its result goes back on.
pub(crate) struct Envelope {
    pub job: ConversionJob,
    pub reply: oneshot::Sender<Result<ConversionResult, PoolError>>,
}

/// Notifications from worker threads to the supervisor.
#[derive(Debug)]
pub(crate) enum SupervisorEvent {
    WorkerExited { id: usize, crashed: bool },
    Shutdown,
}
