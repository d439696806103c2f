//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Layout
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:2019"
//! api_keys = ["change-me"]
//! max_body_bytes = 67108864
//!
//! [storage]
//! template_dir = "data/templates"
//! message_dir = "data/sample-messages"
//! base_template_dir = "data/base-templates"
//!
//! [pool]
//! workers = 0
//! max_restarts = 16
//!
//! [git]
//! repo_name = "templates.git"
//! author_name = "hl7conv"
//! author_email = "hl7conv@localhost"
//!
//! [conversion]
//! default_api_version = 2
//! max_include_depth = 16
//! default_replacement_table = "replacements.json"
//! ```
//!
//! # Validation
//!
//! Values are validated after parsing so a bad file is rejected before any
//! component is re-pointed at it.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::TemplateName;

/// HTTP listener and authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,

    /// Accepted API keys; empty disables authentication
    pub api_keys: Vec<String>,

    /// Request body cap for the structured API, in bytes; 0 means unlimited.
    /// Git wire requests are never capped.
    pub max_body_bytes: usize,
}

/// 64 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:2019".to_string(),
            api_keys: Vec::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Backing directories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Template directory; also the working tree of the template repository
    pub template_dir: PathBuf,

    /// Read-only sample messages
    pub message_dir: PathBuf,

    /// Pristine template set used by reset-base
    pub base_template_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("data/templates"),
            message_dir: PathBuf::from("data/sample-messages"),
            base_template_dir: PathBuf::from("data/base-templates"),
        }
    }
}

/// Worker pool sizing and supervision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of workers; 0 uses the available parallelism
    pub workers: usize,

    /// Worker restarts allowed over the pool's lifetime before it is degraded
    pub max_restarts: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_restarts: 16,
        }
    }
}

/// Template repository settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    /// Repository name served over the wire protocol
    pub repo_name: String,

    /// Default commit author name
    pub author_name: String,

    /// Default commit author email
    pub author_email: String,

    /// Commit message used when a commit request carries none
    pub default_commit_message: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            repo_name: "templates.git".to_string(),
            author_name: "hl7conv".to_string(),
            author_email: "hl7conv@localhost".to_string(),
            default_commit_message: "Update templates".to_string(),
        }
    }
}

/// Conversion defaults shared with the workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionConfig {
    /// Response shape when a request carries no `api-version`
    pub default_api_version: u8,

    /// Maximum nesting of `{{> include}}` directives
    pub max_include_depth: usize,

    /// Template-directory artifact used when a job has no replacement table
    pub default_replacement_table: Option<String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            default_api_version: 2,
            max_include_depth: 16,
            default_replacement_table: Some("replacements.json".to_string()),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub pool: PoolConfig,
    pub git: GitConfig,
    pub conversion: ConversionConfig,
}

impl Config {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue(format!("server.bind: {}", e)))?;

        if self.server.api_keys.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::InvalidValue(
                "server.api_keys cannot contain empty keys".to_string(),
            ));
        }

        for (field, path) in [
            ("storage.template_dir", &self.storage.template_dir),
            ("storage.message_dir", &self.storage.message_dir),
            ("storage.base_template_dir", &self.storage.base_template_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue(format!("{} cannot be empty", field)));
            }
        }

        let repo = self.git.repo_name.trim_end_matches(".git");
        if repo.is_empty()
            || !repo
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ConfigError::InvalidValue(format!(
                "git.repo_name '{}' must be a single path segment",
                self.git.repo_name
            )));
        }
        if self.git.author_name.trim().is_empty() || self.git.author_email.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "git.author_name and git.author_email cannot be empty".to_string(),
            ));
        }

        if !matches!(self.conversion.default_api_version, 1 | 2) {
            return Err(ConfigError::InvalidValue(format!(
                "conversion.default_api_version must be 1 or 2, got {}",
                self.conversion.default_api_version
            )));
        }
        if self.conversion.max_include_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "conversion.max_include_depth must be at least 1".to_string(),
            ));
        }
        if let Some(table) = &self.conversion.default_replacement_table {
            TemplateName::new(table.as_str()).map_err(|e| {
                ConfigError::InvalidValue(format!("conversion.default_replacement_table: {}", e))
            })?;
        }

        Ok(())
    }

    /// Number of workers the pool should run.
    pub fn worker_count(&self) -> usize {
        if self.pool.workers > 0 {
            return self.pool.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Parsed listen address.
    ///
    /// Only meaningful after [`Config::validate`] succeeded.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("server.bind: {}", e)))
    }
}
