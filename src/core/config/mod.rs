//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! The service is driven by a single TOML file. The loaded [`Config`] is an
//! explicit value handed to the coordinator at construction; there is no
//! process-wide mutable configuration. A running service swaps configuration
//! only through `Coordinator::reconfigure`.
//!
//! # Locations
//!
//! Searched in order:
//! 1. An explicit path (`--config`)
//! 2. `$HL7CONV_CONFIG` if set
//! 3. `$XDG_CONFIG_HOME/hl7conv/config.toml`
//! 4. `~/.hl7conv/config.toml` (canonical write location)
//!
//! Missing files are not an error; defaults are used.
//!
//! # Example
//!
//! ```no_run
//! use hl7conv::core::config::Config;
//!
//! let loaded = Config::load(None).unwrap();
//! println!("templates at {}", loaded.config.storage.template_dir.display());
//! ```

pub mod schema;

pub use schema::{Config, ConversionConfig, GitConfig, PoolConfig, ServerConfig, StorageConfig};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "HL7CONV_CONFIG";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("home directory not found")]
    NoHomeDir,
}

/// Result of loading configuration.
#[derive(Debug, Clone)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// The file it came from, if any.
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from an explicit path or the default locations.
    ///
    /// An explicit path must exist. Default locations are optional.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read, parsed,
    /// or validated.
    pub fn load(explicit: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            let config = Self::read_file(path)?;
            return Ok(ConfigLoadResult {
                config,
                path: Some(path.to_path_buf()),
            });
        }

        for path in Self::search_paths() {
            if path.exists() {
                let config = Self::read_file(&path)?;
                return Ok(ConfigLoadResult {
                    config,
                    path: Some(path),
                });
            }
        }

        Ok(ConfigLoadResult {
            config: Config::default(),
            path: None,
        })
    }

    /// Candidate config locations, in precedence order.
    fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            paths.push(PathBuf::from(path));
        }
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg_home).join("hl7conv/config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".hl7conv/config.toml"));
        }
        paths
    }

    /// Read, parse and validate a config file.
    pub fn read_file(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the canonical path for the user config.
    ///
    /// Returns `~/.hl7conv/config.toml`.
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".hl7conv/config.toml"))
    }

    /// Write config atomically.
    ///
    /// Creates parent directories if needed. Writes to a temp file in the
    /// same directory, then renames over the target.
    pub fn write_atomic(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let temp_path = path.with_extension("toml.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        file.write_all(contents.as_bytes())
            .map_err(|e| ConfigError::WriteError {
                path: temp_path.clone(),
                source: e,
            })?;

        file.sync_all().map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        fs::rename(&temp_path, path).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    /// Resolve relative storage paths against `base`.
    ///
    /// Used so a config file's relative paths mean "relative to the file",
    /// not to the process working directory.
    pub fn resolve_relative_to(mut self, base: &Path) -> Self {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        fix(&mut self.storage.template_dir);
        fix(&mut self.storage.message_dir);
        fix(&mut self.storage.base_template_dir);
        self
    }
}

impl ConfigLoadResult {
    /// The configuration with storage paths resolved against the directory
    /// of the file it was loaded from.
    pub fn resolved(self) -> Config {
        match self.path.as_deref().and_then(Path::parent) {
            Some(dir) => self.config.resolve_relative_to(dir),
            None => self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_path_loads() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [server]
            bind = "127.0.0.1:9000"
            api_keys = ["secret"]

            [pool]
            workers = 2
            "#,
        )
        .unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.server.bind, "127.0.0.1:9000");
        assert_eq!(loaded.config.server.api_keys, vec!["secret".to_string()]);
        assert_eq!(loaded.config.pool.workers, 2);
        // Untouched sections keep their defaults
        assert_eq!(loaded.config.git.repo_name, "templates.git");
    }

    #[test]
    fn explicit_missing_path_is_error() {
        let temp = TempDir::new().unwrap();
        let result = Config::load(Some(&temp.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn unknown_fields_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[server]\nunknown_field = true\n").unwrap();

        let result = Config::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn invalid_values_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[conversion]\nmax_include_depth = 0\n").unwrap();

        let result = Config::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn write_then_read_atomic() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.toml");

        let mut config = Config::default();
        config.git.repo_name = "mappings.git".to_string();
        config.write_atomic(&path).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("toml.tmp").exists());
        let loaded = Config::read_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[storage]\ntemplate_dir = \"tpl\"\nmessage_dir = \"/abs/messages\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap().resolved();
        assert_eq!(config.storage.template_dir, temp.path().join("tpl"));
        assert_eq!(config.storage.message_dir, PathBuf::from("/abs/messages"));
    }
}
