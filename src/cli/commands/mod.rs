//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Loads configuration through [`load_config`]
//! 2. Does its work
//! 3. Formats and displays output
//!
//! `serve` is the only async command; it owns a tokio runtime for its
//! lifetime.

mod completion;
mod config_cmd;
mod serve;

pub use completion::completion;
pub use config_cmd::{check as config_check, init as config_init, show as config_show};
pub use serve::serve;

use std::path::PathBuf;

use anyhow::{Context as _, Result};

use crate::cli::args::{Command, ConfigAction};
use crate::core::config::Config;

/// Settings shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Explicit `--config` path
    pub config_path: Option<PathBuf>,
    /// Debug logging requested
    pub debug: bool,
}

/// Load configuration with storage paths resolved against its file.
pub(crate) fn load_config(ctx: &Context) -> Result<(Config, Option<PathBuf>)> {
    let loaded = Config::load(ctx.config_path.as_deref()).context("Failed to load config")?;
    let path = loaded.path.clone();
    Ok((loaded.resolved(), path))
}

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Serve { bind } => serve::serve(ctx, bind.as_deref()),
        Command::Config { action } => match action {
            ConfigAction::Show => config_cmd::show(ctx),
            ConfigAction::Check => config_cmd::check(ctx),
            ConfigAction::Init { path, force } => config_cmd::init(path.as_deref(), force),
        },
        Command::Completion { shell } => completion::completion(shell),
    }
}
