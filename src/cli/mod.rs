//! cli
//!
//! Command-line interface layer for hl7conv.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Initialize logging
//! - Delegate to command handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. It loads configuration, builds the
//! [`Coordinator`](crate::coordinator::Coordinator) for `serve`, and otherwise
//! only reads and writes config files. Errors surface as `anyhow` chains.

pub mod args;
pub mod commands;

pub use args::{Cli, Shell};

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "hl7conv=info,tower_http=info";

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.debug);

    let ctx = commands::Context {
        config_path: cli.config.clone(),
        debug: cli.debug,
    };
    commands::dispatch(cli.command, &ctx)
}

/// Install the global tracing subscriber, writing to stderr.
///
/// `--debug` overrides `RUST_LOG`.
fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("hl7conv=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
