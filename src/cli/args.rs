//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>`: Use this config file instead of the default locations
//! - `--debug`: Enable debug logging

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// hl7conv - Template-driven conversion service for pipe-delimited clinical messages
#[derive(Parser, Debug)]
#[command(name = "hl7conv")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to use (default: $HL7CONV_CONFIG, then the standard locations)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the conversion service
    #[command(
        name = "serve",
        long_about = "Run the conversion service.\n\n\
            Opens (or initializes) the template repository, starts the worker pool, \
            and serves the HTTP API and the git endpoint until interrupted. Sending \
            SIGHUP reloads the config file and re-points the running service at it.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Serve with the default config locations
    hl7conv serve

    # Serve a specific config on another port
    hl7conv --config ./hl7conv.toml serve --bind 127.0.0.1:8080

    # Reload configuration without restarting
    kill -HUP <pid>

    # Clone the live template repository
    git clone http://<key>@localhost:2019/repo/templates.git"
    )]
    Serve {
        /// Listen address, overriding server.bind
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Inspect or create the configuration file
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completion scripts
    #[command(
        name = "completion",
        long_about = "Generate shell completion scripts for tab-completion.\n\n\
            Outputs a completion script for the specified shell. Add the output \
            to your shell's configuration to enable tab-completion.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Bash (add to ~/.bashrc)
    hl7conv completion bash >> ~/.bashrc

    # Zsh
    hl7conv completion zsh > ~/.zfunc/_hl7conv

    # Fish
    hl7conv completion fish > ~/.config/fish/completions/hl7conv.fish"
    )]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Validate the configuration and report where it came from
    Check,
    /// Write a default config file
    Init {
        /// Destination (default: ~/.hl7conv/config.toml)
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Supported shells for completion
#[derive(clap::ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}
