//! config command - Show, check, or create the configuration file

use std::path::Path;

use anyhow::{bail, Context as _, Result};

use super::{load_config, Context};
use crate::core::config::Config;

/// Print the effective configuration.
pub fn show(ctx: &Context) -> Result<()> {
    let (config, _) = load_config(ctx)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
    print!("{}", rendered);
    Ok(())
}

/// Validate the configuration and report its source.
pub fn check(ctx: &Context) -> Result<()> {
    let (config, path) = load_config(ctx)?;

    match path {
        Some(path) => println!("Config OK: {}", path.display()),
        None => println!("Config OK: no config file found, using defaults"),
    }
    println!("  listen:     {}", config.server.bind);
    println!("  templates:  {}", config.storage.template_dir.display());
    println!("  messages:   {}", config.storage.message_dir.display());
    println!("  base set:   {}", config.storage.base_template_dir.display());
    println!("  workers:    {}", config.worker_count());
    if config.server.api_keys.is_empty() {
        println!("  auth:       disabled (server.api_keys is empty)");
    } else {
        println!("  auth:       {} key(s)", config.server.api_keys.len());
    }
    Ok(())
}

/// Write a default config file.
pub fn init(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path().context("Failed to locate home directory")?,
    };

    if path.exists() && !force {
        bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    Config::default()
        .write_atomic(&path)
        .context("Failed to write config")?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
