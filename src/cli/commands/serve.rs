//! serve command - Run the conversion service
//!
//! # Lifecycle
//!
//! 1. Load and validate configuration
//! 2. Build the coordinator (repository, lock, caches, worker pool)
//! 3. Serve HTTP until SIGINT/SIGTERM
//! 4. Stop the worker pool
//!
//! SIGHUP reloads configuration through the same lookup used at startup.
//! A reload that fails validation is logged and the running configuration
//! stays in effect.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::{load_config, Context};
use crate::convert::TemplateEngineFactory;
use crate::coordinator::Coordinator;
use crate::core::config::Config;
use crate::service::build_router;

/// Run the service.
pub fn serve(ctx: &Context, bind: Option<&str>) -> Result<()> {
    let (mut config, path) = load_config(ctx)?;
    if let Some(bind) = bind {
        config.server.bind = bind.to_string();
        config.validate().context("Invalid --bind address")?;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve_async(
        config,
        Reload {
            explicit: ctx.config_path.clone(),
            bind: bind.map(str::to_string),
        },
        path,
    ))
}

/// How to re-read configuration on SIGHUP.
#[derive(Debug, Clone)]
struct Reload {
    explicit: Option<PathBuf>,
    bind: Option<String>,
}

impl Reload {
    fn load(&self) -> Result<Config> {
        let mut config = Config::load(self.explicit.as_deref())?.resolved();
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        Ok(config)
    }
}

async fn serve_async(config: Config, reload: Reload, path: Option<PathBuf>) -> Result<()> {
    let addr = config.bind_addr()?;
    if config.server.api_keys.is_empty() {
        tracing::warn!("server.api_keys is empty, authentication is disabled");
    }
    match &path {
        Some(path) => tracing::info!(config = %path.display(), "loaded configuration"),
        None => tracing::info!("no config file found, using defaults"),
    }

    let coordinator = Arc::new(
        Coordinator::start(config, Arc::new(TemplateEngineFactory))
            .context("Failed to start service")?,
    );

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(Arc::clone(&coordinator), reload));
    #[cfg(not(unix))]
    let _ = reload;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, build_router(Arc::clone(&coordinator)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("shutting down");
    tokio::task::spawn_blocking(move || coordinator.shutdown()).await?;
    Ok(())
}

#[cfg(unix)]
async fn reload_on_hangup(coordinator: Arc<Coordinator>, reload: Reload) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(hangups) => hangups,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGHUP, reload disabled");
            return;
        }
    };

    while hangups.recv().await.is_some() {
        tracing::info!("SIGHUP received, reloading configuration");
        let coordinator = Arc::clone(&coordinator);
        let reload = reload.clone();
        let outcome = tokio::task::spawn_blocking(move || -> Result<()> {
            let config = reload.load()?;
            coordinator.reconfigure(config)?;
            Ok(())
        })
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let message = format!("{:#}", e);
                tracing::error!(error = %message, "reload failed, keeping current configuration");
            }
            Err(e) => tracing::error!(error = %e, "reload task failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
