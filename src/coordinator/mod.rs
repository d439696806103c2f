//! coordinator
//!
//! Keeps caches, the template store and the worker pool consistent.
//!
//! # Architecture
//!
//! The coordinator owns every stateful component and is the only path by
//! which they are mutated. Each mutation applies its cache action and then
//! broadcasts to the workers:
//!
//! | Trigger                     | Cache action            | Broadcast          |
//! |-----------------------------|-------------------------|--------------------|
//! | template write / delete     | single entry            | `templatesUpdated` |
//! | branch checkout             | clear                   | `templatesUpdated` |
//! | reset to base               | clear                   | `templatesUpdated` |
//! | wire-protocol push          | clear                   | `templatesUpdated` |
//! | reconfiguration             | re-point both caches    | `constantsUpdated` |
//!
//! # Consistency
//!
//! Eventual and best-effort. Nothing serializes an in-flight conversion
//! against a concurrent mutation, and a template write racing a checkout may
//! land on either branch.
//!
//! # Configuration
//!
//! The active [`Config`] is an immutable snapshot behind an `Arc`.
//! [`Coordinator::reconfigure`] swaps the snapshot after re-pointing every
//! component; readers holding the old snapshot keep a consistent view.

mod reset;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

pub use reset::{reset_template_dir, ResetReport};

use crate::cache::{CacheError, DirectoryCache, SetOutcome};
use crate::convert::EngineFactory;
use crate::core::config::{Config, ConfigError};
use crate::core::ops::{LockError, StoreLock};
use crate::core::types::{BranchName, Oid, TemplateName};
use crate::git::{Author, BranchInfo, StoreError, TemplateStore};
use crate::pool::{
    ControlMessage, ConversionJob, ConversionResult, Dispatcher, PoolError, PoolOptions,
    PoolStats, WorkerConstants,
};

/// Errors from coordinated operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Resetting the template directory failed part way.
    #[error("reset failed: {message}")]
    Reset { message: String },

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {message}")]
    Task { message: String },
}

/// Optional overrides for a commit; missing values come from `[git]`.
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    pub message: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Owner of all service state.
pub struct Coordinator {
    config: RwLock<Arc<Config>>,
    templates: Arc<DirectoryCache>,
    messages: Arc<DirectoryCache>,
    store: TemplateStore,
    dispatcher: Dispatcher,
    lock: Mutex<Option<StoreLock>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("template_dir", &self.templates.root())
            .field("message_dir", &self.messages.root())
            .field("pool", &self.dispatcher.stats())
            .finish()
    }
}

fn author_of(config: &Config) -> Author {
    Author::new(config.git.author_name.clone(), config.git.author_email.clone())
}

impl Coordinator {
    /// Build every component from `config`.
    ///
    /// Opens (or initializes) the template repository, takes the process lock
    /// on it, and starts the worker pool.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::Config`] if the configuration is invalid
    /// - [`CoordinatorError::Lock`] if another process serves the repository
    /// - [`CoordinatorError::Store`] / [`CoordinatorError::Pool`] on startup failure
    pub fn start(config: Config, factory: Arc<dyn EngineFactory>) -> Result<Self, CoordinatorError> {
        config.validate()?;

        let store = TemplateStore::open_or_init(&config.storage.template_dir, &author_of(&config))?;
        let lock = StoreLock::acquire(&store.paths())?;

        let dispatcher = Dispatcher::start(
            PoolOptions {
                size: config.worker_count(),
                max_restarts: config.pool.max_restarts,
            },
            WorkerConstants::from_config(&config),
            factory,
        )?;

        Ok(Self {
            templates: Arc::new(DirectoryCache::new(config.storage.template_dir.clone())),
            messages: Arc::new(DirectoryCache::new(config.storage.message_dir.clone())),
            config: RwLock::new(Arc::new(config)),
            store,
            dispatcher,
            lock: Mutex::new(Some(lock)),
        })
    }

    /// The active configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read())
    }

    pub fn templates(&self) -> &DirectoryCache {
        &self.templates
    }

    pub fn messages(&self) -> &DirectoryCache {
        &self.messages
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.dispatcher.stats()
    }

    // =========================================================================
    // Templates and messages
    // =========================================================================

    /// Names of all templates.
    pub async fn template_names(&self) -> Result<Vec<TemplateName>, CoordinatorError> {
        list(Arc::clone(&self.templates)).await
    }

    pub async fn read_template(&self, name: TemplateName) -> Result<Arc<str>, CoordinatorError> {
        let cache = Arc::clone(&self.templates);
        blocking(move || cache.get(&name).map_err(CoordinatorError::from)).await
    }

    /// Write a template through the cache and tell the workers.
    pub async fn write_template(
        &self,
        name: TemplateName,
        content: String,
    ) -> Result<SetOutcome, CoordinatorError> {
        let cache = Arc::clone(&self.templates);
        let logged = name.clone();
        let outcome =
            blocking(move || cache.set(&name, &content).map_err(CoordinatorError::from)).await?;

        tracing::info!(template = %logged, ?outcome, "template written");
        self.templates_changed();
        Ok(outcome)
    }

    /// Delete a template and tell the workers.
    pub async fn delete_template(&self, name: TemplateName) -> Result<(), CoordinatorError> {
        let cache = Arc::clone(&self.templates);
        let logged = name.clone();
        blocking(move || cache.remove(&name).map_err(CoordinatorError::from)).await?;

        tracing::info!(template = %logged, "template deleted");
        self.templates_changed();
        Ok(())
    }

    /// Names of all sample messages.
    pub async fn message_names(&self) -> Result<Vec<TemplateName>, CoordinatorError> {
        list(Arc::clone(&self.messages)).await
    }

    pub async fn read_message(&self, name: TemplateName) -> Result<Arc<str>, CoordinatorError> {
        let cache = Arc::clone(&self.messages);
        blocking(move || cache.get(&name).map_err(CoordinatorError::from)).await
    }

    // =========================================================================
    // Version control
    // =========================================================================

    pub async fn status(&self) -> Result<Vec<String>, CoordinatorError> {
        Ok(self.store.status().await?)
    }

    pub async fn branches(&self) -> Result<Vec<BranchInfo>, CoordinatorError> {
        Ok(self.store.branches().await?)
    }

    pub async fn create_branch(
        &self,
        name: BranchName,
        base: Option<BranchName>,
    ) -> Result<BranchInfo, CoordinatorError> {
        let info = self.store.create_branch(name, base).await?;
        tracing::info!(branch = %info.name, base = ?info.base_branch, "branch created");
        Ok(info)
    }

    /// Switch branches, then drop every cached template.
    ///
    /// On failure nothing is invalidated; the working tree is unchanged.
    pub async fn checkout(&self, name: BranchName) -> Result<(), CoordinatorError> {
        let logged = name.clone();
        self.store.checkout_branch(name).await?;

        tracing::info!(branch = %logged, "checked out branch");
        self.templates.clear();
        self.templates_changed();
        Ok(())
    }

    /// Commit all pending changes with `[git]` defaults for missing fields.
    pub async fn commit(&self, request: CommitRequest) -> Result<Oid, CoordinatorError> {
        let config = self.config();
        let message = request
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| config.git.default_commit_message.clone());
        let author = Author::new(
            request.name.unwrap_or_else(|| config.git.author_name.clone()),
            request.email.unwrap_or_else(|| config.git.author_email.clone()),
        );

        let oid = self.store.commit_all_changes(message, author).await?;
        tracing::info!(commit = oid.short(7), "committed template changes");
        Ok(oid)
    }

    /// Replace the template set with the base set, keeping a backup.
    pub async fn reset_to_base(&self) -> Result<ResetReport, CoordinatorError> {
        let config = self.config();
        let template_dir = self.templates.root();
        let base_dir = config.storage.base_template_dir.clone();

        let report = blocking(move || reset_template_dir(&template_dir, &base_dir)).await;
        // Entries may have moved even if the copy failed part way.
        self.templates.clear();
        self.templates_changed();

        let report = report?;
        tracing::info!(
            moved = report.moved,
            copied = report.copied,
            backup = ?report.backup_dir,
            "reset templates to base set"
        );
        Ok(report)
    }

    /// A push over the wire protocol changed the repository behind the cache.
    pub fn external_push_completed(&self) {
        tracing::info!("wire push completed, invalidating templates");
        self.templates.clear();
        self.templates_changed();
    }

    fn templates_changed(&self) {
        let delivered = self.dispatcher.broadcast(ControlMessage::TemplatesUpdated);
        tracing::debug!(delivered, "templates updated");
    }

    // =========================================================================
    // Conversion
    // =========================================================================

    /// Run a conversion on the pool.
    pub async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, PoolError> {
        self.dispatcher.exec(job).await
    }

    // =========================================================================
    // Reconfiguration
    // =========================================================================

    /// Swap in a new configuration.
    ///
    /// Re-binds the store (taking the process lock on the new repository if
    /// it moved), re-points both caches, swaps the snapshot, and broadcasts
    /// the new worker constants. Blocking. On error the previous
    /// configuration stays fully in effect.
    ///
    /// Pool size and bind address are fixed at startup and are not changed.
    pub fn reconfigure(&self, new: Config) -> Result<(), CoordinatorError> {
        new.validate()?;
        let old = self.config();

        if new.storage.template_dir != old.storage.template_dir {
            self.store
                .rebind(&new.storage.template_dir, &author_of(&new))?;
            let lock = match StoreLock::acquire(&self.store.paths()) {
                Ok(lock) => lock,
                Err(e) => {
                    let _ = self
                        .store
                        .rebind(&old.storage.template_dir, &author_of(&old));
                    return Err(e.into());
                }
            };
            *self.lock.lock() = Some(lock);
        }

        self.templates.rebind(new.storage.template_dir.clone());
        self.messages.rebind(new.storage.message_dir.clone());

        let constants = Arc::new(WorkerConstants::from_config(&new));
        *self.config.write() = Arc::new(new);
        let delivered = self
            .dispatcher
            .broadcast(ControlMessage::ConstantsUpdated(constants));

        tracing::info!(delivered, "configuration reloaded");
        Ok(())
    }

    /// Stop the worker pool.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

async fn blocking<T, F>(op: F) -> Result<T, CoordinatorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CoordinatorError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| CoordinatorError::Task {
            message: e.to_string(),
        })?
}

async fn list(cache: Arc<DirectoryCache>) -> Result<Vec<TemplateName>, CoordinatorError> {
    blocking(move || {
        cache
            .keys()
            .iter()
            .collect::<Result<Vec<_>, CacheError>>()
            .map_err(CoordinatorError::from)
    })
    .await
}
