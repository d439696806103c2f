//! git::store
//!
//! Async facade over the template repository.
//!
//! # Architecture
//!
//! `TemplateStore` holds only the repository location. Each operation clones
//! that location, moves onto tokio's blocking pool, reopens the repository and
//! runs one [`Git`] call. Nothing is cached between operations, so a
//! [`TemplateStore::rebind`] takes effect for the next call and a push that
//! arrived over the wire protocol is always seen.
//!
//! The store does not touch any cache. Callers that change the working tree
//! (checkout) are responsible for invalidation.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::interface::{Author, BranchInfo, Git, StoreError};
use crate::core::paths::StorePaths;
use crate::core::types::{BranchName, Oid};

#[derive(Debug, Clone)]
struct Location {
    work_dir: PathBuf,
    git_dir: PathBuf,
}

/// Version-controlled template store.
#[derive(Debug)]
pub struct TemplateStore {
    location: RwLock<Location>,
}

impl TemplateStore {
    /// Open the repository at `path`, initializing it if necessary.
    ///
    /// Blocking; meant for startup and reconfiguration.
    pub fn open_or_init(path: &Path, author: &Author) -> Result<Self, StoreError> {
        let location = Self::locate(path, author)?;
        Ok(Self {
            location: RwLock::new(location),
        })
    }

    fn locate(path: &Path, author: &Author) -> Result<Location, StoreError> {
        let (git, initialized) = Git::open_or_init(path, author)?;
        let location = Location {
            work_dir: git.work_dir()?.to_path_buf(),
            git_dir: git.git_dir().to_path_buf(),
        };
        if initialized {
            tracing::info!(path = %location.work_dir.display(), "initialized template repository");
        }
        Ok(location)
    }

    /// Re-point the store at another repository.
    ///
    /// The new location is opened (or initialized) before the swap, so a
    /// failure leaves the store bound to its previous repository.
    pub fn rebind(&self, path: &Path, author: &Author) -> Result<(), StoreError> {
        let location = Self::locate(path, author)?;
        *self.location.write() = location;
        Ok(())
    }

    /// The working tree (template directory).
    pub fn work_dir(&self) -> PathBuf {
        self.location.read().work_dir.clone()
    }

    /// The repository's `.git` directory.
    pub fn git_dir(&self) -> PathBuf {
        self.location.read().git_dir.clone()
    }

    /// Service-owned paths inside the repository.
    pub fn paths(&self) -> StorePaths {
        StorePaths::new(self.git_dir())
    }

    /// Changed paths since the last commit, sorted.
    pub async fn status(&self) -> Result<Vec<String>, StoreError> {
        self.run(|git| git.status()).await
    }

    /// All local branches.
    pub async fn branches(&self) -> Result<Vec<BranchInfo>, StoreError> {
        self.run(|git| git.branches()).await
    }

    /// Create a branch without switching to it.
    pub async fn create_branch(
        &self,
        name: BranchName,
        base: Option<BranchName>,
    ) -> Result<BranchInfo, StoreError> {
        self.run(move |git| git.create_branch(&name, base.as_ref()))
            .await
    }

    /// Force-switch the working tree to a branch.
    pub async fn checkout_branch(&self, name: BranchName) -> Result<(), StoreError> {
        self.run(move |git| git.checkout_branch(&name)).await
    }

    /// Commit every pending change.
    pub async fn commit_all_changes(
        &self,
        message: String,
        author: Author,
    ) -> Result<Oid, StoreError> {
        self.run(move |git| git.commit_all_changes(&message, &author))
            .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Git) -> Result<T, StoreError> + Send + 'static,
    {
        let work_dir = self.work_dir();
        tokio::task::spawn_blocking(move || {
            let git = Git::open(&work_dir)?;
            op(&git)
        })
        .await
        .map_err(|e| StoreError::Internal {
            message: format!("store task failed: {}", e),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn author() -> Author {
        Author::new("Test", "test@example.org")
    }

    #[tokio::test]
    async fn operations_run_against_repository() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.json"), "{}").unwrap();
        let store = TemplateStore::open_or_init(temp.path(), &author()).unwrap();

        assert!(store.status().await.unwrap().is_empty());
        fs::write(temp.path().join("b.json"), "{}").unwrap();
        assert_eq!(store.status().await.unwrap(), vec!["b.json"]);

        store
            .commit_all_changes("Add b".into(), author())
            .await
            .unwrap();
        assert!(store.status().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rebind_switches_repository() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(first.path().join("a.json"), "{}").unwrap();
        let store = TemplateStore::open_or_init(first.path(), &author()).unwrap();

        store.rebind(second.path(), &author()).unwrap();
        assert!(second.path().join(".git").is_dir());
        assert!(store.branches().await.unwrap().is_empty());
        assert_eq!(store.paths().lock_path(), store.git_dir().join("hl7conv/lock"));
    }

    #[tokio::test]
    async fn failed_rebind_keeps_previous_location() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.json"), "{}").unwrap();
        let store = TemplateStore::open_or_init(temp.path(), &author()).unwrap();

        let blocker = temp.path().join("a.json").join("nested");
        assert!(store.rebind(&blocker, &author()).is_err());
        assert_eq!(
            store.work_dir().canonicalize().unwrap(),
            temp.path().canonicalize().unwrap()
        );
    }
}
