//! git::interface
//!
//! Synchronous git2 doorway for the template repository.
//!
//! # Architecture
//!
//! The `Git` struct is the only place that touches `git2`. It wraps exactly one
//! non-bare repository whose working tree is the template directory. Every
//! method is blocking; [`super::TemplateStore`] moves calls onto the blocking
//! thread pool and reopens the repository per operation, so a `Git` value never
//! outlives a single request.
//!
//! # Error Handling
//!
//! git2 failures are folded into [`StoreError`]:
//! - [`StoreError::NotFound`]: unknown branch or ref
//! - [`StoreError::Conflict`]: duplicate branch, unknown base, clean tree on
//!   commit, repository locked by a concurrent operation
//! - [`StoreError::Internal`]: everything else
//!
//! # Example
//!
//! ```ignore
//! use hl7conv::git::{Author, Git};
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("data/templates"))?;
//! for path in git.status()? {
//!     println!("changed: {path}");
//! }
//! let oid = git.commit_all_changes("Update ADT mapping", &Author::new("ops", "ops@example.org"))?;
//! println!("committed {}", oid.short(7));
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::core::types::{BranchName, Oid, TypeError};

/// Initial branch of freshly initialized template repositories.
pub const INITIAL_BRANCH: &str = "main";

/// Commit message used when adopting an existing directory.
pub const INITIAL_COMMIT_MESSAGE: &str = "Initial template set";

/// Errors from template store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path exists but is not a usable repository.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was opened
        path: PathBuf,
    },

    /// Requested branch or ref does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up
        what: String,
    },

    /// The operation conflicts with repository state.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict
        message: String,
    },

    /// A branch name failed validation.
    #[error("invalid name: {message}")]
    InvalidName {
        /// Description of the problem
        message: String,
    },

    /// Filesystem error around the repository.
    #[error("repository i/o error: {message}")]
    Io {
        /// Description of the error
        message: String,
    },

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl StoreError {
    /// Create a StoreError from a git2::Error with context.
    pub(crate) fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => StoreError::NotFound {
                what: context.to_string(),
            },
            git2::ErrorCode::Exists => StoreError::Conflict {
                message: format!("{} already exists", context),
            },
            git2::ErrorCode::Locked => StoreError::Conflict {
                message: format!("repository is locked: {}", err.message()),
            },
            git2::ErrorCode::UnbornBranch => StoreError::Conflict {
                message: "repository has no commits yet".to_string(),
            },
            git2::ErrorCode::Conflict | git2::ErrorCode::Modified => StoreError::Conflict {
                message: format!("{}: {}", context, err.message()),
            },
            _ => StoreError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }

    fn internal(err: git2::Error) -> Self {
        StoreError::Internal {
            message: err.message().to_string(),
        }
    }
}

impl From<TypeError> for StoreError {
    fn from(err: TypeError) -> Self {
        StoreError::InvalidName {
            message: err.to_string(),
        }
    }
}

/// Commit identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Descriptor of one local branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    /// Branch name
    pub name: BranchName,
    /// The branch it was created from, if recorded
    pub base_branch: Option<BranchName>,
    /// Commit the branch points to
    pub head: Option<Oid>,
    /// Whether HEAD points at this branch
    pub current: bool,
}

/// The template repository.
pub struct Git {
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .finish()
    }
}

impl Git {
    // =========================================================================
    // Opening
    // =========================================================================

    /// Open the repository whose working tree is exactly `path`.
    ///
    /// Unlike discovery, parent directories are not searched: a template
    /// directory nested in some other checkout must not bind to it.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotARepo`] if `path` is not a non-bare repository
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let repo = git2::Repository::open(path).map_err(|_| StoreError::NotARepo {
            path: path.to_path_buf(),
        })?;

        if repo.is_bare() {
            return Err(StoreError::NotARepo {
                path: path.to_path_buf(),
            });
        }

        Ok(Self { repo })
    }

    /// Open `path`, initializing a repository there if needed.
    ///
    /// A fresh repository starts on [`INITIAL_BRANCH`]; files already in the
    /// directory are committed as [`INITIAL_COMMIT_MESSAGE`]. Returns whether
    /// initialization happened.
    pub fn open_or_init(path: &Path, author: &Author) -> Result<(Self, bool), StoreError> {
        if let Ok(git) = Self::open(path) {
            return Ok((git, false));
        }

        std::fs::create_dir_all(path).map_err(|e| StoreError::Io {
            message: format!("cannot create {}: {}", path.display(), e),
        })?;

        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head(INITIAL_BRANCH).mkpath(true);
        let repo = git2::Repository::init_opts(path, &opts)
            .map_err(|e| StoreError::from_git2(e, &path.display().to_string()))?;
        let git = Self { repo };

        if !git.status()?.is_empty() {
            git.commit_all_changes(INITIAL_COMMIT_MESSAGE, author)?;
        }

        Ok((git, true))
    }

    /// The `.git` directory.
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// The working tree (the template directory).
    pub fn work_dir(&self) -> Result<&Path, StoreError> {
        self.repo.workdir().ok_or_else(|| StoreError::NotARepo {
            path: self.repo.path().to_path_buf(),
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Paths changed since the last commit, sorted.
    ///
    /// Includes modified, added, deleted and untracked files (untracked
    /// directories are expanded). Ignored files are excluded.
    pub fn status(&self) -> Result<Vec<String>, StoreError> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .include_unmodified(false);

        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .map_err(StoreError::internal)?;

        let mut paths: Vec<String> = statuses
            .iter()
            .filter(|entry| {
                let status = entry.status();
                !status.is_empty() && !status.is_ignored()
            })
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect();

        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    /// Current branch, or `None` when HEAD is detached.
    ///
    /// An unborn HEAD still names its branch.
    pub fn current_branch(&self) -> Result<Option<BranchName>, StoreError> {
        match self.repo.head() {
            Ok(head) if head.is_branch() => match head.shorthand() {
                Some(name) => Ok(Some(BranchName::new(name)?)),
                None => Ok(None),
            },
            Ok(_) => Ok(None),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                let head = self
                    .repo
                    .find_reference("HEAD")
                    .map_err(StoreError::internal)?;
                let target = head
                    .symbolic_target()
                    .and_then(|t| t.strip_prefix("refs/heads/"))
                    .map(BranchName::new)
                    .transpose()?;
                Ok(target)
            }
            Err(e) => Err(StoreError::from_git2(e, "HEAD")),
        }
    }

    /// Every local branch, sorted by name.
    pub fn branches(&self) -> Result<Vec<BranchInfo>, StoreError> {
        let current = self.current_branch()?;
        let branches = self
            .repo
            .branches(Some(git2::BranchType::Local))
            .map_err(StoreError::internal)?;

        let mut infos = Vec::new();
        for branch in branches {
            let (branch, _) = branch.map_err(StoreError::internal)?;
            let name = match branch.name().ok().flatten().map(BranchName::new) {
                Some(Ok(name)) => name,
                // Skip refs that are not valid branch names
                _ => continue,
            };
            let head = branch
                .get()
                .target()
                .and_then(|oid| Oid::new(oid.to_string()).ok());
            infos.push(BranchInfo {
                base_branch: self.base_branch(&name),
                current: current.as_ref() == Some(&name),
                head,
                name,
            });
        }

        infos.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(infos)
    }

    fn base_branch(&self, name: &BranchName) -> Option<BranchName> {
        let config = self.repo.config().ok()?;
        let value = config.get_string(&base_key(name)).ok()?;
        BranchName::new(value).ok()
    }

    fn find_branch(&self, name: &BranchName) -> Result<git2::Branch<'_>, StoreError> {
        self.repo
            .find_branch(name.as_str(), git2::BranchType::Local)
            .map_err(|e| StoreError::from_git2(e, &format!("branch '{}'", name)))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create `name` without switching to it.
    ///
    /// The new branch starts at `base` (or at HEAD when `base` is `None`) and
    /// records its base in `branch.<name>.templatebase`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] if `name` exists, `base` is unknown, or the
    ///   repository has no commits yet
    pub fn create_branch(
        &self,
        name: &BranchName,
        base: Option<&BranchName>,
    ) -> Result<BranchInfo, StoreError> {
        if self.find_branch(name).is_ok() {
            return Err(StoreError::Conflict {
                message: format!("branch '{}' already exists", name),
            });
        }

        let (commit, base_name) = match base {
            Some(base) => {
                let branch = self.find_branch(base).map_err(|_| StoreError::Conflict {
                    message: format!("base branch '{}' does not exist", base),
                })?;
                let commit = branch
                    .get()
                    .peel_to_commit()
                    .map_err(|e| StoreError::from_git2(e, base.as_str()))?;
                (commit, Some(base.clone()))
            }
            None => {
                let head = self.repo.head().map_err(|e| match e.code() {
                    git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound => {
                        StoreError::Conflict {
                            message: "repository has no commits yet".to_string(),
                        }
                    }
                    _ => StoreError::from_git2(e, "HEAD"),
                })?;
                let commit = head
                    .peel_to_commit()
                    .map_err(|e| StoreError::from_git2(e, "HEAD"))?;
                (commit, self.current_branch()?)
            }
        };

        self.repo
            .branch(name.as_str(), &commit, false)
            .map_err(|e| StoreError::from_git2(e, &format!("branch '{}'", name)))?;

        if let Some(base_name) = &base_name {
            let mut config = self.repo.config().map_err(StoreError::internal)?;
            config
                .set_str(&base_key(name), base_name.as_str())
                .map_err(StoreError::internal)?;
        }

        Ok(BranchInfo {
            name: name.clone(),
            base_branch: base_name,
            head: Oid::new(commit.id().to_string()).ok(),
            current: false,
        })
    }

    /// Force the working tree to `name`'s committed state and point HEAD at it.
    ///
    /// Tracked modifications are discarded. Untracked files are left alone.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the branch does not exist
    /// - [`StoreError::Conflict`] if the repository is locked
    pub fn checkout_branch(&self, name: &BranchName) -> Result<(), StoreError> {
        let branch = self.find_branch(name)?;
        let refname = branch
            .get()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| name.refname());
        let commit = branch
            .get()
            .peel_to_commit()
            .map_err(|e| StoreError::from_git2(e, &refname))?;

        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force();
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut checkout))
            .map_err(|e| StoreError::from_git2(e, &refname))?;
        self.repo
            .set_head(&refname)
            .map_err(|e| StoreError::from_git2(e, &refname))?;

        Ok(())
    }

    /// Stage every working-tree change (deletions included) and commit it.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] if there is nothing to commit; no commit is
    ///   created
    pub fn commit_all_changes(&self, message: &str, author: &Author) -> Result<Oid, StoreError> {
        if self.status()?.is_empty() {
            return Err(StoreError::Conflict {
                message: "nothing to commit, working tree clean".to_string(),
            });
        }

        let mut index = self
            .repo
            .index()
            .map_err(|e| StoreError::from_git2(e, "index"))?;
        index
            .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
            .map_err(|e| StoreError::from_git2(e, "index"))?;
        index
            .update_all(["*"], None)
            .map_err(|e| StoreError::from_git2(e, "index"))?;
        index
            .write()
            .map_err(|e| StoreError::from_git2(e, "index"))?;
        let tree_oid = index
            .write_tree()
            .map_err(|e| StoreError::from_git2(e, "index"))?;
        let tree = self
            .repo
            .find_tree(tree_oid)
            .map_err(StoreError::internal)?;

        let signature =
            git2::Signature::now(&author.name, &author.email).map_err(StoreError::internal)?;

        let parent = match self.repo.head() {
            Ok(head) => Some(
                head.peel_to_commit()
                    .map_err(|e| StoreError::from_git2(e, "HEAD"))?,
            ),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
            Err(e) => return Err(StoreError::from_git2(e, "HEAD")),
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .map_err(|e| StoreError::from_git2(e, "HEAD"))?;

        Ok(Oid::new(oid.to_string())?)
    }
}

fn base_key(name: &BranchName) -> String {
    format!("branch.{}.templatebase", name)
}
