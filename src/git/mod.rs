//! git
//!
//! Version-controlled template store.
//!
//! # Architecture
//!
//! The template directory is the working tree of one git repository. This
//! module is the only code that knows that:
//! - `interface` wraps `git2` for status, branch and commit operations
//! - `store` exposes those operations asynchronously and supports rebinding
//! - [`wire`] pipes the smart-HTTP protocol through the `git` executable
//!
//! No other module imports `git2` or spawns `git`.
//!
//! # Invariants
//!
//! - No-op commits are never created
//! - Branch creation never switches branches
//! - The store never invalidates caches; its callers do
//!
//! # Example
//!
//! ```ignore
//! use hl7conv::git::{Author, TemplateStore};
//! use hl7conv::core::types::BranchName;
//! use std::path::Path;
//!
//! let store = TemplateStore::open_or_init(Path::new("data/templates"), &Author::new("ops", "ops@example.org"))?;
//! store.create_branch(BranchName::new("lab-results")?, None).await?;
//! ```

mod interface;
mod store;
pub mod wire;

pub use interface::{Author, BranchInfo, Git, StoreError, INITIAL_BRANCH, INITIAL_COMMIT_MESSAGE};
pub use store::TemplateStore;
pub use wire::{WireError, WireService};
