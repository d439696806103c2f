//! core::paths
//!
//! Centralized path routing for service-owned storage locations.
//!
//! # Storage Layout
//!
//! Service data that must not appear as templates lives under the template
//! repository's git directory, or next to the template directory:
//! - `<git_dir>/hl7conv/lock` - Exclusive process lock
//! - `<template_dir>.bak-<stamp>-<id>/` - Entries moved aside by reset-base
//!
//! No code outside this module should compute these paths.
//!
//! # Example
//!
//! ```
//! use hl7conv::core::paths::StorePaths;
//! use std::path::PathBuf;
//!
//! let paths = StorePaths::new(PathBuf::from("/srv/templates/.git"));
//! assert_eq!(paths.lock_path(), PathBuf::from("/srv/templates/.git/hl7conv/lock"));
//! ```

use std::path::{Path, PathBuf};

use chrono::Utc;

/// Paths derived from the template repository's git directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    /// The repository's `.git` directory.
    pub git_dir: PathBuf,
}

impl StorePaths {
    /// Create paths rooted at a git directory.
    pub fn new(git_dir: PathBuf) -> Self {
        Self { git_dir }
    }

    /// Directory holding service-private state inside the git directory.
    pub fn service_dir(&self) -> PathBuf {
        self.git_dir.join("hl7conv")
    }

    /// Exclusive process lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.service_dir().join("lock")
    }
}

/// Fresh sibling directory that receives entries moved aside by a reset.
///
/// The name combines a UTC timestamp with a short random suffix so two resets
/// within the same second never collide. Being a sibling keeps the move a
/// rename on the same filesystem.
pub fn backup_dir_for(template_dir: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let id = uuid::Uuid::new_v4().simple().to_string();
    let file_name = template_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "templates".to_string());
    let backup = format!("{}.bak-{}-{}", file_name, stamp, &id[..8]);
    match template_dir.parent() {
        Some(parent) => parent.join(backup),
        None => PathBuf::from(backup),
    }
}
