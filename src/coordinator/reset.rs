//! coordinator::reset
//!
//! Replace the template directory's contents with the pristine base set.
//!
//! Existing entries are renamed into a fresh sibling backup directory, so the
//! cost is one rename per top-level entry regardless of tree size. Hidden
//! entries (the repository's `.git` in particular) are left in place and are
//! never copied from the base set.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::CoordinatorError;
use crate::core::paths::backup_dir_for;

/// What a reset did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetReport {
    /// Where the previous entries went; `None` if there were none
    pub backup_dir: Option<PathBuf>,
    /// Top-level entries moved aside
    pub moved: usize,
    /// Files copied from the base set
    pub copied: usize,
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn reset_error(action: &str, path: &Path, err: impl std::fmt::Display) -> CoordinatorError {
    CoordinatorError::Reset {
        message: format!("cannot {} {}: {}", action, path.display(), err),
    }
}

/// Move `template_dir`'s visible entries aside and copy `base_dir` in.
pub fn reset_template_dir(template_dir: &Path, base_dir: &Path) -> Result<ResetReport, CoordinatorError> {
    if !base_dir.is_dir() {
        return Err(CoordinatorError::Reset {
            message: format!("base template directory {} does not exist", base_dir.display()),
        });
    }
    fs::create_dir_all(template_dir).map_err(|e| reset_error("create", template_dir, e))?;

    let backup = backup_dir_for(template_dir);
    let mut moved = 0;
    let entries = fs::read_dir(template_dir).map_err(|e| reset_error("read", template_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| reset_error("read", template_dir, e))?;
        let name = entry.file_name();
        if is_hidden(&name) {
            continue;
        }
        if moved == 0 {
            fs::create_dir_all(&backup).map_err(|e| reset_error("create", &backup, e))?;
        }
        let target = backup.join(&name);
        fs::rename(entry.path(), &target).map_err(|e| reset_error("move", &entry.path(), e))?;
        moved += 1;
    }

    let mut copied = 0;
    let walker = WalkDir::new(base_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e.file_name()));
    for entry in walker {
        let entry = entry.map_err(|e| reset_error("read", base_dir, e))?;
        let relative = match entry.path().strip_prefix(base_dir) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let dest = template_dir.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| reset_error("create", &dest, e))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| reset_error("create", parent, e))?;
            }
            fs::copy(entry.path(), &dest).map_err(|e| reset_error("copy", entry.path(), e))?;
            copied += 1;
        }
    }

    Ok(ResetReport {
        backup_dir: (moved > 0).then_some(backup),
        moved,
        copied,
    })
}
