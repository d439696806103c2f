//! cache
//!
//! Read-through/write-through cache over a directory of named text artifacts.
//!
//! # Architecture
//!
//! A [`DirectoryCache`] fronts one backing directory. The directory is always
//! authoritative: reads fill the cache on miss, writes go to disk first and
//! then update the cached entry, so a write is immediately visible to the next
//! read through the same instance. Nothing is ever written back lazily.
//!
//! Entries remember absence as well as content, so repeated lookups of a
//! missing template do not hit the filesystem.
//!
//! Invalidation has exactly two granularities:
//! - per key, as a side effect of [`DirectoryCache::set`] and
//!   [`DirectoryCache::remove`]
//! - everything, via [`DirectoryCache::clear`] or [`DirectoryCache::rebind`]
//!
//! # Concurrency
//!
//! The entry map sits behind a reader-writer lock. File I/O happens outside
//! the lock; a generation counter bumped by `clear`/`rebind` stops a read that
//! started before a clear from re-inserting pre-clear content. Concurrent
//! writes to the same key are last-writer-wins at the storage layer.
//!
//! # Example
//!
//! ```no_run
//! use hl7conv::cache::{DirectoryCache, SetOutcome};
//! use hl7conv::core::types::TemplateName;
//!
//! let cache = DirectoryCache::new("data/templates");
//! let name = TemplateName::new("ADT_A01.json").unwrap();
//!
//! let outcome = cache.set(&name, "{}").unwrap();
//! assert_eq!(outcome, SetOutcome::Created);
//! assert_eq!(&*cache.get(&name).unwrap(), "{}");
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use walkdir::WalkDir;

use crate::core::types::TemplateName;

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No artifact with this name exists in the backing directory.
    #[error("not found: {name}")]
    NotFound {
        /// The missing name
        name: String,
    },

    /// Reading or writing the backing file failed.
    #[error("i/o error on '{name}': {source}")]
    Io {
        /// The artifact being accessed
        name: String,
        source: std::io::Error,
    },

    /// Enumerating the backing directory failed.
    #[error("cannot list '{path}': {message}")]
    Walk {
        /// The directory being listed
        path: PathBuf,
        /// Description of the failure
        message: String,
    },
}

impl CacheError {
    fn io(name: &TemplateName, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            CacheError::NotFound {
                name: name.to_string(),
            }
        } else {
            CacheError::Io {
                name: name.to_string(),
                source,
            }
        }
    }
}

/// Whether a write created a new artifact or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Created,
    Replaced,
}

#[derive(Debug, Clone)]
enum Entry {
    Present(Arc<str>),
    Absent,
}

#[derive(Debug)]
struct State {
    root: PathBuf,
    generation: u64,
    entries: HashMap<TemplateName, Entry>,
}

/// Cache over one backing directory.
#[derive(Debug)]
pub struct DirectoryCache {
    state: RwLock<State>,
}

impl DirectoryCache {
    /// Create a cache bound to `root`.
    ///
    /// The directory does not need to exist yet; lookups simply miss.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            state: RwLock::new(State {
                root: root.into(),
                generation: 0,
                entries: HashMap::new(),
            }),
        }
    }

    /// The directory currently backing this cache.
    pub fn root(&self) -> PathBuf {
        self.state.read().root.clone()
    }

    /// Re-point the cache at another directory, dropping every entry.
    pub fn rebind(&self, root: impl Into<PathBuf>) {
        let mut state = self.state.write();
        state.root = root.into();
        state.generation += 1;
        state.entries.clear();
    }

    /// Drop every cached entry. Backing files are untouched.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.generation += 1;
        state.entries.clear();
    }

    /// Number of names with a cached entry (present or absent).
    pub fn cached_len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Names currently in the backing directory.
    ///
    /// The returned [`Keys`] walks the directory each time it is iterated.
    pub fn keys(&self) -> Keys {
        Keys { root: self.root() }
    }

    /// Read an artifact.
    ///
    /// # Errors
    ///
    /// - [`CacheError::NotFound`] if the artifact does not exist
    /// - [`CacheError::Io`] if it exists but cannot be read
    pub fn get(&self, name: &TemplateName) -> Result<Arc<str>, CacheError> {
        let (root, generation) = {
            let state = self.state.read();
            match state.entries.get(name) {
                Some(Entry::Present(content)) => return Ok(Arc::clone(content)),
                Some(Entry::Absent) => {
                    return Err(CacheError::NotFound {
                        name: name.to_string(),
                    })
                }
                None => (state.root.clone(), state.generation),
            }
        };

        let path = name.to_path(&root);
        let loaded = if path.is_file() {
            fs::read_to_string(&path)
                .map(|s| Entry::Present(Arc::from(s)))
                .or_else(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => Ok(Entry::Absent),
                    _ => Err(CacheError::io(name, e)),
                })?
        } else {
            Entry::Absent
        };

        self.store(name, generation, loaded.clone());

        match loaded {
            Entry::Present(content) => Ok(content),
            Entry::Absent => Err(CacheError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Whether an artifact exists.
    pub fn has(&self, name: &TemplateName) -> bool {
        self.get(name).is_ok()
    }

    /// Write an artifact through to disk and cache the new content.
    ///
    /// Parent directories are created as needed. The file is replaced
    /// atomically so concurrent readers see either the old or the new content.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the file cannot be written.
    pub fn set(&self, name: &TemplateName, content: &str) -> Result<SetOutcome, CacheError> {
        let (root, generation) = {
            let state = self.state.read();
            (state.root.clone(), state.generation)
        };

        let path = name.to_path(&root);
        let outcome = if path.is_file() {
            SetOutcome::Replaced
        } else {
            SetOutcome::Created
        };

        write_atomic(&path, content).map_err(|e| CacheError::Io {
            name: name.to_string(),
            source: e,
        })?;

        self.store(name, generation, Entry::Present(Arc::from(content)));
        Ok(outcome)
    }

    /// Delete an artifact from disk and cache.
    ///
    /// # Errors
    ///
    /// - [`CacheError::NotFound`] if the artifact does not exist
    /// - [`CacheError::Io`] if it cannot be deleted
    pub fn remove(&self, name: &TemplateName) -> Result<(), CacheError> {
        let (root, generation) = {
            let state = self.state.read();
            (state.root.clone(), state.generation)
        };

        let path = name.to_path(&root);
        if !path.is_file() {
            self.store(name, generation, Entry::Absent);
            return Err(CacheError::NotFound {
                name: name.to_string(),
            });
        }

        fs::remove_file(&path).map_err(|e| CacheError::io(name, e))?;
        self.store(name, generation, Entry::Absent);
        Ok(())
    }

    /// Record an entry unless the cache was cleared or rebound since
    /// `generation` was observed.
    fn store(&self, name: &TemplateName, generation: u64, entry: Entry) {
        let mut state = self.state.write();
        if state.generation == generation {
            state.entries.insert(name.clone(), entry);
        }
    }
}

/// Write `content` to `path` via a hidden temp file and rename.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(
        ".{}.tmp-{}",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Restartable listing of a backing directory.
///
/// Each call to [`Keys::iter`] starts a fresh walk, so the sequence always
/// reflects the directory as it is when iteration begins. Hidden entries
/// (including `.git`) are skipped; names come out sorted per directory.
#[derive(Debug, Clone)]
pub struct Keys {
    root: PathBuf,
}

impl Keys {
    /// Start a new walk.
    pub fn iter(&self) -> KeysIter {
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();
        KeysIter {
            root: self.root.clone(),
            walker,
        }
    }
}

impl IntoIterator for Keys {
    type Item = Result<TemplateName, CacheError>;
    type IntoIter = KeysIter;

    fn into_iter(self) -> KeysIter {
        self.iter()
    }
}

impl IntoIterator for &Keys {
    type Item = Result<TemplateName, CacheError>;
    type IntoIter = KeysIter;

    fn into_iter(self) -> KeysIter {
        self.iter()
    }
}

/// Iterator produced by [`Keys`].
pub struct KeysIter {
    root: PathBuf,
    walker: walkdir::IntoIter,
}

impl Iterator for KeysIter {
    type Item = Result<TemplateName, CacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    return Some(Err(CacheError::Walk {
                        path: e.path().unwrap_or(&self.root).to_path_buf(),
                        message: e.to_string(),
                    }))
                }
            };

            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden {
                if entry.file_type().is_dir() {
                    self.walker.skip_current_dir();
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            if let Some(name) = TemplateName::from_relative_path(relative) {
                return Some(Ok(name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn name(s: &str) -> TemplateName {
        TemplateName::new(s).unwrap()
    }

    fn names(cache: &DirectoryCache) -> Vec<String> {
        cache
            .keys()
            .iter()
            .map(|k| k.unwrap().to_string())
            .collect()
    }

    mod read_write {
        use super::*;

        #[test]
        fn set_then_get_roundtrip() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());

            cache.set(&name("a.json"), "{\"a\":1}").unwrap();
            assert_eq!(&*cache.get(&name("a.json")).unwrap(), "{\"a\":1}");
            assert_eq!(
                fs::read_to_string(temp.path().join("a.json")).unwrap(),
                "{\"a\":1}"
            );
        }

        #[test]
        fn set_reports_created_then_replaced() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());

            assert_eq!(cache.set(&name("x.json"), "1").unwrap(), SetOutcome::Created);
            assert_eq!(cache.set(&name("x.json"), "2").unwrap(), SetOutcome::Replaced);
            assert_eq!(&*cache.get(&name("x.json")).unwrap(), "2");
        }

        #[test]
        fn set_creates_parent_directories() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());

            cache.set(&name("partials/deep/P.json"), "p").unwrap();
            assert!(temp.path().join("partials/deep/P.json").is_file());
        }

        #[test]
        fn set_leaves_no_temp_files() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());

            cache.set(&name("a.json"), "a").unwrap();
            let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
            assert_eq!(entries.len(), 1);
        }

        #[test]
        fn get_missing_is_not_found() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());

            let err = cache.get(&name("missing.json")).unwrap_err();
            assert!(matches!(err, CacheError::NotFound { .. }));
            assert!(!cache.has(&name("missing.json")));
        }

        #[test]
        fn remove_then_get_is_not_found() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());

            cache.set(&name("gone.json"), "x").unwrap();
            cache.remove(&name("gone.json")).unwrap();

            assert!(matches!(
                cache.get(&name("gone.json")),
                Err(CacheError::NotFound { .. })
            ));
            assert!(!temp.path().join("gone.json").exists());
        }

        #[test]
        fn remove_missing_is_not_found() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());

            assert!(matches!(
                cache.remove(&name("never.json")),
                Err(CacheError::NotFound { .. })
            ));
        }

        #[test]
        fn directories_are_not_artifacts() {
            let temp = TempDir::new().unwrap();
            fs::create_dir_all(temp.path().join("partials")).unwrap();
            let cache = DirectoryCache::new(temp.path());

            assert!(!cache.has(&name("partials")));
        }
    }

    mod invalidation {
        use super::*;

        #[test]
        fn cached_content_survives_external_edit_until_clear() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());
            cache.set(&name("t.json"), "old").unwrap();

            fs::write(temp.path().join("t.json"), "new").unwrap();
            assert_eq!(&*cache.get(&name("t.json")).unwrap(), "old");

            cache.clear();
            assert_eq!(&*cache.get(&name("t.json")).unwrap(), "new");
        }

        #[test]
        fn negative_entries_are_cleared_too() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());
            assert!(!cache.has(&name("late.json")));

            fs::write(temp.path().join("late.json"), "here").unwrap();
            assert!(!cache.has(&name("late.json")));

            cache.clear();
            assert!(cache.has(&name("late.json")));
        }

        #[test]
        fn clear_empties_entries() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());
            cache.set(&name("a"), "1").unwrap();
            let _ = cache.get(&name("b"));
            assert_eq!(cache.cached_len(), 2);

            cache.clear();
            assert_eq!(cache.cached_len(), 0);
            assert!(temp.path().join("a").exists());
        }

        #[test]
        fn rebind_switches_directory() {
            let first = TempDir::new().unwrap();
            let second = TempDir::new().unwrap();
            fs::write(first.path().join("t.json"), "first").unwrap();
            fs::write(second.path().join("t.json"), "second").unwrap();

            let cache = DirectoryCache::new(first.path());
            assert_eq!(&*cache.get(&name("t.json")).unwrap(), "first");

            cache.rebind(second.path());
            assert_eq!(cache.root(), second.path());
            assert_eq!(&*cache.get(&name("t.json")).unwrap(), "second");
        }
    }

    mod keys {
        use super::*;

        #[test]
        fn lists_nested_files_sorted() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());
            cache.set(&name("b.json"), "").unwrap();
            cache.set(&name("a.json"), "").unwrap();
            cache.set(&name("partials/p.json"), "").unwrap();

            assert_eq!(names(&cache), vec!["a.json", "b.json", "partials/p.json"]);
        }

        #[test]
        fn skips_hidden_entries() {
            let temp = TempDir::new().unwrap();
            fs::create_dir_all(temp.path().join(".git/objects")).unwrap();
            fs::write(temp.path().join(".git/HEAD"), "ref").unwrap();
            fs::write(temp.path().join(".hidden"), "x").unwrap();
            fs::write(temp.path().join("visible.json"), "x").unwrap();

            let cache = DirectoryCache::new(temp.path());
            assert_eq!(names(&cache), vec!["visible.json"]);
        }

        #[test]
        fn restartable_and_reflects_current_state() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path());
            let keys = cache.keys();

            assert_eq!(keys.iter().count(), 0);
            fs::write(temp.path().join("new.json"), "x").unwrap();
            assert_eq!(keys.iter().count(), 1);
            assert_eq!(keys.iter().count(), 1);
        }

        #[test]
        fn missing_root_yields_error() {
            let temp = TempDir::new().unwrap();
            let cache = DirectoryCache::new(temp.path().join("absent"));

            let first = cache.keys().iter().next().expect("an error item");
            assert!(matches!(first, Err(CacheError::Walk { .. })));
        }
    }
}
