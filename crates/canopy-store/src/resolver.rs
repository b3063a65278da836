//! Mapping from logical keys to absolute filesystem locations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::key::ENTRY_SUFFIX;

/// Resolves logical keys to absolute paths under a fixed root.
///
/// Path computation is pure; directory creation is a separate, explicit
/// step so key validation and reserved-location guards can run before any
/// filesystem mutation.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the document file for `key` (`root + key + ".json"`).
    ///
    /// `key` must already be validated (starts with the separator).
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.join(&key[1..]).into_os_string();
        path.push(ENTRY_SUFFIX);
        PathBuf::from(path)
    }

    /// Absolute path of the directory addressed by `key` (`root + key`).
    pub fn dir_path(&self, key: &str) -> PathBuf {
        self.root.join(&key[1..])
    }

    /// Ensure the parent directory chain of `path` exists.
    pub fn ensure_parent(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
