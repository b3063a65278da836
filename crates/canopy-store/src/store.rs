//! The filesystem-backed document store.
//!
//! Documents are JSON values stored one-per-file; directories form the
//! implicit hierarchy. Read-path I/O failures collapse to sentinel values
//! (`None` / `false` / `-1` / empty) after being logged, matching the
//! store's ergonomic read contract; validation failures and JSON errors
//! always propagate.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::key::{self, ENTRY_SUFFIX};
use crate::resolver::PathResolver;

/// Maximum attempts for a tree delete before giving up on transient failures.
const DELETE_TREE_ATTEMPTS: usize = 100;

/// Visitor verdict for the iterating read operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    /// Keep iterating.
    Continue,
    /// Stop before the next entry.
    Stop,
}

/// Outcome of a single file read, before sentinel conversion.
///
/// Kept internal so `NotFound` and `Failed` stay distinguishable up to the
/// point where the public API deliberately collapses them.
enum ReadOutcome {
    Found(Vec<u8>),
    NotFound,
    Failed(io::Error),
}

/// Filesystem-backed document store addressed by slash-delimited keys.
///
/// The store knows nothing about indexing except the reserved location the
/// index registry persists itself to: any key resolving to (or into) that
/// location is rejected before I/O.
#[derive(Debug)]
pub struct FileStore {
    resolver: PathResolver,
    reserved_key: String,
    reserved_dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, reserving `reserved_key` for the
    /// index registry. Creates the root and the reserved directory.
    pub fn open(root: impl Into<PathBuf>, reserved_key: &str) -> StoreResult<Self> {
        key::validate(reserved_key)?;
        let resolver = PathResolver::new(root);
        fs::create_dir_all(resolver.root())?;
        let reserved_dir = resolver.dir_path(reserved_key);
        fs::create_dir_all(&reserved_dir)?;

        Ok(Self {
            resolver,
            reserved_key: reserved_key.to_string(),
            reserved_dir,
        })
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    /// The key reserved for the index registry.
    pub fn reserved_key(&self) -> &str {
        &self.reserved_key
    }

    /// Absolute directory the index registry persists itself under.
    pub fn reserved_dir(&self) -> &Path {
        &self.reserved_dir
    }

    /// Validate a key's shape and reject the reserved index key.
    ///
    /// Runs before any I/O on every operation.
    pub fn validate_key(&self, key: &str) -> StoreResult<()> {
        key::validate(key)?;
        if key == self.reserved_key {
            return Err(StoreError::ReservedKey(key.to_string()));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Single-document reads
    // ---------------------------------------------------------------

    /// Read and parse the document at `key`. `None` if the file does not
    /// exist or cannot be read (the failure is logged).
    pub fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read the raw bytes at `key` without parsing.
    pub fn get_raw(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.entry_path_checked(key)?;
        match self.read_entry(&path) {
            ReadOutcome::Found(bytes) => Ok(Some(bytes)),
            ReadOutcome::NotFound => Ok(None),
            ReadOutcome::Failed(err) => {
                warn!(key, error = %err, "read failed; treating as absent");
                Ok(None)
            }
        }
    }

    // ---------------------------------------------------------------
    // Multi-document reads
    // ---------------------------------------------------------------

    /// Parse every file directly under `key` whose stripped name matches
    /// `pattern`, keyed by stripped name.
    pub fn get_matching(&self, key: &str, pattern: &Regex) -> StoreResult<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        self.get_raw_matching(key, pattern)?
            .into_iter()
            .try_for_each(|(name, bytes)| -> StoreResult<()> {
                out.insert(name, serde_json::from_slice(&bytes)?);
                Ok(())
            })?;
        Ok(out)
    }

    /// Raw-bytes variant of [`get_matching`](Self::get_matching).
    pub fn get_raw_matching(
        &self,
        key: &str,
        pattern: &Regex,
    ) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let dir = self.dir_path_checked(key)?;
        let mut out = BTreeMap::new();
        let Some(names) = self.list_names(&dir, Some(pattern), false) else {
            return Ok(out);
        };
        for name in names {
            match self.read_entry(&entry_under(&dir, &name)) {
                ReadOutcome::Found(bytes) => {
                    out.insert(name, bytes);
                }
                ReadOutcome::NotFound => {}
                ReadOutcome::Failed(err) => {
                    warn!(key, name = %name, error = %err, "skipping unreadable entry");
                }
            }
        }
        Ok(out)
    }

    /// Invoke `visitor` for each matching entry directly under `key`, in
    /// sorted name order. Iteration stops early when the visitor returns
    /// [`Visit::Stop`]. An unlistable directory visits nothing.
    pub fn get_each(
        &self,
        key: &str,
        pattern: &Regex,
        mut visitor: impl FnMut(&str, Value) -> Visit,
    ) -> StoreResult<()> {
        let mut parse_err = None;
        self.get_raw_each(key, pattern, |name, bytes| {
            match serde_json::from_slice(&bytes) {
                Ok(doc) => visitor(name, doc),
                Err(err) => {
                    parse_err = Some(err);
                    Visit::Stop
                }
            }
        })?;
        match parse_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Raw-bytes variant of [`get_each`](Self::get_each).
    pub fn get_raw_each(
        &self,
        key: &str,
        pattern: &Regex,
        mut visitor: impl FnMut(&str, Vec<u8>) -> Visit,
    ) -> StoreResult<()> {
        let dir = self.dir_path_checked(key)?;
        let Some(names) = self.list_names(&dir, Some(pattern), false) else {
            return Ok(());
        };
        for name in names {
            let bytes = match self.read_entry(&entry_under(&dir, &name)) {
                ReadOutcome::Found(bytes) => bytes,
                ReadOutcome::NotFound => continue,
                ReadOutcome::Failed(err) => {
                    warn!(key, name = %name, error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if visitor(&name, bytes) == Visit::Stop {
                break;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Serialize `document` and write it at `key`.
    pub fn put(&self, key: &str, document: &Value) -> StoreResult<bool> {
        let bytes = serde_json::to_vec(document)?;
        self.write(key, &bytes)
    }

    /// Write raw bytes at `key`. Returns `Ok(false)` (not an error) when
    /// the write fails; the failure is logged.
    pub fn write(&self, key: &str, bytes: &[u8]) -> StoreResult<bool> {
        let path = self.entry_path_checked(key)?;
        if let Err(err) = self.resolver.ensure_parent(&path) {
            warn!(key, error = %err, "could not create parent directories");
            return Ok(false);
        }
        match fs::write(&path, bytes) {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(key, error = %err, "write failed");
                Ok(false)
            }
        }
    }

    /// Remove the document at `key`. `Ok(false)` if it was absent or the
    /// removal failed. Aggregates derived from the document are not
    /// retracted.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        let path = self.entry_path_checked(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!(key, error = %err, "delete failed");
                Ok(false)
            }
        }
    }

    /// Whether a document exists at `key`.
    pub fn exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.entry_path_checked(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                warn!(key, error = %err, "exists check failed; treating as absent");
                Ok(false)
            }
        }
    }

    // ---------------------------------------------------------------
    // Listing and counting
    // ---------------------------------------------------------------

    /// Stripped names of document files directly under `key`, optionally
    /// filtered. `None` if the directory cannot be listed (logged).
    pub fn list_entries(
        &self,
        key: &str,
        pattern: Option<&Regex>,
    ) -> StoreResult<Option<Vec<String>>> {
        let dir = self.dir_path_checked(key)?;
        Ok(self.list_names(&dir, pattern, false))
    }

    /// Names of directories directly under `key`, optionally filtered.
    pub fn list_dirs(
        &self,
        key: &str,
        pattern: Option<&Regex>,
    ) -> StoreResult<Option<Vec<String>>> {
        let dir = self.dir_path_checked(key)?;
        Ok(self.list_names(&dir, pattern, true))
    }

    /// Count of matching document files directly under `key`; `-1` when
    /// the directory cannot be listed.
    pub fn count_entries(&self, key: &str, pattern: Option<&Regex>) -> StoreResult<i64> {
        let dir = self.dir_path_checked(key)?;
        match self.list_names(&dir, pattern, false) {
            Some(names) => Ok(names.len() as i64),
            None => Ok(-1),
        }
    }

    // ---------------------------------------------------------------
    // Subtree operations
    // ---------------------------------------------------------------

    /// Recursively delete every file under `key` bottom-up, then the
    /// emptied directories. Refuses to touch the reserved index location.
    /// Transient failures retry the whole operation a bounded number of
    /// times; the first failure is reported if retries are exhausted.
    pub fn delete_tree(&self, key: &str) -> StoreResult<()> {
        self.validate_key(key)?;
        let dir = self.resolver.dir_path(key);
        if dir.starts_with(&self.reserved_dir) || self.reserved_dir.starts_with(&dir) {
            return Err(StoreError::ReservedKey(key.to_string()));
        }
        if !dir.exists() {
            return Ok(());
        }

        let mut first_err = None;
        for attempt in 0..DELETE_TREE_ATTEMPTS {
            match delete_tree_once(&dir) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(key, attempt, error = %err, "tree delete attempt failed");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        // The loop ran at least once, so a failure was recorded.
        Err(first_err.expect("delete_tree retried without an error"))
    }

    /// Depth-first traversal of the subtree at `key`, returning the
    /// absolute path of every file whose name matches `pattern`. Order is
    /// traversal order.
    pub fn find_recursive(&self, key: &str, pattern: &Regex) -> StoreResult<Vec<PathBuf>> {
        let dir = self.dir_path_checked(key)?;
        let mut found = Vec::new();
        for entry in WalkDir::new(&dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(key, error = %err, "skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if pattern.is_match(&name) {
                found.push(entry.into_path());
            }
        }
        Ok(found)
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    /// Validated, guarded path of the document file for `key`.
    fn entry_path_checked(&self, key: &str) -> StoreResult<PathBuf> {
        self.validate_key(key)?;
        let path = self.resolver.entry_path(key);
        if path.starts_with(&self.reserved_dir) {
            return Err(StoreError::ReservedKey(key.to_string()));
        }
        Ok(path)
    }

    /// Validated, guarded path of the directory for `key`.
    fn dir_path_checked(&self, key: &str) -> StoreResult<PathBuf> {
        self.validate_key(key)?;
        let dir = self.resolver.dir_path(key);
        if dir.starts_with(&self.reserved_dir) {
            return Err(StoreError::ReservedKey(key.to_string()));
        }
        Ok(dir)
    }

    /// Read one file, keeping `NotFound` and real failures distinct.
    /// Ensures the parent chain exists first, mirroring the resolver
    /// contract that every key access materializes its directory path.
    fn read_entry(&self, path: &Path) -> ReadOutcome {
        if let Err(err) = self.resolver.ensure_parent(path) {
            return ReadOutcome::Failed(err);
        }
        match fs::read(path) {
            Ok(bytes) => ReadOutcome::Found(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => ReadOutcome::NotFound,
            Err(err) => ReadOutcome::Failed(err),
        }
    }

    /// List names under `dir`: stripped document names, or directory names
    /// when `want_dirs`. Sorted for deterministic output. `None` when the
    /// directory cannot be read.
    fn list_names(&self, dir: &Path, pattern: Option<&Regex>, want_dirs: bool) -> Option<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "cannot list directory");
                return None;
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(dir = %dir.display(), error = %err, "cannot list directory");
                    return None;
                }
            };
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir != want_dirs {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let name = if want_dirs {
                file_name.as_ref()
            } else {
                match key::strip_suffix(&file_name) {
                    Some(stripped) => stripped,
                    None => continue,
                }
            };
            if pattern.map_or(true, |re| re.is_match(name)) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Some(names)
    }
}

/// Join a stripped entry name back onto its directory.
fn entry_under(dir: &Path, name: &str) -> PathBuf {
    let mut path = dir.join(name).into_os_string();
    path.push(ENTRY_SUFFIX);
    PathBuf::from(path)
}

/// One bottom-up pass deleting every file, then every emptied directory.
fn delete_tree_once(dir: &Path) -> StoreResult<()> {
    for entry in WalkDir::new(dir).contents_first(true) {
        let entry = entry.map_err(|err| {
            let path = err.path().map(Path::to_path_buf).unwrap_or_default();
            StoreError::TreeDelete {
                path,
                source: err.into(),
            }
        })?;
        let path = entry.path();
        let result = if entry.file_type().is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|err| StoreError::TreeDelete {
            path: path.to_path_buf(),
            source: err,
        })?;
    }
    Ok(())
}
