//! The database facade: document operations plus the indexing engine.
//!
//! Every write is first routed through the index engine: each registered
//! definition whose filter matches the key contributes a partial object
//! (via its transform handler) that is deep-merged into the aggregate at
//! the definition's target key, and the aggregate is written back through
//! [`Database::set`] itself. That reentrancy is intentional -- an index's
//! target can itself be indexed -- but cycles are cut by an in-flight key
//! set: a write that loops back into a key already being processed raises
//! [`IndexError::ReentrantWrite`] instead of recursing unboundedly.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use canopy_index::{
    Filter, HandlerRegistry, IndexError, Registry, Transform, DEFAULT_INDEX_KEY,
    REGISTRY_FILE_NAME,
};
use canopy_merge::deep_merge;
use canopy_store::{FileStore, StoreError, Visit};

use crate::error::DbResult;

/// Options for opening a database.
///
/// Transform handlers must be registered here, before open: the registry
/// snapshot is resolved against them at load time and an unknown
/// identifier fails the open.
pub struct DatabaseOptions {
    index_key: String,
    handlers: HandlerRegistry,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            index_key: DEFAULT_INDEX_KEY.to_string(),
            handlers: HandlerRegistry::new(),
        }
    }
}

impl DatabaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the reserved key the registry persists itself under.
    pub fn index_key(mut self, key: impl Into<String>) -> Self {
        self.index_key = key.into();
        self
    }

    /// Register a transform handler under an identifier.
    pub fn handler(mut self, id: impl Into<String>, handler: Arc<dyn Transform>) -> Self {
        self.handlers.register(id, handler);
        self
    }

    /// Register a closure as a transform handler.
    pub fn handler_fn<F>(mut self, id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.handlers.register_fn(id, f);
        self
    }
}

/// A hierarchical, filesystem-backed JSON document store with incremental
/// secondary indexing.
///
/// One database owns one store root, one registry, and one engine for its
/// lifetime. All operations are synchronous and blocking; there is no
/// cross-process coordination, and the aggregate read-merge-write cycle is
/// not atomic with respect to concurrent writers.
pub struct Database {
    store: FileStore,
    handlers: HandlerRegistry,
    registry: Mutex<Registry>,
    in_flight: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("root", &self.store.root())
            .field("index_key", &self.store.reserved_key())
            .finish()
    }
}

impl Database {
    /// Open (or create) a database rooted at `root` with default options.
    pub fn open(root: impl Into<PathBuf>) -> DbResult<Self> {
        Self::open_with(root, DatabaseOptions::default())
    }

    /// Open (or create) a database with explicit options.
    ///
    /// Creates the root and reserved index directory if absent, then loads
    /// the registry snapshot, resolving every persisted transform
    /// identifier against the registered handlers.
    pub fn open_with(root: impl Into<PathBuf>, options: DatabaseOptions) -> DbResult<Self> {
        let store = FileStore::open(root, &options.index_key)?;
        let registry_path = store.reserved_dir().join(REGISTRY_FILE_NAME);
        let registry = Registry::load(registry_path, &options.handlers)?;

        Ok(Self {
            store,
            handlers: options.handlers,
            registry: Mutex::new(registry),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// The reserved index key.
    pub fn index_key(&self) -> &str {
        self.store.reserved_key()
    }

    // ---------------------------------------------------------------
    // Document reads (delegated to the store)
    // ---------------------------------------------------------------

    /// Read and parse the document at `key`; `None` if absent.
    pub fn get(&self, key: &str) -> DbResult<Option<Value>> {
        Ok(self.store.get(key)?)
    }

    /// Read the raw bytes at `key` without parsing.
    pub fn get_raw(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        Ok(self.store.get_raw(key)?)
    }

    /// Parse every file directly under `key` whose stripped name matches.
    pub fn get_matching(&self, key: &str, pattern: &Regex) -> DbResult<BTreeMap<String, Value>> {
        Ok(self.store.get_matching(key, pattern)?)
    }

    /// Raw-bytes variant of [`get_matching`](Self::get_matching).
    pub fn get_raw_matching(
        &self,
        key: &str,
        pattern: &Regex,
    ) -> DbResult<BTreeMap<String, Vec<u8>>> {
        Ok(self.store.get_raw_matching(key, pattern)?)
    }

    /// Visit matching entries under `key` until the visitor stops.
    pub fn get_each(
        &self,
        key: &str,
        pattern: &Regex,
        visitor: impl FnMut(&str, Value) -> Visit,
    ) -> DbResult<()> {
        Ok(self.store.get_each(key, pattern, visitor)?)
    }

    /// Raw-bytes variant of [`get_each`](Self::get_each).
    pub fn get_raw_each(
        &self,
        key: &str,
        pattern: &Regex,
        visitor: impl FnMut(&str, Vec<u8>) -> Visit,
    ) -> DbResult<()> {
        Ok(self.store.get_raw_each(key, pattern, visitor)?)
    }

    /// Whether a document exists at `key`.
    pub fn exists(&self, key: &str) -> DbResult<bool> {
        Ok(self.store.exists(key)?)
    }

    /// Stripped names of document files directly under `key`.
    pub fn list_entries(&self, key: &str, pattern: Option<&Regex>) -> DbResult<Option<Vec<String>>> {
        Ok(self.store.list_entries(key, pattern)?)
    }

    /// Names of directories directly under `key`.
    pub fn list_dirs(&self, key: &str, pattern: Option<&Regex>) -> DbResult<Option<Vec<String>>> {
        Ok(self.store.list_dirs(key, pattern)?)
    }

    /// Count of matching document files directly under `key`; `-1` when
    /// the directory cannot be listed.
    pub fn count_entries(&self, key: &str, pattern: Option<&Regex>) -> DbResult<i64> {
        Ok(self.store.count_entries(key, pattern)?)
    }

    /// Absolute paths of every file under `key` whose name matches.
    pub fn find_recursive(&self, key: &str, pattern: &Regex) -> DbResult<Vec<PathBuf>> {
        Ok(self.store.find_recursive(key, pattern)?)
    }

    // ---------------------------------------------------------------
    // Document writes
    // ---------------------------------------------------------------

    /// Write `document` at `key`, feeding the index engine first.
    ///
    /// Returns `Ok(false)` (not an error) when the final file write fails;
    /// index aggregates may already reflect the attempted write at that
    /// point, as in the read-merge-write model this store inherits. The
    /// reindex ledger likewise records the key before the final write, so
    /// a failed write leaves a ledger entry; [`reindex`](Self::reindex)
    /// drops it once the document is confirmed absent.
    pub fn set(&self, key: &str, document: &Value) -> DbResult<bool> {
        self.store.validate_key(key)?;
        let bytes = serde_json::to_vec(document).map_err(StoreError::from)?;
        self.set_parsed(key, document, &bytes)
    }

    /// Write pre-serialized bytes at `key`. The bytes must parse as JSON
    /// so the index engine can evaluate them.
    pub fn set_raw(&self, key: &str, bytes: &[u8]) -> DbResult<bool> {
        self.store.validate_key(key)?;
        let document: Value = serde_json::from_slice(bytes).map_err(StoreError::from)?;
        self.set_parsed(key, &document, bytes)
    }

    fn set_parsed(&self, key: &str, document: &Value, bytes: &[u8]) -> DbResult<bool> {
        let _guard = InFlightGuard::enter(self, key)?;
        self.run_index_pass(key, document, None)?;
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .mark_processed(key);
        Ok(self.store.write(key, bytes)?)
    }

    /// Remove the document at `key`. Aggregates derived from it are not
    /// retracted.
    pub fn delete(&self, key: &str) -> DbResult<bool> {
        Ok(self.store.delete(key)?)
    }

    /// Recursively delete the subtree at `key`; refuses the reserved
    /// index location.
    pub fn delete_tree(&self, key: &str) -> DbResult<()> {
        Ok(self.store.delete_tree(key)?)
    }

    // ---------------------------------------------------------------
    // Index registry surface
    // ---------------------------------------------------------------

    /// Names of all registered index definitions, in registration order.
    pub fn index_list(&self) -> Vec<String> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .list()
    }

    /// Register (or replace) an index definition. The transform identifier
    /// must already have a registered handler; the registry snapshot is
    /// persisted before this returns.
    pub fn index_add(
        &self,
        name: &str,
        filter: Filter,
        target_key: &str,
        transform: &str,
    ) -> DbResult<()> {
        self.store.validate_key(target_key)?;
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .add(name, filter, target_key, transform, &self.handlers)?;
        Ok(())
    }

    /// Remove an index definition. Aggregates it produced stay on disk.
    pub fn index_remove(&self, name: &str) -> DbResult<bool> {
        Ok(self
            .registry
            .lock()
            .expect("registry mutex poisoned")
            .remove(name)?)
    }

    /// When the engine last processed `key`, if ever.
    pub fn indexed_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .processed_at(key)
    }

    /// Re-run the engine over every document in the processed ledger,
    /// against one definition (`Some(name)`) or all of them.
    ///
    /// Recovers aggregates after a definition is added once data already
    /// exists, or after aggregate corruption. Ledger entries whose
    /// documents no longer exist are dropped. Returns the number of
    /// documents reprocessed.
    pub fn reindex(&self, name: Option<&str>) -> DbResult<usize> {
        if let Some(name) = name {
            let registry = self.registry.lock().expect("registry mutex poisoned");
            if registry.get(name).is_none() {
                return Err(IndexError::DefinitionNotFound(name.to_string()).into());
            }
        }

        let keys = self
            .registry
            .lock()
            .expect("registry mutex poisoned")
            .processed_keys();

        let mut processed = 0;
        for key in keys {
            let Some(document) = self.get(&key)? else {
                debug!(key = %key, "document gone; dropping ledger entry");
                self.registry
                    .lock()
                    .expect("registry mutex poisoned")
                    .clear_processed(&key);
                continue;
            };
            {
                let _guard = InFlightGuard::enter(self, &key)?;
                self.run_index_pass(&key, &document, name)?;
            }
            self.registry
                .lock()
                .expect("registry mutex poisoned")
                .mark_processed(&key);
            processed += 1;
        }

        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .persist()?;
        debug!(processed, "reindex complete");
        Ok(processed)
    }

    // ---------------------------------------------------------------
    // The engine
    // ---------------------------------------------------------------

    /// Evaluate definitions against a written key and merge each matching
    /// contribution into its aggregate, writing the aggregate back through
    /// [`set`](Self::set) (reentrant by design).
    fn run_index_pass(&self, key: &str, document: &Value, only: Option<&str>) -> DbResult<()> {
        // Snapshot the matching definitions so no registry lock is held
        // across the reentrant writes below.
        let matched: Vec<(String, String, String)> = {
            let registry = self.registry.lock().expect("registry mutex poisoned");
            registry
                .definitions_in_order()
                .filter(|def| only.map_or(true, |name| def.name == name))
                .filter(|def| def.filter.matches(key))
                .map(|def| {
                    (
                        def.name.clone(),
                        def.target_key.clone(),
                        def.transform.clone(),
                    )
                })
                .collect()
        };

        for (name, target_key, transform) in matched {
            let handler = self
                .handlers
                .resolve(&transform)
                .ok_or_else(|| IndexError::UnknownTransform(transform.clone()))?;

            let mut aggregate = self
                .get(&target_key)?
                .unwrap_or_else(|| Value::Object(Default::default()));
            let Some(partial) = handler.apply(key, document) else {
                debug!(index = %name, key, "transform contributed nothing");
                continue;
            };

            deep_merge(&partial, &mut aggregate);
            debug!(index = %name, key, target = %target_key, "writing aggregate");
            self.set(&target_key, &aggregate)?;
        }
        Ok(())
    }
}

/// Membership of a key in the in-flight set for the duration of its write.
///
/// Entering twice for the same key means a definition chain has cycled
/// back into a key still being processed.
struct InFlightGuard<'a> {
    db: &'a Database,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    fn enter(db: &'a Database, key: &str) -> Result<Self, IndexError> {
        let mut in_flight = db.in_flight.lock().expect("in-flight mutex poisoned");
        if !in_flight.insert(key.to_string()) {
            return Err(IndexError::ReentrantWrite(key.to_string()));
        }
        Ok(Self {
            db,
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.db.in_flight.lock() {
            in_flight.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use serde_json::json;

    fn make_db() -> (tempfile::TempDir, Database) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        (dir, db)
    }

    fn tagging_options() -> DatabaseOptions {
        DatabaseOptions::new().handler_fn("tags", |_key, _doc| Some(json!({"tags": ["t1"]})))
    }

    #[test]
    fn end_to_end_scenario() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(dir.path(), tagging_options()).unwrap();

        assert!(db.set("/a/b", &json!({"x": 1})).unwrap());
        assert_eq!(db.get("/a/b").unwrap(), Some(json!({"x": 1})));

        assert!(db.delete("/a/b").unwrap());
        assert_eq!(db.get("/a/b").unwrap(), None);

        db.index_add("n1", Filter::Exact("/a/c".into()), "/idx", "tags")
            .unwrap();
        db.set("/a/c", &json!({})).unwrap();
        assert_eq!(db.get("/idx").unwrap(), Some(json!({"tags": ["t1"]})));

        // A second matching write must not duplicate the tag.
        db.set("/a/c", &json!({})).unwrap();
        assert_eq!(db.get("/idx").unwrap(), Some(json!({"tags": ["t1"]})));
    }

    #[test]
    fn unmatched_writes_leave_no_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(dir.path(), tagging_options()).unwrap();
        db.index_add("n1", Filter::Exact("/a/c".into()), "/idx", "tags")
            .unwrap();

        db.set("/a/other", &json!({"x": 1})).unwrap();
        assert_eq!(db.get("/idx").unwrap(), None);
    }

    #[test]
    fn pattern_filter_feeds_many_keys() {
        let dir = tempfile::tempdir().unwrap();
        let options = DatabaseOptions::new().handler_fn("players", |key, doc| {
            let player = key.rsplit('/').next()?;
            let score = doc.get("score")?;
            Some(json!({ "players": [player], "scores": { player: score } }))
        });
        let db = Database::open_with(dir.path(), options).unwrap();
        db.index_add(
            "scores",
            Filter::Pattern(Regex::new("^/games/").unwrap()),
            "/leaderboard",
            "players",
        )
        .unwrap();

        db.set("/games/alice", &json!({"score": 10})).unwrap();
        db.set("/games/bob", &json!({"score": 7})).unwrap();
        db.set("/games/alice", &json!({"score": 12})).unwrap();

        assert_eq!(
            db.get("/leaderboard").unwrap(),
            Some(json!({
                "players": ["alice", "bob"],
                "scores": {"alice": 12, "bob": 7}
            }))
        );
    }

    #[test]
    fn transform_returning_none_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let options = DatabaseOptions::new()
            .handler_fn("picky", |_key, doc| doc.get("wanted").map(|v| json!({"v": v})));
        let db = Database::open_with(dir.path(), options).unwrap();
        db.index_add("n1", Filter::Exact("/a".into()), "/idx", "picky")
            .unwrap();

        db.set("/a", &json!({"ignored": true})).unwrap();
        assert_eq!(db.get("/idx").unwrap(), None);

        db.set("/a", &json!({"wanted": 3})).unwrap();
        assert_eq!(db.get("/idx").unwrap(), Some(json!({"v": 3})));
    }

    #[test]
    fn reentrancy_guard_detects_self_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(dir.path(), tagging_options()).unwrap();
        // The definition's filter matches its own target key.
        db.index_add("loop", Filter::Pattern(Regex::new("^/idx").unwrap()), "/idx", "tags")
            .unwrap();

        let err = db.set("/idx", &json!({})).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Index(IndexError::ReentrantWrite(key)) if key == "/idx"
        ));
    }

    #[test]
    fn chained_indexes_are_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let options = DatabaseOptions::new()
            .handler_fn("tags", |_key, _doc| Some(json!({"tags": ["t1"]})))
            .handler_fn("seen", |key, _doc| Some(json!({"seen": [key]})));
        let db = Database::open_with(dir.path(), options).unwrap();

        db.index_add("first", Filter::Exact("/a/c".into()), "/idx1", "tags")
            .unwrap();
        db.index_add("second", Filter::Exact("/idx1".into()), "/idx2", "seen")
            .unwrap();

        db.set("/a/c", &json!({})).unwrap();
        assert_eq!(db.get("/idx1").unwrap(), Some(json!({"tags": ["t1"]})));
        assert_eq!(db.get("/idx2").unwrap(), Some(json!({"seen": ["/idx1"]})));
    }

    #[test]
    fn definitions_apply_in_registration_order() {
        let dir = tempfile::tempdir().unwrap();
        let options = DatabaseOptions::new()
            .handler_fn("a", |_k, _d| Some(json!({"last": "a", "order": ["a"]})))
            .handler_fn("b", |_k, _d| Some(json!({"last": "b", "order": ["b"]})));
        let db = Database::open_with(dir.path(), options).unwrap();

        db.index_add("first", Filter::Exact("/doc".into()), "/idx", "a")
            .unwrap();
        db.index_add("second", Filter::Exact("/doc".into()), "/idx", "b")
            .unwrap();

        db.set("/doc", &json!({})).unwrap();
        assert_eq!(
            db.get("/idx").unwrap(),
            Some(json!({"last": "b", "order": ["a", "b"]}))
        );
    }

    #[test]
    fn registry_survives_reopen_with_handlers() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open_with(dir.path(), tagging_options()).unwrap();
            db.index_add("n1", Filter::Exact("/a/c".into()), "/idx", "tags")
                .unwrap();
        }

        let db = Database::open_with(dir.path(), tagging_options()).unwrap();
        assert_eq!(db.index_list(), vec!["n1"]);
        db.set("/a/c", &json!({})).unwrap();
        assert_eq!(db.get("/idx").unwrap(), Some(json!({"tags": ["t1"]})));
    }

    #[test]
    fn reopen_without_handler_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open_with(dir.path(), tagging_options()).unwrap();
            db.index_add("n1", Filter::Exact("/a/c".into()), "/idx", "tags")
                .unwrap();
        }

        let err = Database::open(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Index(IndexError::UnknownTransform(id)) if id == "tags"
        ));
    }

    #[test]
    fn index_add_requires_registered_handler() {
        let (_dir, db) = make_db();
        let err = db
            .index_add("n1", Filter::Exact("/a".into()), "/idx", "missing")
            .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Index(IndexError::UnknownTransform(_))
        ));
    }

    #[test]
    fn index_add_rejects_reserved_target() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(dir.path(), tagging_options()).unwrap();
        let err = db
            .index_add("n1", Filter::Exact("/a".into()), "/.dbindex", "tags")
            .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Store(StoreError::ReservedKey(_))
        ));
    }

    #[test]
    fn index_remove_leaves_aggregate_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(dir.path(), tagging_options()).unwrap();
        db.index_add("n1", Filter::Exact("/a/c".into()), "/idx", "tags")
            .unwrap();
        db.set("/a/c", &json!({})).unwrap();

        assert!(db.index_remove("n1").unwrap());
        assert!(!db.index_remove("n1").unwrap());
        assert!(db.index_list().is_empty());
        // Stale aggregate data is a documented limitation, not cleaned up.
        assert_eq!(db.get("/idx").unwrap(), Some(json!({"tags": ["t1"]})));

        // Removed definition no longer feeds writes.
        db.delete("/idx").unwrap();
        db.set("/a/c", &json!({})).unwrap();
        assert_eq!(db.get("/idx").unwrap(), None);
    }

    #[test]
    fn delete_does_not_retract_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(dir.path(), tagging_options()).unwrap();
        db.index_add("n1", Filter::Exact("/a/c".into()), "/idx", "tags")
            .unwrap();
        db.set("/a/c", &json!({})).unwrap();

        db.delete("/a/c").unwrap();
        assert_eq!(db.get("/idx").unwrap(), Some(json!({"tags": ["t1"]})));
    }

    #[test]
    fn set_raw_feeds_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let options = DatabaseOptions::new()
            .handler_fn("copy", |_key, doc| Some(json!({"latest": doc})));
        let db = Database::open_with(dir.path(), options).unwrap();
        db.index_add("n1", Filter::Exact("/a".into()), "/idx", "copy")
            .unwrap();

        assert!(db.set_raw("/a", br#"{"x": 5}"#).unwrap());
        assert_eq!(db.get("/idx").unwrap(), Some(json!({"latest": {"x": 5}})));
        assert_eq!(db.get_raw("/a").unwrap().unwrap(), br#"{"x": 5}"#);
    }

    #[test]
    fn set_raw_rejects_invalid_json() {
        let (_dir, db) = make_db();
        assert!(matches!(
            db.set_raw("/a", b"not json"),
            Err(DatabaseError::Store(StoreError::Json(_)))
        ));
        assert!(!db.exists("/a").unwrap());
    }

    #[test]
    fn set_records_ledger_entry() {
        let (_dir, db) = make_db();
        assert!(db.indexed_at("/a/b").is_none());
        db.set("/a/b", &json!({"x": 1})).unwrap();
        assert!(db.indexed_at("/a/b").is_some());
    }

    #[test]
    fn failed_write_still_lands_in_ledger() {
        let (_dir, db) = make_db();
        // A directory squatting on the entry path makes the write fail.
        std::fs::create_dir_all(db.root().join("a/b.json")).unwrap();

        assert!(!db.set("/a/b", &json!({"x": 1})).unwrap());
        assert!(db.indexed_at("/a/b").is_some());

        // Reindex confirms the document is absent and drops the entry.
        db.reindex(None).unwrap();
        assert!(db.indexed_at("/a/b").is_none());
    }

    #[test]
    fn traversal_key_cannot_delete_registry_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(dir.path(), tagging_options()).unwrap();
        db.index_add("n1", Filter::Exact("/a/c".into()), "/idx", "tags")
            .unwrap();

        let snapshot = dir.path().join(".dbindex").join("indexes");
        assert!(snapshot.is_file());
        assert!(matches!(
            db.delete_tree("/a/../.dbindex"),
            Err(DatabaseError::Store(StoreError::InvalidKey { .. }))
        ));
        assert!(matches!(
            db.set("/a/../.dbindex/x", &json!({})),
            Err(DatabaseError::Store(StoreError::InvalidKey { .. }))
        ));
        assert!(snapshot.is_file());
    }

    #[test]
    fn reindex_builds_aggregates_for_late_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(dir.path(), tagging_options()).unwrap();

        // Data exists before any definition does.
        db.set("/a/c", &json!({})).unwrap();
        db.set("/a/d", &json!({})).unwrap();
        db.index_add("n1", Filter::Exact("/a/c".into()), "/idx", "tags")
            .unwrap();
        assert_eq!(db.get("/idx").unwrap(), None);

        let processed = db.reindex(None).unwrap();
        assert!(processed >= 2);
        assert_eq!(db.get("/idx").unwrap(), Some(json!({"tags": ["t1"]})));
    }

    #[test]
    fn reindex_single_definition() {
        let dir = tempfile::tempdir().unwrap();
        let options = DatabaseOptions::new()
            .handler_fn("tags", |_k, _d| Some(json!({"tags": ["t1"]})))
            .handler_fn("other", |_k, _d| Some(json!({"other": true})));
        let db = Database::open_with(dir.path(), options).unwrap();

        db.set("/a/c", &json!({})).unwrap();
        db.index_add("n1", Filter::Exact("/a/c".into()), "/idx1", "tags")
            .unwrap();
        db.index_add("n2", Filter::Exact("/a/c".into()), "/idx2", "other")
            .unwrap();

        db.reindex(Some("n1")).unwrap();
        assert_eq!(db.get("/idx1").unwrap(), Some(json!({"tags": ["t1"]})));
        assert_eq!(db.get("/idx2").unwrap(), None);
    }

    #[test]
    fn reindex_unknown_definition_errors() {
        let (_dir, db) = make_db();
        assert!(matches!(
            db.reindex(Some("ghost")),
            Err(DatabaseError::Index(IndexError::DefinitionNotFound(_)))
        ));
    }

    #[test]
    fn reindex_drops_deleted_documents_from_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(dir.path(), tagging_options()).unwrap();

        db.set("/a/b", &json!({"x": 1})).unwrap();
        db.delete("/a/b").unwrap();
        assert!(db.indexed_at("/a/b").is_some());

        db.reindex(None).unwrap();
        assert!(db.indexed_at("/a/b").is_none());
    }

    #[test]
    fn reserved_key_rejected_at_facade() {
        let (_dir, db) = make_db();
        assert!(matches!(
            db.set("/.dbindex", &json!({})),
            Err(DatabaseError::Store(StoreError::ReservedKey(_)))
        ));
        assert!(matches!(
            db.get("/.dbindex"),
            Err(DatabaseError::Store(StoreError::ReservedKey(_)))
        ));
        assert!(matches!(
            db.delete_tree("/.dbindex"),
            Err(DatabaseError::Store(StoreError::ReservedKey(_)))
        ));
    }

    #[test]
    fn custom_index_key() {
        let dir = tempfile::tempdir().unwrap();
        let options = DatabaseOptions::new().index_key("/.meta");
        let db = Database::open_with(dir.path(), options).unwrap();

        assert_eq!(db.index_key(), "/.meta");
        assert!(matches!(
            db.set("/.meta", &json!({})),
            Err(DatabaseError::Store(StoreError::ReservedKey(_)))
        ));
        // The default key is an ordinary key under a custom reservation.
        assert!(db.set("/.dbindex", &json!({"ok": true})).unwrap());
    }

    #[test]
    fn listing_and_counting_through_facade() {
        let (_dir, db) = make_db();
        db.set("/foo/entry1", &json!({})).unwrap();
        db.set("/foo/entry2", &json!({})).unwrap();
        db.set("/foo/other", &json!({})).unwrap();

        let re = Regex::new("^entry").unwrap();
        let entries = db.list_entries("/foo", Some(&re)).unwrap().unwrap();
        assert_eq!(entries.len() as i64, db.count_entries("/foo", Some(&re)).unwrap());
        assert_eq!(entries, vec!["entry1", "entry2"]);
    }
}
