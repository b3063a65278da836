//! The persisted collection of index definitions.
//!
//! One registry belongs to one store instance for its lifetime. The whole
//! snapshot (ordering, definitions, reindex ledger) is rewritten
//! synchronously on every registry mutation; document writes only touch
//! the in-memory ledger.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::codec::{PersistedDefinition, PersistedFilter, PersistedRegistry};
use crate::definition::{Filter, IndexDefinition};
use crate::error::{IndexError, IndexResult};
use crate::handler::HandlerRegistry;

/// Default reserved key the registry persists itself under.
pub const DEFAULT_INDEX_KEY: &str = "/.dbindex";

/// File name of the snapshot inside the reserved directory.
pub const REGISTRY_FILE_NAME: &str = "indexes";

/// Named index definitions plus the reindex ledger, tied to one snapshot
/// file on disk.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    ordered_names: Vec<String>,
    definitions: HashMap<String, IndexDefinition>,
    entries_processed: BTreeMap<String, DateTime<Utc>>,
}

impl Registry {
    /// Load the snapshot at `path`, or start empty if it does not exist.
    ///
    /// Every persisted transform identifier must resolve against
    /// `handlers`; an unknown identifier fails the load rather than
    /// deferring the failure to the first matching write.
    pub fn load(path: impl Into<PathBuf>, handlers: &HandlerRegistry) -> IndexResult<Self> {
        let path = path.into();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no registry snapshot; starting empty");
                return Ok(Self::empty(path));
            }
            Err(err) => return Err(err.into()),
        };
        if bytes.is_empty() {
            return Ok(Self::empty(path));
        }

        let persisted: PersistedRegistry =
            serde_json::from_slice(&bytes).map_err(|err| IndexError::CorruptRegistry {
                path: path.clone(),
                reason: err.to_string(),
            })?;

        if persisted.ordered_names.len() != persisted.definitions.len() {
            return Err(IndexError::CorruptRegistry {
                path,
                reason: "name ordering and definitions disagree".to_string(),
            });
        }

        let mut definitions = HashMap::new();
        for name in &persisted.ordered_names {
            let entry =
                persisted
                    .definitions
                    .get(name)
                    .ok_or_else(|| IndexError::CorruptRegistry {
                        path: path.clone(),
                        reason: format!("definition {name:?} missing from snapshot"),
                    })?;
            let filter = entry
                .filter
                .decode()
                .map_err(|reason| IndexError::CorruptRegistry {
                    path: path.clone(),
                    reason,
                })?;
            if !handlers.contains(&entry.transform) {
                return Err(IndexError::UnknownTransform(entry.transform.clone()));
            }
            definitions.insert(
                name.clone(),
                IndexDefinition {
                    name: name.clone(),
                    filter,
                    target_key: entry.target_key.clone(),
                    transform: entry.transform.clone(),
                },
            );
        }

        debug!(
            path = %path.display(),
            definitions = definitions.len(),
            ledger = persisted.entries_processed.len(),
            "registry snapshot loaded"
        );
        Ok(Self {
            path,
            ordered_names: persisted.ordered_names,
            definitions,
            entries_processed: persisted.entries_processed,
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            ordered_names: Vec::new(),
            definitions: HashMap::new(),
            entries_processed: BTreeMap::new(),
        }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Definition names in registration order (defensive copy).
    pub fn list(&self) -> Vec<String> {
        self.ordered_names.clone()
    }

    pub fn len(&self) -> usize {
        self.ordered_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_names.is_empty()
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &str) -> Option<&IndexDefinition> {
        self.definitions.get(name)
    }

    /// Definitions in registration order.
    pub fn definitions_in_order(&self) -> impl Iterator<Item = &IndexDefinition> + '_ {
        self.ordered_names
            .iter()
            .filter_map(|name| self.definitions.get(name))
    }

    /// Add a definition, or replace one in place when `name` already
    /// exists. The full snapshot is persisted before returning.
    pub fn add(
        &mut self,
        name: &str,
        filter: Filter,
        target_key: &str,
        transform: &str,
        handlers: &HandlerRegistry,
    ) -> IndexResult<()> {
        if name.is_empty() {
            return Err(IndexError::InvalidDefinition(
                "name must not be empty".to_string(),
            ));
        }
        if !target_key.starts_with('/') {
            return Err(IndexError::InvalidDefinition(format!(
                "target key {target_key:?} must start with \"/\""
            )));
        }
        if !handlers.contains(transform) {
            return Err(IndexError::UnknownTransform(transform.to_string()));
        }

        let replaced = self
            .definitions
            .insert(
                name.to_string(),
                IndexDefinition {
                    name: name.to_string(),
                    filter,
                    target_key: target_key.to_string(),
                    transform: transform.to_string(),
                },
            )
            .is_some();
        if !replaced {
            self.ordered_names.push(name.to_string());
        }

        self.persist()
    }

    /// Remove a definition and its ordering entry, persisting the
    /// snapshot. Returns `false` if the name was not registered.
    /// Previously written aggregate documents are left untouched.
    pub fn remove(&mut self, name: &str) -> IndexResult<bool> {
        if self.definitions.remove(name).is_none() {
            return Ok(false);
        }
        self.ordered_names.retain(|n| n != name);
        self.persist()?;
        Ok(true)
    }

    /// Record that `key` was fed through the engine just now. In-memory
    /// only; flushed with the next snapshot write.
    pub fn mark_processed(&mut self, key: &str) {
        self.entries_processed.insert(key.to_string(), Utc::now());
    }

    /// Drop a ledger entry (e.g. its document no longer exists).
    pub fn clear_processed(&mut self, key: &str) {
        self.entries_processed.remove(key);
    }

    /// Every key the engine has ever processed, in ledger order.
    pub fn processed_keys(&self) -> Vec<String> {
        self.entries_processed.keys().cloned().collect()
    }

    /// Last-processed time for a key, if it is in the ledger.
    pub fn processed_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries_processed.get(key).copied()
    }

    /// Synchronously rewrite the whole snapshot.
    pub fn persist(&self) -> IndexResult<()> {
        let persisted = PersistedRegistry {
            ordered_names: self.ordered_names.clone(),
            definitions: self
                .definitions
                .iter()
                .map(|(name, def)| {
                    (
                        name.clone(),
                        PersistedDefinition {
                            filter: PersistedFilter::encode(&def.filter),
                            target_key: def.target_key.clone(),
                            transform: def.transform.clone(),
                        },
                    )
                })
                .collect(),
            entries_processed: self.entries_processed.clone(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec(&persisted)?)?;
        debug!(path = %self.path.display(), definitions = self.len(), "registry snapshot written");
        Ok(())
    }
}
