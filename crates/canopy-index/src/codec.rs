//! Serde types for the persisted registry snapshot.
//!
//! The registry is persisted as a single JSON document: the name ordering,
//! per-name definitions (filter kind + value, target key, transform
//! identifier), and the reindex ledger. No executable code is persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::definition::Filter;

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct PersistedRegistry {
    pub ordered_names: Vec<String>,
    pub definitions: BTreeMap<String, PersistedDefinition>,
    /// Key -> last-processed time, driving reindex.
    #[serde(default)]
    pub entries_processed: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PersistedDefinition {
    pub filter: PersistedFilter,
    pub target_key: String,
    pub transform: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PersistedFilter {
    pub kind: String,
    pub value: String,
}

impl PersistedFilter {
    pub fn encode(filter: &Filter) -> Self {
        Self {
            kind: filter.kind().to_string(),
            value: filter.value().to_string(),
        }
    }

    /// Decode back into a filter; the error string names what was wrong.
    pub fn decode(&self) -> Result<Filter, String> {
        match self.kind.as_str() {
            "string" => Ok(Filter::Exact(self.value.clone())),
            "pattern" => Regex::new(&self.value)
                .map(Filter::Pattern)
                .map_err(|err| format!("bad filter pattern {:?}: {err}", self.value)),
            other => Err(format!("unknown filter kind {other:?}")),
        }
    }
}
