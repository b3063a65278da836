//! Filesystem-backed JSON document storage for Canopy.
//!
//! Logical keys (slash-delimited path strings) map one-to-one onto files:
//! the document at key `K` lives at `root + K + ".json"`, with directories
//! forming an implicit hierarchy. This crate covers key validation, path
//! resolution, and the CRUD/enumeration surface of [`FileStore`]; it knows
//! nothing about indexing except the reserved location it must refuse to
//! touch.
//!
//! # Design Rules
//!
//! 1. Keys are validated before any I/O.
//! 2. Read-path I/O failures are logged and collapsed to sentinel values
//!    (`None` / `false` / `-1`); validation and JSON errors propagate.
//! 3. Every operation opens and releases its file handles within the call.
//! 4. The reserved index location is rejected by every operation.

pub mod error;
pub mod key;
pub mod resolver;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use key::{ENTRY_SUFFIX, KEY_SEPARATOR};
pub use resolver::PathResolver;
pub use store::{FileStore, Visit};
