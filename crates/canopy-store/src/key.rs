//! Key validation and key-to-filename mapping.
//!
//! A key is a slash-delimited, case-sensitive path string identifying a
//! document's location in the store's namespace. Every valid key maps
//! bijectively to a file location: `root + key + ".json"`.

use crate::error::{StoreError, StoreResult};

/// Separator that every key must start with.
pub const KEY_SEPARATOR: char = '/';

/// Suffix appended to a key's final component to form the on-disk file name.
pub const ENTRY_SUFFIX: &str = ".json";

/// Validate the shape of a key. Runs before any I/O.
///
/// Components must be non-empty and must not be `.` or `..`: relative
/// components would let a key resolve outside its lexical location (and
/// past the reserved-location guards), and an empty leading component
/// would make the remainder an absolute path that escapes the root
/// entirely when joined.
pub fn validate(key: &str) -> StoreResult<()> {
    if !key.starts_with(KEY_SEPARATOR) {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason: format!("keys must start with {KEY_SEPARATOR:?}"),
        });
    }
    for component in key[1..].split(KEY_SEPARATOR) {
        if component.is_empty() || component == "." || component == ".." {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: format!("key component {component:?} is not allowed"),
            });
        }
    }
    Ok(())
}

/// Strip the entry suffix from a file name, returning the logical name.
///
/// Returns `None` for files that do not carry the suffix (they are not
/// documents and are skipped by listing operations).
pub fn strip_suffix(file_name: &str) -> Option<&str> {
    file_name.strip_suffix(ENTRY_SUFFIX)
}
