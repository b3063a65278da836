//! High-level API for the Canopy document store.
//!
//! This is the entry point for applications embedding Canopy: a
//! hierarchical, filesystem-backed JSON document store whose writes feed
//! an incremental secondary-index engine.
//!
//! ```no_run
//! use canopy_sdk::{Database, DatabaseOptions, Filter};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), canopy_sdk::DatabaseError> {
//! let options = DatabaseOptions::new()
//!     .handler_fn("tags", |_key, doc| {
//!         doc.get("tag").map(|t| json!({ "tags": [t] }))
//!     });
//! let db = Database::open_with("/var/lib/myapp/db", options)?;
//!
//! db.index_add("tagged", Filter::Exact("/posts/latest".into()), "/idx/tags", "tags")?;
//! db.set("/posts/latest", &json!({ "tag": "rust" }))?;
//! assert_eq!(db.get("/idx/tags")?, Some(json!({ "tags": ["rust"] })));
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod error;

pub use database::{Database, DatabaseOptions};
pub use error::{DatabaseError, DbResult};

// Re-export the types callers need to drive the API.
pub use canopy_index::{Filter, FnTransform, HandlerRegistry, IndexError, Transform};
pub use canopy_store::{StoreError, Visit};
