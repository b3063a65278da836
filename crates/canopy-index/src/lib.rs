//! Secondary-index definitions and persistence for Canopy.
//!
//! An index definition pairs a key filter with a transform that derives a
//! partial aggregate contribution from each matching write. Definitions
//! live in a [`Registry`] persisted inside the store itself, at a reserved
//! key the document surface refuses to touch.
//!
//! # Key Types
//!
//! - [`Filter`] -- exact-string or pattern predicate over written keys
//! - [`IndexDefinition`] -- name, filter, target key, transform identifier
//! - [`Transform`] / [`HandlerRegistry`] -- application-registered handlers;
//!   persisted snapshots carry identifiers only, never executable code
//! - [`Registry`] -- ordered definitions plus the reindex ledger, rewritten
//!   synchronously on every mutation

mod codec;
pub mod definition;
pub mod error;
pub mod handler;
pub mod registry;

pub use definition::{Filter, IndexDefinition};
pub use error::{IndexError, IndexResult};
pub use handler::{FnTransform, HandlerRegistry, Transform};
pub use registry::{Registry, DEFAULT_INDEX_KEY, REGISTRY_FILE_NAME};
