//! Transform handlers: the executable half of an index definition.
//!
//! Persisted definitions carry only a handler identifier. The embedding
//! application supplies the logic by registering handlers before the
//! registry is loaded; loading fails loudly when an identifier has no
//! registered handler. Executable code is never read from storage.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Computes a partial aggregate contribution from a written key/document.
///
/// Returning `None` means this write contributes nothing to the index.
pub trait Transform: Send + Sync {
    fn apply(&self, key: &str, document: &Value) -> Option<Value>;
}

/// Adapter so plain closures can serve as transforms.
pub struct FnTransform<F>(F);

impl<F> FnTransform<F>
where
    F: Fn(&str, &Value) -> Option<Value> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(&str, &Value) -> Option<Value> + Send + Sync,
{
    fn apply(&self, key: &str, document: &Value) -> Option<Value> {
        (self.0)(key, document)
    }
}

/// Identifier-to-handler mapping supplied by the embedding application.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Transform>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under an identifier. A duplicate id replaces the
    /// previous handler.
    pub fn register(&mut self, id: impl Into<String>, handler: Arc<dyn Transform>) {
        self.handlers.insert(id.into(), handler);
    }

    /// Register a closure under an identifier.
    pub fn register_fn<F>(&mut self, id: impl Into<String>, f: F)
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.register(id, Arc::new(FnTransform::new(f)));
    }

    /// Look up the handler for an identifier.
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn Transform>> {
        self.handlers.get(id).cloned()
    }

    /// Whether an identifier has a registered handler.
    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
