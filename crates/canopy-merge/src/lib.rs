//! Deep-merge algorithm for Canopy index aggregates.
//!
//! Transforms produce partial objects; this crate folds them into an
//! existing aggregate document:
//!
//! - object into object merges recursively;
//! - arrays behave as insertion-ordered sets: a partial element is appended
//!   only if the aggregate array does not already contain a structurally
//!   equal value;
//! - everything else overwrites.

use serde_json::Value;

/// Merge `partial` into `aggregate` in place.
///
/// When the two top-level values are not both objects, `partial` simply
/// replaces `aggregate` (transform outputs are expected to be objects, but
/// the algorithm does not require it).
pub fn deep_merge(partial: &Value, aggregate: &mut Value) {
    match (partial, aggregate) {
        (Value::Object(partial), Value::Object(aggregate)) => {
            for (name, value) in partial {
                match value {
                    Value::Object(_) => {
                        let slot = aggregate
                            .entry(name.clone())
                            .or_insert_with(|| Value::Object(Default::default()));
                        if !slot.is_object() {
                            *slot = Value::Object(Default::default());
                        }
                        deep_merge(value, slot);
                    }
                    Value::Array(elements) => {
                        let slot = aggregate
                            .entry(name.clone())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if !slot.is_array() {
                            *slot = Value::Array(Vec::new());
                        }
                        if let Value::Array(existing) = slot {
                            merge_array(elements, existing);
                        }
                    }
                    _ => {
                        aggregate.insert(name.clone(), value.clone());
                    }
                }
            }
        }
        (partial, aggregate) => *aggregate = partial.clone(),
    }
}

/// Append each element not already present, preserving first-occurrence
/// order. Membership is structural `Value` equality.
fn merge_array(elements: &[Value], existing: &mut Vec<Value>) {
    for element in elements {
        if !existing.contains(element) {
            existing.push(element.clone());
        }
    }
}
