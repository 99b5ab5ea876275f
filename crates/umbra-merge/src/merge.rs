//! In-place JSON merge with null-as-deletion semantics.

use serde_json::{Map, Value};

use crate::MergeError;

/// Merges `patch` into `source`, mutating `source`.
///
/// Semantics:
///
/// - Object into object: per-field rules below.
/// - Array into array: `source`'s elements are replaced wholesale.
/// - Any other combination fails with [`MergeError::InvalidPayload`].
///
/// Per-field rules when both sides are objects:
///
/// - A `null` in `patch` removes the field from `source`.
/// - A field absent from `source` is inserted; object values are first
///   collapsed through [`build_merge_tree`] so that subtrees consisting
///   entirely of `null` leaves contribute nothing.
/// - When both values are objects the merge recurses.
/// - Otherwise the patch value replaces the source value.
pub fn merge(source: &mut Value, patch: &Value) -> Result<(), MergeError> {
    match (&mut *source, patch) {
        (Value::Object(src), Value::Object(pat)) => {
            merge_objects(src, pat);
            Ok(())
        }
        (Value::Array(src), Value::Array(pat)) => {
            *src = pat.clone();
            Ok(())
        }
        (src, pat) => Err(MergeError::InvalidPayload(format!(
            "cannot merge {} into {}",
            kind(pat),
            kind(src)
        ))),
    }
}

fn merge_objects(source: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, patch_value) in patch {
        if patch_value.is_null() {
            source.remove(key);
            continue;
        }

        match source.get_mut(key) {
            None => {
                if let Value::Object(patch_obj) = patch_value {
                    if let Some(tree) = build_merge_tree(patch_obj) {
                        source.insert(key.clone(), Value::Object(tree));
                    }
                } else {
                    source.insert(key.clone(), patch_value.clone());
                }
            }
            Some(Value::Object(existing)) => {
                if let Value::Object(patch_obj) = patch_value {
                    merge_objects(existing, patch_obj);
                } else {
                    source.insert(key.clone(), patch_value.clone());
                }
            }
            Some(existing) => {
                *existing = patch_value.clone();
            }
        }
    }
}

/// Builds the subtree to insert for a patch object with no counterpart in
/// the source.
///
/// Null leaves are deletion markers and carry no content, so a subtree made
/// only of nulls collapses to nothing and returns `None`.
fn build_merge_tree(patch: &Map<String, Value>) -> Option<Map<String, Value>> {
    let mut tree = Map::new();
    for (key, value) in patch {
        match value {
            Value::Null => {}
            Value::Object(obj) => {
                if let Some(sub) = build_merge_tree(obj) {
                    tree.insert(key.clone(), Value::Object(sub));
                }
            }
            other => {
                tree.insert(key.clone(), other.clone());
            }
        }
    }
    if tree.is_empty() {
        None
    } else {
        Some(tree)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
