//! Object nesting depth validation.

use serde_json::Value;

use crate::MergeError;

/// Maximum number of nested object levels allowed in a state tree.
pub const MAX_NESTING_DEPTH: usize = 6;

/// Validates that `node` nests objects at most [`MAX_NESTING_DEPTH`] levels
/// deep.
///
/// Only objects count towards the depth; arrays and scalars terminate a
/// branch. An empty object still counts as one level.
pub fn validate_depth(node: &Value) -> Result<(), MergeError> {
    if object_depth(node) > MAX_NESTING_DEPTH {
        Err(MergeError::TooDeep)
    } else {
        Ok(())
    }
}

fn object_depth(node: &Value) -> usize {
    match node {
        Value::Object(obj) => 1 + obj.values().map(object_depth).max().unwrap_or(0),
        Value::Array(arr) => arr.iter().map(object_depth).max().unwrap_or(0),
        _ => 0,
    }
}
