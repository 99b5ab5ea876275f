//! Three-way reconciliation of local and cloud trees against a base.

use serde_json::{Map, Value};

/// Which side wins when local and cloud both diverge from the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOwner {
    /// The device's local document wins contested fields.
    Local,
    /// The cloud document wins contested fields.
    Cloud,
}

/// Merges `local` and `cloud` against their common ancestor `base`.
///
/// The merge recurses through object fields. At every field:
///
/// - if both sides still match the base, the base value is kept;
/// - if exactly one side changed, that side's value is taken;
/// - if both sides changed, the `owner` side wins.
///
/// Arrays are atomic: they are never merged element-wise, and a contested
/// array goes to the owner like any other scalar. A side "changing" a field
/// includes removing it, so a field deleted by one side while untouched by
/// the other disappears from the result.
pub fn three_way_merge(local: &Value, cloud: &Value, base: &Value, owner: MergeOwner) -> Value {
    match (local, cloud) {
        (Value::Object(local_obj), Value::Object(cloud_obj)) => {
            let empty = Map::new();
            let base_obj = match base {
                Value::Object(obj) => obj,
                _ => &empty,
            };
            Value::Object(merge_fields(local_obj, cloud_obj, base_obj, owner))
        }
        _ => pick(local, cloud, base, owner).cloned().unwrap_or(Value::Null),
    }
}

fn merge_fields(
    local: &Map<String, Value>,
    cloud: &Map<String, Value>,
    base: &Map<String, Value>,
    owner: MergeOwner,
) -> Map<String, Value> {
    let mut result = Map::new();

    let mut keys: Vec<&String> = local.keys().chain(cloud.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let local_value = local.get(key);
        let cloud_value = cloud.get(key);
        let base_value = base.get(key);

        let merged = match (local_value, cloud_value) {
            (Some(Value::Object(lo)), Some(Value::Object(co))) => {
                let empty = Map::new();
                let bo = match base_value {
                    Some(Value::Object(obj)) => obj,
                    _ => &empty,
                };
                Some(Value::Object(merge_fields(lo, co, bo, owner)))
            }
            (lv, cv) => pick_opt(lv, cv, base_value, owner).cloned(),
        };

        if let Some(value) = merged {
            result.insert(key.clone(), value);
        }
    }

    result
}

fn pick<'a>(
    local: &'a Value,
    cloud: &'a Value,
    base: &'a Value,
    owner: MergeOwner,
) -> Option<&'a Value> {
    pick_opt(Some(local), Some(cloud), Some(base), owner)
}

/// Resolves one field. `None` means the field is absent on that side.
fn pick_opt<'a>(
    local: Option<&'a Value>,
    cloud: Option<&'a Value>,
    base: Option<&'a Value>,
    owner: MergeOwner,
) -> Option<&'a Value> {
    let local_changed = local != base;
    let cloud_changed = cloud != base;

    match (local_changed, cloud_changed) {
        (false, false) => base,
        (true, false) => local,
        (false, true) => cloud,
        (true, true) => match owner {
            MergeOwner::Local => local,
            MergeOwner::Cloud => cloud,
        },
    }
}
