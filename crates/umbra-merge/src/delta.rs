//! Recursive difference of a desired tree over a reported tree.

use serde_json::{Map, Number, Value};

/// Computes the delta of `desired` over `reported`.
///
/// Returns `None` when the two trees are equivalent. Otherwise the result
/// contains, for object inputs, exactly the fields a device would have to
/// apply to `reported` to reach `desired`:
///
/// - fields whose values differ (recursing into nested objects),
/// - fields present only in `desired` (copied as-is),
/// - fields present only in `reported`, emitted as explicit `null`
///   deletion markers.
///
/// Numbers compare equal only when both their integer and floating
/// interpretations agree, so `1` and `1.0` are equal while `1` and `1.5`
/// are not. Arrays and scalars are atomic: any inequality yields the whole
/// `desired` value.
pub fn delta(reported: &Value, desired: &Value) -> Option<Value> {
    match (reported, desired) {
        (Value::Object(rep), Value::Object(des)) => {
            let diff = delta_objects(rep, des);
            if diff.is_empty() {
                None
            } else {
                Some(Value::Object(diff))
            }
        }
        (Value::Number(a), Value::Number(b)) => {
            if numbers_equal(a, b) {
                None
            } else {
                Some(desired.clone())
            }
        }
        _ => {
            if reported == desired {
                None
            } else {
                Some(desired.clone())
            }
        }
    }
}

fn delta_objects(reported: &Map<String, Value>, desired: &Map<String, Value>) -> Map<String, Value> {
    let mut diff = Map::new();

    for (key, desired_value) in desired {
        match reported.get(key) {
            None => {
                diff.insert(key.clone(), desired_value.clone());
            }
            Some(reported_value) => {
                if let Some(sub) = delta(reported_value, desired_value) {
                    diff.insert(key.clone(), sub);
                }
            }
        }
    }

    // Fields the device still reports but that are no longer desired are
    // surfaced as explicit null deletion markers.
    for key in reported.keys() {
        if !desired.contains_key(key) {
            diff.insert(key.clone(), Value::Null);
        }
    }

    diff
}

/// Numeric equality requiring agreement of both the integer and the
/// floating interpretation of the two numbers.
fn numbers_equal(a: &Number, b: &Number) -> bool {
    as_long(a) == as_long(b) && a.as_f64() == b.as_f64()
}

fn as_long(n: &Number) -> i64 {
    n.as_i64()
        .or_else(|| n.as_f64().map(|f| f as i64))
        .unwrap_or(i64::MAX)
}
