use serde_json::Value;

pub(crate) type Change = (String, Value, Value);

fn child_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Leaf-level differences between two JSON documents. Object keys join with
/// `.`, array positions render as `[i]`. Added leaves have `old = null`,
/// removed ones `new = null`.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<Change>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = child_path(path_prefix, key);
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => added(curr_val, &path, changes),
                }
            }
            for (key, prev_val) in prev_map {
                if !curr_map.contains_key(key) {
                    changes.push((child_path(path_prefix, key), prev_val.clone(), Value::Null));
                }
            }
        }
        (Value::Array(prev_items), Value::Array(curr_items)) => {
            for (i, curr_val) in curr_items.iter().enumerate() {
                let path = format!("{path_prefix}[{i}]");
                match prev_items.get(i) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => added(curr_val, &path, changes),
                }
            }
            for (i, prev_val) in prev_items.iter().enumerate().skip(curr_items.len()) {
                changes.push((format!("{path_prefix}[{i}]"), prev_val.clone(), Value::Null));
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

fn added(value: &Value, path: &str, changes: &mut Vec<Change>) {
    match value {
        Value::Object(_) => diff_json(&Value::Object(serde_json::Map::new()), value, path, changes),
        _ => changes.push((path.to_string(), Value::Null, value.clone())),
    }
}
