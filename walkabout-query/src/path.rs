use serde_json::Value;

/// Resolve a dot-notation path against a document.
///
/// Mapping segments descend objects; integer segments index arrays. A missing
/// intermediate resolves to `None`, which the evaluator treats as
/// "does not exist".
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Set a value at a dot-notation path, creating intermediate objects.
///
/// Integer segments into existing arrays assign in place; anything else on
/// the way down is replaced by an object.
pub(crate) fn set_path(doc: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_path_segments(doc, &segments, value);
}

fn set_path_segments(current: &mut Value, segments: &[&str], value: Value) {
    let segment = segments[0];
    let last = segments.len() == 1;
    if let Value::Array(items) = current {
        if let Ok(index) = segment.parse::<usize>() {
            if index < items.len() {
                if last {
                    items[index] = value;
                    return;
                }
                set_path_segments(&mut items[index], &segments[1..], value);
                return;
            }
        }
    }
    if !current.is_object() {
        *current = Value::Object(serde_json::Map::new());
    }
    let map = current.as_object_mut().unwrap();
    if last {
        map.insert(segment.to_string(), value);
        return;
    }
    let entry = map
        .entry(segment.to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    set_path_segments(entry, &segments[1..], value);
}

/// Remove the value at a dot-notation path. Returns whether anything changed.
pub(crate) fn unset_path(doc: &mut Value, path: &str) -> bool {
    let (parent_path, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };
    let parent = match parent_path {
        Some(p) => match get_path_mut(doc, p) {
            Some(v) => v,
            None => return false,
        },
        None => doc,
    };
    match parent {
        Value::Object(map) => map.remove(leaf).is_some(),
        Value::Array(items) => match leaf.parse::<usize>() {
            Ok(index) if index < items.len() => {
                // Mongo nulls array slots on $unset rather than shifting.
                items[index] = Value::Null;
                true
            }
            _ => false,
        },
        _ => false,
    }
}

pub(crate) fn get_path_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get_mut(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descends_objects_and_arrays() {
        let doc = json!({"a": {"b": [10, {"c": 20}]}});
        assert_eq!(get_path(&doc, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_path(&doc, "a.b.1.c"), Some(&json!(20)));
        assert_eq!(get_path(&doc, "a.missing"), None);
        assert_eq!(get_path(&doc, "a.b.9"), None);
    }

    #[test]
    fn set_creates_intermediates() {
        let mut doc = json!({});
        set_path(&mut doc, "a.b.c", json!(1));
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_assigns_into_existing_array() {
        let mut doc = json!({"xs": [1, 2, 3]});
        set_path(&mut doc, "xs.1", json!(9));
        assert_eq!(doc, json!({"xs": [1, 9, 3]}));
    }

    #[test]
    fn unset_removes_object_keys() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        assert!(unset_path(&mut doc, "a.b"));
        assert_eq!(doc, json!({"a": {"c": 2}}));
        assert!(!unset_path(&mut doc, "a.b"));
    }
}
