use serde_json::Value;

use crate::backend::Document;

/// Seed an upsert document from the query's top-level equality constraints,
/// so the inserted document matches the query that missed.
pub(crate) fn seed_from_query(query: &Value) -> Document {
    let mut doc = Value::Object(Default::default());
    if let Some(entries) = query.as_object() {
        for (path, expected) in entries {
            if path.starts_with('$') {
                continue;
            }
            let operand = match expected {
                Value::Object(ops) => match ops.get("$eq") {
                    Some(v) if ops.len() == 1 => v,
                    _ => continue,
                },
                other => other,
            };
            set_seed_path(&mut doc, path, operand.clone());
        }
    }
    doc
}

fn set_seed_path(doc: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (i, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        let map = current.as_object_mut().unwrap();
        if i + 1 == segments.len() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
}
