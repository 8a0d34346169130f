use std::cmp::Ordering;

use serde_json::Value;

use crate::error::QueryError;
use crate::eval::matches;
use crate::path::get_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Stable total order over JSON values so sorting never panics on mixed
/// documents: null < bool < number < string < array < object.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(xs), Value::Array(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                let ord = cmp_values(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xs.len().cmp(&ys.len())
        }
        (Value::Object(xs), Value::Object(ys)) => {
            let ord = xs.len().cmp(&ys.len());
            if ord != Ordering::Equal {
                return ord;
            }
            // Cheap deterministic fallback for equal-sized objects.
            xs.keys().cmp(ys.keys())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Sort documents by the given `(path, order)` keys, missing paths last-equal
/// to null. The sort is stable.
pub fn sort_documents(docs: &mut [Value], sort: &[(String, SortOrder)]) {
    docs.sort_by(|a, b| {
        for (path, order) in sort {
            let left = get_path(a, path).unwrap_or(&Value::Null);
            let right = get_path(b, path).unwrap_or(&Value::Null);
            let ord = cmp_values(left, right);
            let ord = match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Filter, sort, and window a scanned collection.
///
/// An `id` ascending tiebreak is always appended so that result order (and
/// therefore `find_one`) is deterministic across backends.
pub fn apply_find(
    docs: Vec<Value>,
    query: &Value,
    sort: Option<&[(String, SortOrder)]>,
    limit: Option<usize>,
    offset: Option<usize>,
) -> Result<Vec<Value>, QueryError> {
    let mut hits = Vec::new();
    for doc in docs {
        if matches(&doc, query)? {
            hits.push(doc);
        }
    }
    let mut keys: Vec<(String, SortOrder)> = sort.map(<[_]>::to_vec).unwrap_or_default();
    if !keys.iter().any(|(path, _)| path == "id") {
        keys.push(("id".to_string(), SortOrder::Ascending));
    }
    sort_documents(&mut hits, &keys);
    let offset = offset.unwrap_or(0);
    let mut out: Vec<Value> = hits.into_iter().skip(offset).collect();
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_by_nested_path() {
        let mut docs = vec![
            json!({"id": "c", "context": {"price": 100}}),
            json!({"id": "a", "context": {"price": 500}}),
            json!({"id": "b", "context": {"price": 10}}),
        ];
        sort_documents(
            &mut docs,
            &[("context.price".to_string(), SortOrder::Ascending)],
        );
        let ids: Vec<_> = docs.iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!("b"), json!("c"), json!("a")]);
    }

    #[test]
    fn descending_reverses() {
        let mut docs = vec![json!({"n": 1}), json!({"n": 3}), json!({"n": 2})];
        sort_documents(&mut docs, &[("n".to_string(), SortOrder::Descending)]);
        assert_eq!(docs[0]["n"], json!(3));
    }

    #[test]
    fn mixed_types_sort_by_rank() {
        let mut docs = vec![json!({"v": "s"}), json!({"v": 1}), json!({"v": null})];
        sort_documents(&mut docs, &[("v".to_string(), SortOrder::Ascending)]);
        assert_eq!(docs[0]["v"], json!(null));
        assert_eq!(docs[1]["v"], json!(1));
        assert_eq!(docs[2]["v"], json!("s"));
    }

    #[test]
    fn apply_find_filters_windows_and_tiebreaks_by_id() {
        let docs = vec![
            json!({"id": "3", "n": 10}),
            json!({"id": "1", "n": 10}),
            json!({"id": "2", "n": 99}),
        ];
        let out = apply_find(docs.clone(), &json!({"n": 10}), None, None, None).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["id"], json!("1"));

        let out = apply_find(docs, &json!({}), None, Some(1), Some(1)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], json!("2"));
    }
}
