use regex::RegexBuilder;
use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::path::get_path;

/// Evaluate a query against a document.
///
/// A top-level query is an implicit `$and` of its entries, evaluated
/// left-to-right with short-circuiting. A mapping value whose first key
/// starts with `$` is an operator expression; any other value is `$eq`
/// shorthand. Type mismatches in comparators make the predicate false rather
/// than erroring; unknown operators are an error.
pub fn matches(doc: &Value, query: &Value) -> Result<bool, QueryError> {
    let entries = query
        .as_object()
        .ok_or_else(|| QueryError::malformed("query must be an object"))?;
    for (key, expected) in entries {
        let hit = match key.as_str() {
            "$and" => combine(doc, expected, key)?.iter().all(|m| *m),
            "$or" => combine(doc, expected, key)?.iter().any(|m| *m),
            "$nor" => !combine(doc, expected, key)?.iter().any(|m| *m),
            op if op.starts_with('$') => {
                return Err(QueryError::UnknownOperator { op: op.to_string() })
            }
            path => match_field(doc, path, expected)?,
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn combine(doc: &Value, clauses: &Value, op: &str) -> Result<Vec<bool>, QueryError> {
    let clauses = clauses
        .as_array()
        .ok_or_else(|| QueryError::malformed(format!("{op} expects an array of queries")))?;
    let mut out = Vec::with_capacity(clauses.len());
    for clause in clauses {
        out.push(matches(doc, clause)?);
    }
    Ok(out)
}

fn match_field(doc: &Value, path: &str, expected: &Value) -> Result<bool, QueryError> {
    let actual = get_path(doc, path);
    if let Some(ops) = operator_object(expected) {
        eval_ops(actual, ops)
    } else {
        Ok(eq_match(actual, expected))
    }
}

/// A mapping beginning with `$` is an operator expression.
fn operator_object(value: &Value) -> Option<&Map<String, Value>> {
    let map = value.as_object()?;
    match map.keys().next() {
        Some(first) if first.starts_with('$') => Some(map),
        _ => None,
    }
}

fn eval_ops(actual: Option<&Value>, ops: &Map<String, Value>) -> Result<bool, QueryError> {
    for (op, operand) in ops {
        let hit = match op.as_str() {
            "$eq" => eq_match(actual, operand),
            "$ne" => !eq_match(actual, operand),
            "$gt" => cmp_op(actual, operand, |o| o == std::cmp::Ordering::Greater),
            "$gte" => cmp_op(actual, operand, |o| o != std::cmp::Ordering::Less),
            "$lt" => cmp_op(actual, operand, |o| o == std::cmp::Ordering::Less),
            "$lte" => cmp_op(actual, operand, |o| o != std::cmp::Ordering::Greater),
            "$in" => {
                let candidates = operand
                    .as_array()
                    .ok_or_else(|| QueryError::malformed("$in expects an array"))?;
                candidates.iter().any(|c| eq_match(actual, c))
            }
            "$nin" => {
                let candidates = operand
                    .as_array()
                    .ok_or_else(|| QueryError::malformed("$nin expects an array"))?;
                !candidates.iter().any(|c| eq_match(actual, c))
            }
            "$exists" => {
                let wanted = operand
                    .as_bool()
                    .ok_or_else(|| QueryError::malformed("$exists expects a boolean"))?;
                actual.is_some() == wanted
            }
            "$type" => {
                let name = operand
                    .as_str()
                    .ok_or_else(|| QueryError::malformed("$type expects a type name"))?;
                actual.map(|v| type_matches(v, name)).unwrap_or(false)
            }
            "$size" => {
                let wanted = operand
                    .as_u64()
                    .ok_or_else(|| QueryError::malformed("$size expects a non-negative integer"))?;
                actual
                    .and_then(Value::as_array)
                    .map(|items| items.len() as u64 == wanted)
                    .unwrap_or(false)
            }
            "$all" => {
                let wanted = operand
                    .as_array()
                    .ok_or_else(|| QueryError::malformed("$all expects an array"))?;
                actual
                    .and_then(Value::as_array)
                    .map(|items| {
                        wanted
                            .iter()
                            .all(|w| items.iter().any(|item| value_eq(item, w)))
                    })
                    .unwrap_or(false)
            }
            "$elemMatch" => elem_match(actual, operand)?,
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| QueryError::malformed("$regex expects a string"))?;
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                regex_match(actual, pattern, options)?
            }
            // Consumed alongside $regex.
            "$options" => true,
            "$mod" => modulo_match(actual, operand)?,
            "$not" => {
                let inner = operator_object(operand)
                    .ok_or_else(|| QueryError::malformed("$not expects an operator expression"))?;
                !eval_ops(actual, inner)?
            }
            other => {
                return Err(QueryError::UnknownOperator {
                    op: other.to_string(),
                })
            }
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `$eq` semantics: deep equality with numeric coercion, plus the Mongo rule
/// that an array field matches a scalar operand contained in it. A missing
/// field matches only an explicit `null`.
fn eq_match(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(value) => {
            value_eq(value, expected)
                || value
                    .as_array()
                    .map(|items| items.iter().any(|item| value_eq(item, expected)))
                    .unwrap_or(false)
        }
    }
}

/// Deep equality treating `50` and `50.0` as equal.
pub(crate) fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| value_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| value_eq(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Same-kind comparison: numbers with numbers, strings with strings.
/// Anything else is incomparable and the comparator is simply false.
fn cmp_op(
    actual: Option<&Value>,
    operand: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let Some(actual) = actual else { return false };
    let ordering = match (actual, operand) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.map(accept).unwrap_or(false)
}

fn type_matches(value: &Value, name: &str) -> bool {
    match name {
        "null" => value.is_null(),
        "bool" | "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "int" | "integer" => value.is_i64() || value.is_u64(),
        "double" | "float" => value.is_f64(),
        "string" => value.is_string(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => false,
    }
}

/// `$elemMatch`: true if any array element satisfies the operand, which is
/// either an operator expression applied to the element or a sub-query
/// against an element object.
fn elem_match(actual: Option<&Value>, operand: &Value) -> Result<bool, QueryError> {
    let Some(items) = actual.and_then(Value::as_array) else {
        return Ok(false);
    };
    for item in items {
        let hit = match operator_object(operand) {
            Some(ops) => eval_ops(Some(item), ops)?,
            None => matches(item, operand)?,
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn regex_match(actual: Option<&Value>, pattern: &str, options: &str) -> Result<bool, QueryError> {
    let Some(subject) = actual.and_then(Value::as_str) else {
        return Ok(false);
    };
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(QueryError::BadRegex {
                    reason: format!("unsupported option: {other}"),
                })
            }
        };
    }
    let regex = builder.build().map_err(|e| QueryError::BadRegex {
        reason: e.to_string(),
    })?;
    Ok(regex.is_match(subject))
}

fn modulo_match(actual: Option<&Value>, operand: &Value) -> Result<bool, QueryError> {
    let pair = operand
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| QueryError::malformed("$mod expects [divisor, remainder]"))?;
    let (divisor, remainder) = (pair[0].as_i64(), pair[1].as_i64());
    let (Some(divisor), Some(remainder)) = (divisor, remainder) else {
        return Err(QueryError::malformed("$mod expects integer operands"));
    };
    if divisor == 0 {
        return Err(QueryError::malformed("$mod by zero"));
    }
    Ok(actual
        .and_then(Value::as_f64)
        .map(|n| (n as i64) % divisor == remainder)
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(doc: Value, query: Value) -> bool {
        matches(&doc, &query).unwrap()
    }

    #[test]
    fn implicit_eq_and_top_level_and() {
        let doc = json!({"name": "NYC", "context": {"pop": 8}});
        assert!(check(doc.clone(), json!({"name": "NYC"})));
        assert!(check(doc.clone(), json!({"name": "NYC", "context.pop": 8})));
        assert!(!check(doc, json!({"name": "NYC", "context.pop": 9})));
    }

    #[test]
    fn numeric_eq_coerces_int_and_float() {
        assert!(check(json!({"price": 50}), json!({"price": 50.0})));
        assert!(check(json!({"price": 50.0}), json!({"price": {"$eq": 50}})));
    }

    #[test]
    fn comparison_operators() {
        let doc = json!({"price": 100});
        assert!(check(doc.clone(), json!({"price": {"$gt": 50}})));
        assert!(check(doc.clone(), json!({"price": {"$gte": 100}})));
        assert!(check(doc.clone(), json!({"price": {"$lt": 500}})));
        assert!(check(doc.clone(), json!({"price": {"$lte": 100}})));
        assert!(!check(doc.clone(), json!({"price": {"$gt": 100}})));
        assert!(check(doc, json!({"price": {"$gte": 50, "$lte": 500}})));
    }

    #[test]
    fn type_mismatch_in_comparator_is_false_not_an_error() {
        let doc = json!({"price": "expensive"});
        assert!(!check(doc.clone(), json!({"price": {"$gt": 50}})));
        assert!(!check(doc, json!({"price": {"$lt": 50}})));
    }

    #[test]
    fn in_and_nin() {
        let doc = json!({"role": "admin", "tags": ["a", "b"]});
        assert!(check(doc.clone(), json!({"role": {"$in": ["admin", "user"]}})));
        assert!(!check(doc.clone(), json!({"role": {"$nin": ["admin"]}})));
        // Array fields intersect with the candidate list.
        assert!(check(doc, json!({"tags": {"$in": ["b", "z"]}})));
        // A missing field is matched by $nin.
        assert!(check(json!({}), json!({"role": {"$nin": ["admin"]}})));
    }

    #[test]
    fn logical_operators() {
        let doc = json!({"a": 1, "b": 2});
        assert!(check(
            doc.clone(),
            json!({"$and": [{"a": 1}, {"b": {"$gt": 1}}]})
        ));
        assert!(check(doc.clone(), json!({"$or": [{"a": 9}, {"b": 2}]})));
        assert!(check(doc.clone(), json!({"$nor": [{"a": 9}, {"b": 9}]})));
        assert!(!check(doc.clone(), json!({"$nor": [{"a": 1}]})));
        assert!(check(doc, json!({"a": {"$not": {"$gt": 5}}})));
    }

    #[test]
    fn exists_and_missing_intermediates() {
        let doc = json!({"a": {"b": 1}});
        assert!(check(doc.clone(), json!({"a.b": {"$exists": true}})));
        assert!(check(doc.clone(), json!({"a.c": {"$exists": false}})));
        assert!(check(doc.clone(), json!({"x.y.z": {"$exists": false}})));
        assert!(!check(doc, json!({"x.y.z": {"$exists": true}})));
    }

    #[test]
    fn type_operator() {
        let doc = json!({"n": 1, "f": 1.5, "s": "x", "xs": [], "o": {}, "z": null});
        assert!(check(doc.clone(), json!({"n": {"$type": "int"}})));
        assert!(check(doc.clone(), json!({"n": {"$type": "number"}})));
        assert!(check(doc.clone(), json!({"f": {"$type": "double"}})));
        assert!(check(doc.clone(), json!({"s": {"$type": "string"}})));
        assert!(check(doc.clone(), json!({"xs": {"$type": "array"}})));
        assert!(check(doc.clone(), json!({"o": {"$type": "object"}})));
        assert!(check(doc, json!({"z": {"$type": "null"}})));
    }

    #[test]
    fn array_operators() {
        let doc = json!({"xs": [1, 2, 3], "items": [{"price": 10}, {"price": 99}]});
        assert!(check(doc.clone(), json!({"xs": {"$size": 3}})));
        assert!(!check(doc.clone(), json!({"xs": {"$size": 2}})));
        assert!(check(doc.clone(), json!({"xs": {"$all": [1, 3]}})));
        assert!(!check(doc.clone(), json!({"xs": {"$all": [1, 9]}})));
        assert!(check(
            doc.clone(),
            json!({"items": {"$elemMatch": {"price": {"$gt": 50}}}})
        ));
        assert!(check(doc, json!({"xs": {"$elemMatch": {"$gte": 3}}})));
    }

    #[test]
    fn regex_with_options() {
        let doc = json!({"name": "New York"});
        assert!(check(doc.clone(), json!({"name": {"$regex": "^New"}})));
        assert!(!check(doc.clone(), json!({"name": {"$regex": "^new"}})));
        assert!(check(
            doc,
            json!({"name": {"$regex": "^new", "$options": "i"}})
        ));
    }

    #[test]
    fn mod_operator() {
        let doc = json!({"n": 10});
        assert!(check(doc.clone(), json!({"n": {"$mod": [3, 1]}})));
        assert!(!check(doc.clone(), json!({"n": {"$mod": [3, 0]}})));
        assert!(matches(&doc, &json!({"n": {"$mod": [0, 1]}})).is_err());
    }

    #[test]
    fn unknown_operator_is_an_error() {
        let err = matches(&json!({}), &json!({"a": {"$where": "x"}})).unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownOperator {
                op: "$where".into()
            }
        );
        assert!(matches(&json!({}), &json!({"$fancy": []})).is_err());
    }

    #[test]
    fn null_query_matches_missing_field() {
        assert!(check(json!({}), json!({"gone": null})));
        assert!(check(json!({"gone": null}), json!({"gone": null})));
        assert!(!check(json!({"gone": 1}), json!({"gone": null})));
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(check(json!({"anything": true}), json!({})));
    }
}
