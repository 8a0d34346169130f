use serde_json::Value;

use crate::error::QueryError;
use crate::eval::{matches, value_eq};
use crate::path::{get_path, get_path_mut, set_path, unset_path};

/// Apply an update document (`$set $unset $inc $mul $push $pull`) in place.
///
/// Returns whether the document changed. Non-operator top-level keys are an
/// error; updates either apply fully or leave the document untouched.
pub fn apply_update(doc: &mut Value, update: &Value) -> Result<bool, QueryError> {
    let ops = update
        .as_object()
        .ok_or_else(|| QueryError::malformed("update must be an object"))?;
    // Validate before mutating so a bad later operator can't half-apply.
    for (op, operand) in ops {
        match op.as_str() {
            "$set" | "$unset" | "$inc" | "$mul" | "$push" | "$pull" => {
                if !operand.is_object() {
                    return Err(QueryError::malformed(format!("{op} expects an object")));
                }
            }
            other => {
                return Err(QueryError::UnknownOperator {
                    op: other.to_string(),
                })
            }
        }
    }
    let mut changed = false;
    for (op, operand) in ops {
        let entries = operand.as_object().unwrap();
        for (path, value) in entries {
            match op.as_str() {
                "$set" => {
                    let same = get_path(doc, path).map(|v| value_eq(v, value)).unwrap_or(false);
                    if !same {
                        set_path(doc, path, value.clone());
                        changed = true;
                    }
                }
                "$unset" => {
                    changed |= unset_path(doc, path);
                }
                "$inc" | "$mul" => {
                    let operand = value.as_f64().ok_or_else(|| {
                        QueryError::malformed(format!("{op} expects numeric operands"))
                    })?;
                    // A missing field seeds from zero for both operators.
                    let current = get_path(doc, path).and_then(Value::as_f64).unwrap_or(0.0);
                    let next = if op == "$inc" {
                        current + operand
                    } else {
                        current * operand
                    };
                    set_path(doc, path, number(next));
                    changed = true;
                }
                "$push" => {
                    match get_path_mut(doc, path) {
                        Some(Value::Array(items)) => {
                            items.push(value.clone());
                        }
                        Some(_) => {
                            return Err(QueryError::malformed(format!(
                                "$push target {path} is not an array"
                            )))
                        }
                        None => set_path(doc, path, Value::Array(vec![value.clone()])),
                    }
                    changed = true;
                }
                "$pull" => {
                    if let Some(Value::Array(items)) = get_path_mut(doc, path) {
                        let before = items.len();
                        let condition = value.clone();
                        items.retain(|item| !pull_hit(item, &condition));
                        changed |= items.len() != before;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    Ok(changed)
}

/// `$pull` removes elements equal to the operand, or matching it when the
/// operand is a condition.
fn pull_hit(item: &Value, condition: &Value) -> bool {
    if let Some(map) = condition.as_object() {
        let is_condition = map.keys().next().map(|k| k.starts_with('$')).unwrap_or(false)
            || (item.is_object() && !map.is_empty());
        if is_condition {
            let query = if map.keys().next().map(|k| k.starts_with('$')).unwrap_or(false) {
                // Wrap an operator expression so it applies to the element.
                serde_json::json!({ "": condition })
            } else {
                condition.clone()
            };
            let subject = if query.get("").is_some() {
                serde_json::json!({ "": item })
            } else {
                item.clone()
            };
            return matches(&subject, &query).unwrap_or(false);
        }
    }
    value_eq(item, condition)
}

/// Keep integers integral where possible, matching backend number handling.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}
