//! Request-schema synthesis for walker endpoints.
//!
//! A walker's declared fields become its HTTP body schema: grouped fields
//! nest under their group key, renamed fields use their wire name, excluded
//! fields never cross the wire, and hidden fields are accepted but not
//! documented. Decoding flattens the wire shape back into the walker's
//! field names and enforces the declared constraints.

use serde_json::{Map, Value};
use walkabout_core::{Error, FieldSet, FieldSpec, FieldType};

/// Flatten and validate a request body against a walker's field set.
///
/// The returned map is keyed by the walker's internal field names and is
/// ready to deserialize into the walker struct. Constraint violations are a
/// validation error (422).
pub fn decode_body(fields: &FieldSet, body: &Value) -> Result<Map<String, Value>, Error> {
    let body = body.as_object().cloned().unwrap_or_default();
    let mut flat = body.clone();
    // Group containers are unpacked below, not fields themselves.
    for spec in fields.fields() {
        if let Some(group) = &spec.endpoint_group {
            flat.remove(group);
        }
    }
    for spec in fields.fields() {
        if spec.exclude_endpoint {
            flat.remove(&spec.name);
            flat.remove(spec.wire_name());
            continue;
        }
        let value = match &spec.endpoint_group {
            Some(group) => body
                .get(group)
                .and_then(Value::as_object)
                .and_then(|g| g.get(spec.wire_name()))
                .cloned(),
            None => body.get(spec.wire_name()).cloned(),
        };
        if spec.wire_name() != spec.name {
            flat.remove(spec.wire_name());
        }
        if let Some(value) = value {
            flat.insert(spec.name.clone(), value);
        }
    }
    fields.validate(flat)
}

fn type_schema(spec: &FieldSpec) -> Value {
    let mut schema = Map::new();
    let ty = match spec.ty {
        FieldType::String => Some("string"),
        FieldType::Integer => Some("integer"),
        FieldType::Float => Some("number"),
        FieldType::Bool => Some("boolean"),
        FieldType::Object => Some("object"),
        FieldType::Array => Some("array"),
        FieldType::Any => None,
    };
    if let Some(ty) = ty {
        schema.insert("type".into(), Value::String(ty.into()));
    }
    if let Some(ge) = spec.ge {
        schema.insert("minimum".into(), serde_json::json!(ge));
    }
    if let Some(le) = spec.le {
        schema.insert("maximum".into(), serde_json::json!(le));
    }
    if let Some(pattern) = &spec.pattern {
        schema.insert("pattern".into(), Value::String(pattern.as_str().into()));
    }
    if let Some(min) = spec.min_length {
        schema.insert("minLength".into(), serde_json::json!(min));
    }
    if let Some(max) = spec.max_length {
        schema.insert("maxLength".into(), serde_json::json!(max));
    }
    if let Some(default) = &spec.default {
        schema.insert("default".into(), default.clone());
    }
    Value::Object(schema)
}

/// The documented body schema for a walker endpoint.
///
/// Hidden fields are accepted at decode time but left out here.
pub fn synthesize(fields: &FieldSet) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    let mut groups: Vec<(String, Map<String, Value>, Vec<Value>)> = Vec::new();
    for spec in fields.fields() {
        if spec.exclude_endpoint || spec.endpoint_hidden {
            continue;
        }
        let wire = spec.wire_name().to_string();
        match &spec.endpoint_group {
            Some(group) => {
                let entry = match groups.iter_mut().find(|(name, _, _)| name == group) {
                    Some(entry) => entry,
                    None => {
                        groups.push((group.clone(), Map::new(), Vec::new()));
                        groups.last_mut().unwrap()
                    }
                };
                entry.1.insert(wire.clone(), type_schema(spec));
                if spec.required {
                    entry.2.push(Value::String(wire));
                }
            }
            None => {
                properties.insert(wire.clone(), type_schema(spec));
                if spec.required {
                    required.push(Value::String(wire));
                }
            }
        }
    }
    for (name, group_properties, group_required) in groups {
        let mut group_schema = Map::new();
        group_schema.insert("type".into(), Value::String("object".into()));
        group_schema.insert("properties".into(), Value::Object(group_properties));
        if !group_required.is_empty() {
            group_schema.insert("required".into(), Value::Array(group_required));
        }
        properties.insert(name, Value::Object(group_schema));
    }
    let mut schema = Map::new();
    schema.insert("type".into(), Value::String("object".into()));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    Value::Object(schema)
}
