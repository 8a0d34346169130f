use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, FieldViolation};

/// The declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Bool,
    Object,
    Array,
    /// Accepts any JSON value.
    Any,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "number",
            FieldType::Bool => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Any => "any",
        }
    }
}

/// Sort direction of an index component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrder {
    Ascending,
    Descending,
}

/// An ordered index specification: `(field, direction)` pairs plus uniqueness.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub fields: Vec<(String, IndexOrder)>,
    pub unique: bool,
}

impl IndexSpec {
    /// A deterministic name for idempotent creation, e.g. `idx_name_asc_age_desc`.
    pub fn name(&self) -> String {
        let mut out = String::from("idx");
        for (field, order) in &self.fields {
            out.push('_');
            out.push_str(&field.replace('.', "_"));
            out.push_str(match order {
                IndexOrder::Ascending => "_asc",
                IndexOrder::Descending => "_desc",
            });
        }
        out
    }
}

/// A declared, validated field on an entity kind or a walker.
///
/// Carries both storage metadata (indexing) and endpoint metadata (how the
/// field appears in a synthesized request schema).
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub ge: Option<f64>,
    pub le: Option<f64>,
    pub pattern: Option<Regex>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub indexed: bool,
    pub unique: bool,
    /// Fields sharing a group name form one compound index, in declaration order.
    pub compound_group: Option<String>,
    pub exclude_endpoint: bool,
    pub endpoint_hidden: bool,
    pub endpoint_group: Option<String>,
    pub endpoint_name: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            default: None,
            ge: None,
            le: None,
            pattern: None,
            min_length: None,
            max_length: None,
            indexed: false,
            unique: false,
            compound_group: None,
            exclude_endpoint: false,
            endpoint_hidden: false,
            endpoint_group: None,
            endpoint_name: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn ge(mut self, bound: f64) -> Self {
        self.ge = Some(bound);
        self
    }

    pub fn le(mut self, bound: f64) -> Self {
        self.le = Some(bound);
        self
    }

    /// Constrain string values to a regex. Panics on an invalid pattern,
    /// which is a declaration-time programming error.
    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(Regex::new(pattern).expect("invalid field pattern"));
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.indexed = true;
        self.unique = true;
        self
    }

    pub fn compound(mut self, group: impl Into<String>) -> Self {
        self.indexed = true;
        self.compound_group = Some(group.into());
        self
    }

    pub fn exclude_endpoint(mut self) -> Self {
        self.exclude_endpoint = true;
        self
    }

    pub fn endpoint_hidden(mut self) -> Self {
        self.endpoint_hidden = true;
        self
    }

    pub fn endpoint_group(mut self, group: impl Into<String>) -> Self {
        self.endpoint_group = Some(group.into());
        self
    }

    pub fn endpoint_name(mut self, name: impl Into<String>) -> Self {
        self.endpoint_name = Some(name.into());
        self
    }

    /// The name this field carries on the wire.
    pub fn wire_name(&self) -> &str {
        self.endpoint_name.as_deref().unwrap_or(&self.name)
    }

    fn check(&self, value: &Value) -> Result<(), FieldViolation> {
        let fail = |message: String| FieldViolation {
            field: self.name.clone(),
            message,
        };
        if !self.ty.accepts(value) {
            return Err(fail(format!("expected {}", self.ty.name())));
        }
        if let Some(n) = value.as_f64() {
            if let Some(ge) = self.ge {
                if n < ge {
                    return Err(fail(format!("must be >= {ge}")));
                }
            }
            if let Some(le) = self.le {
                if n > le {
                    return Err(fail(format!("must be <= {le}")));
                }
            }
        }
        if let Some(s) = value.as_str() {
            if let Some(min) = self.min_length {
                if s.chars().count() < min {
                    return Err(fail(format!("shorter than {min} characters")));
                }
            }
            if let Some(max) = self.max_length {
                if s.chars().count() > max {
                    return Err(fail(format!("longer than {max} characters")));
                }
            }
            if let Some(pattern) = &self.pattern {
                if !pattern.is_match(s) {
                    return Err(fail(format!("does not match pattern {}", pattern.as_str())));
                }
            }
        }
        Ok(())
    }
}

/// The declared fields of one entity kind or walker.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    fields: Vec<FieldSpec>,
}

impl FieldSet {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate a context object against the declared fields.
    ///
    /// Missing optional fields with a default are filled in; unknown fields
    /// are preserved untouched. Returns the (possibly augmented) object or a
    /// validation error aggregating every violation.
    pub fn validate(&self, mut object: Map<String, Value>) -> Result<Map<String, Value>, Error> {
        let mut violations = Vec::new();
        for spec in &self.fields {
            match object.get(&spec.name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &spec.default {
                        object.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        violations.push(FieldViolation {
                            field: spec.name.clone(),
                            message: "required field missing".into(),
                        });
                    }
                }
                Some(value) => {
                    if let Err(violation) = spec.check(value) {
                        violations.push(violation);
                    }
                }
            }
        }
        if violations.is_empty() {
            Ok(object)
        } else {
            Err(Error::validation(violations))
        }
    }

    /// Indexes implied by the declarations: one single-field index per
    /// indexed field, plus one compound index per declared group.
    pub fn index_specs(&self) -> Vec<IndexSpec> {
        let mut specs = Vec::new();
        let mut groups: Vec<(String, IndexSpec)> = Vec::new();
        for field in &self.fields {
            if !field.indexed {
                continue;
            }
            let path = format!("context.{}", field.name);
            match &field.compound_group {
                Some(group) => {
                    if let Some((_, spec)) = groups.iter_mut().find(|(g, _)| g == group) {
                        spec.fields.push((path, IndexOrder::Ascending));
                        spec.unique |= field.unique;
                    } else {
                        groups.push((
                            group.clone(),
                            IndexSpec {
                                fields: vec![(path, IndexOrder::Ascending)],
                                unique: field.unique,
                            },
                        ));
                    }
                }
                None => specs.push(IndexSpec {
                    fields: vec![(path, IndexOrder::Ascending)],
                    unique: field.unique,
                }),
            }
        }
        specs.extend(groups.into_iter().map(|(_, spec)| spec));
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let fields = FieldSet::new(vec![
            FieldSpec::string("name").required(),
            FieldSpec::boolean("active").default_value(json!(true)),
        ]);
        let out = fields.validate(object(json!({"name": "NYC"}))).unwrap();
        assert_eq!(out["active"], json!(true));
    }

    #[test]
    fn missing_required_field_is_a_violation() {
        let fields = FieldSet::new(vec![FieldSpec::string("name").required()]);
        let err = fields.validate(Map::new()).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Validation);
        assert_eq!(err.details.unwrap()[0]["field"], "name");
    }

    #[test]
    fn range_and_length_constraints() {
        let fields = FieldSet::new(vec![
            FieldSpec::integer("age").ge(0.0).le(150.0),
            FieldSpec::string("code").min_length(2).max_length(4),
        ]);
        assert!(fields
            .validate(object(json!({"age": 30, "code": "ab"})))
            .is_ok());
        assert!(fields.validate(object(json!({"age": -1}))).is_err());
        assert!(fields.validate(object(json!({"code": "a"}))).is_err());
        assert!(fields.validate(object(json!({"code": "abcde"}))).is_err());
    }

    #[test]
    fn pattern_constraint() {
        let fields = FieldSet::new(vec![FieldSpec::string("email").pattern(r"^[^@]+@[^@]+$")]);
        assert!(fields
            .validate(object(json!({"email": "a@b.com"})))
            .is_ok());
        assert!(fields.validate(object(json!({"email": "nope"}))).is_err());
    }

    #[test]
    fn type_mismatch_is_a_violation() {
        let fields = FieldSet::new(vec![FieldSpec::integer("age")]);
        assert!(fields.validate(object(json!({"age": "thirty"}))).is_err());
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let fields = FieldSet::new(vec![FieldSpec::string("name")]);
        let out = fields
            .validate(object(json!({"name": "x", "extra": 1})))
            .unwrap();
        assert_eq!(out["extra"], json!(1));
    }

    #[test]
    fn index_specs_prefix_context_and_group_compounds() {
        let fields = FieldSet::new(vec![
            FieldSpec::string("email").unique(),
            FieldSpec::string("city").compound("geo"),
            FieldSpec::string("street").compound("geo"),
            FieldSpec::string("note"),
        ]);
        let specs = fields.index_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].fields[0].0, "context.email");
        assert!(specs[0].unique);
        assert_eq!(
            specs[1]
                .fields
                .iter()
                .map(|(f, _)| f.as_str())
                .collect::<Vec<_>>(),
            vec!["context.city", "context.street"]
        );
        assert_eq!(specs[1].name(), "idx_context_city_asc_context_street_asc");
    }
}
