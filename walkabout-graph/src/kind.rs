use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use walkabout_core::{Error, FieldSet, IndexSpec};

/// A declared node kind: a name plus its field specs.
#[derive(Debug, Clone)]
pub struct NodeKind {
    pub name: String,
    pub fields: FieldSet,
}

impl NodeKind {
    pub fn new(name: impl Into<String>, fields: FieldSet) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// A kind with no declared fields. Anything goes in its context.
    pub fn schemaless(name: impl Into<String>) -> Self {
        Self::new(name, FieldSet::default())
    }
}

/// A declared edge kind.
#[derive(Debug, Clone)]
pub struct EdgeKind {
    pub name: String,
    pub fields: FieldSet,
}

impl EdgeKind {
    pub fn new(name: impl Into<String>, fields: FieldSet) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn schemaless(name: impl Into<String>) -> Self {
        Self::new(name, FieldSet::default())
    }
}

/// Registry of entity kinds known to a context family.
///
/// Kinds are declared at startup. An undeclared kind is treated as
/// schema-less: its context passes through unvalidated and no indexes are
/// created, which is what the built-in `Root` relies on.
#[derive(Default)]
pub struct KindRegistry {
    nodes: DashMap<String, Arc<NodeKind>>,
    edges: DashMap<String, Arc<EdgeKind>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_node(&self, kind: NodeKind) {
        self.nodes.insert(kind.name.clone(), Arc::new(kind));
    }

    pub fn register_edge(&self, kind: EdgeKind) {
        self.edges.insert(kind.name.clone(), Arc::new(kind));
    }

    pub fn node_kind(&self, name: &str) -> Option<Arc<NodeKind>> {
        self.nodes.get(name).map(|k| k.clone())
    }

    pub fn edge_kind(&self, name: &str) -> Option<Arc<EdgeKind>> {
        self.edges.get(name).map(|k| k.clone())
    }

    /// Validate a node context against its kind's declarations, applying
    /// defaults. Unknown kinds pass through untouched.
    pub fn validate_node(
        &self,
        kind: &str,
        context: Map<String, Value>,
    ) -> Result<Map<String, Value>, Error> {
        match self.node_kind(kind) {
            Some(spec) => spec.fields.validate(context),
            None => Ok(context),
        }
    }

    pub fn validate_edge(
        &self,
        kind: &str,
        context: Map<String, Value>,
    ) -> Result<Map<String, Value>, Error> {
        match self.edge_kind(kind) {
            Some(spec) => spec.fields.validate(context),
            None => Ok(context),
        }
    }

    pub fn node_indexes(&self, kind: &str) -> Vec<IndexSpec> {
        self.node_kind(kind)
            .map(|k| k.fields.index_specs())
            .unwrap_or_default()
    }

    pub fn edge_indexes(&self, kind: &str) -> Vec<IndexSpec> {
        self.edge_kind(kind)
            .map(|k| k.fields.index_specs())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use walkabout_core::FieldSpec;

    #[test]
    fn declared_kind_validates_and_defaults() {
        let registry = KindRegistry::new();
        registry.register_node(NodeKind::new(
            "City",
            FieldSet::new(vec![
                FieldSpec::string("name").required(),
                FieldSpec::boolean("active").default_value(json!(true)),
            ]),
        ));
        let ctx = registry
            .validate_node("City", json!({"name": "NYC"}).as_object().unwrap().clone())
            .unwrap();
        assert_eq!(ctx["active"], json!(true));
        assert!(registry.validate_node("City", Map::new()).is_err());
    }

    #[test]
    fn unknown_kind_is_schemaless() {
        let registry = KindRegistry::new();
        let ctx = registry
            .validate_node("Anything", json!({"x": 1}).as_object().unwrap().clone())
            .unwrap();
        assert_eq!(ctx["x"], json!(1));
        assert!(registry.node_indexes("Anything").is_empty());
    }
}
